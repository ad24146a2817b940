//! Domain types for the task store's internal representation.

pub mod record;

pub use record::TaskRecord;
