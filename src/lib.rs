//! Photo generation task pipeline.
//!
//! A photo generation request becomes a persistent task that moves through a
//! fixed state machine:
//!
//! ```text
//! created -> downloading -> downloaded -> generating -> generated -> uploading -> completed
//!     \____________\_____________\_____________\____________\____________\--> failed
//! ```
//!
//! Each step is an independent, retriable dispatch. The task record is the
//! only shared state and every write to it is a compare-and-swap, so
//! duplicate or out-of-order dispatches are harmless: the loser observes a
//! conflict and backs off.
//!
//! # Module Organization
//!
//! - [`types`] - Status, submission params and per-stage state data
//! - [`domain`] - The persisted [`TaskRecord`]
//! - [`store`] - [`TaskStore`](store::TaskStore) trait, generic store and in-memory backend
//! - [`handler`] - One [`StageHandler`](handler::StageHandler) per status
//! - [`dispatcher`] - Runs one handler step and applies the retry policy
//! - [`worker`] - Generation worker hand-off
//! - [`progress`] - Read-only progress query
//! - [`blob`] / [`generation`] - External collaborators
//! - [`config`] - TOML pipeline configuration
//! - [`driver`] - In-process trigger loop

pub mod blob;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod domain;
pub mod driver;
pub mod error;
pub mod generation;
pub mod handler;
#[cfg(feature = "logging")]
pub mod logging;
pub mod progress;
pub mod store;
pub mod types;
pub mod worker;

pub use config::PipelineConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use domain::TaskRecord;
pub use error::TaskError;
pub use progress::{progress, Progress};
pub use store::memory::InMemoryTaskStore;
pub use store::TaskStore;
pub use types::*;
