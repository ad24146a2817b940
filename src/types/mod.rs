//! Task data model: status, submission params, and per-stage state data.

pub mod params;
pub mod state_data;
pub mod status;

pub use params::{ImageRef, TaskParams};
pub use state_data::{
    DownloadedImage, GeneratedImage, Handoff, StateData, StatePatch, UploadedImage,
};
pub use status::TaskStatus;
