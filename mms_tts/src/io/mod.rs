//! Checkpoint location and download helpers.

pub mod model_path;

pub use model_path::{DEFAULT_MODEL_ID, get_model_path};
