//! Prompt-conditioned segmentation on top of an encoder/decoder model pair.
//!
//! [`SamSession`] opens both models through an [`edgesam_core::Backend`],
//! embeds one image at a time and answers any number of point/box prompts
//! against the cached embedding.

pub mod cache;
pub mod config;
pub mod contract;
pub mod error;
pub mod image;
pub mod postprocess;
pub mod preprocess;
pub mod prompt;
pub mod session;

pub use cache::*;
pub use config::*;
pub use contract::{DecoderContract, EncoderContract, ModelContract};
pub use error::*;
pub use image::*;
pub use prompt::*;
pub use session::*;
