//! Common types for the Gemini key proxy workspace

mod error;
mod mask;
mod secret;

pub use error::{Error, Result};
pub use mask::mask;
pub use secret::Secret;
