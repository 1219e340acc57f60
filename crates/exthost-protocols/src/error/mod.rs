//! Error types for the exthost protocol layer.

mod extension;
mod manifest;

pub use extension::*;
pub use manifest::*;
