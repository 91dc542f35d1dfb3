//! Shared types for the ingest gateway

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
