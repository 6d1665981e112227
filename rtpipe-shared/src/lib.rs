//! Shared error types used across the rtpipe workspace.

#![warn(rust_2018_idioms)]

pub mod error;

pub use error::{Error, Result};
