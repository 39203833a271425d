//! PMS design common types and errors.
//!
//! This crate provides foundational types shared across the workspace:
//! - The unified error type with stable codes
//! - Output format specifications

pub mod error;
pub mod output;

pub use error::{Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use output::OutputFormat;
