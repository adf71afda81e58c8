//! Core types for cyclelog.
//!
//! Holds the data model shared by every layer, the error taxonomy, the
//! battery metadata grammar, unit conversion and CLI settings.

pub mod error;
pub mod formatting;
pub mod metadata;
pub mod models;
pub mod settings;
pub mod units;

pub use error::{CyclerError, Result};
