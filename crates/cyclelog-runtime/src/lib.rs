//! Runtime layer for cyclelog.
//!
//! Loads channels concurrently and drives the ingestion pipeline behind the
//! [`Processor`](processor::Processor) facade.

pub mod loader;
pub mod processor;

pub use cyclelog_core as core;
pub use cyclelog_data as data;
