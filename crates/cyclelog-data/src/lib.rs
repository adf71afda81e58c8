//! Ingestion layer for cycler exports.
//!
//! Recognizes the equipment that produced a data folder, reads every
//! channel into a [`ChannelTable`](cyclelog_core::models::ChannelTable) with
//! canonical units, and merges the channels into one dataset. Toyo summary
//! rows can be labelled with cycle, pattern and C-rate information.

pub mod classifier;
pub mod labeling;
pub mod merger;
pub mod pne;
pub mod reader;
pub mod summary;
pub mod toyo;

#[cfg(test)]
mod fixtures;

pub use cyclelog_core as core;
