//! Concurrent channel loading.
//!
//! Each channel is read on the tokio blocking pool; a semaphore bounds how
//! many run at once. Tables come back in discovery order no matter which
//! channel finishes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cyclelog_core::error::{CyclerError, Result};
use cyclelog_core::models::{ChannelDescriptor, ChannelTable};
use cyclelog_data::reader::ChannelReader;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

// ── ChannelLoader ─────────────────────────────────────────────────────────────

pub struct ChannelLoader {
    reader: Arc<dyn ChannelReader>,
    max_workers: usize,
    /// Shared with the reader's `ReadOptions`.
    cancel: Arc<AtomicBool>,
}

impl ChannelLoader {
    /// `max_workers` below 1 is treated as 1.
    pub fn new(reader: Arc<dyn ChannelReader>, max_workers: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            reader,
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Load every channel, failing fast on the first error.
    ///
    /// When a channel fails the shared cancellation flag is raised, channels
    /// still waiting for a permit are aborted, and the error is returned.
    /// Channels already reading stop at their next fragment boundary.
    pub async fn load_all(&self, channels: Vec<ChannelDescriptor>) -> Result<Vec<ChannelTable>> {
        let total = channels.len();
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<(usize, Result<ChannelTable>)> = JoinSet::new();

        debug!(
            "Loading {} channels with {} workers",
            total, self.max_workers
        );
        for (index, channel) in channels.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let reader = Arc::clone(&self.reader);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, Err(CyclerError::Cancelled(channel.id)));
                };
                let outcome =
                    tokio::task::spawn_blocking(move || reader.load_channel(&channel)).await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(join_err) => Err(CyclerError::Io(join_err.into())),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<ChannelTable>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) if join_err.is_cancelled() => continue,
                Err(join_err) => (usize::MAX, Err(CyclerError::Io(join_err.into()))),
            };
            match result {
                Ok(table) => {
                    debug!("Channel {} finished ({} rows)", table.id(), table.len());
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(table);
                    }
                }
                Err(err) => {
                    warn!("Stopping after channel failure: {err}");
                    self.cancel.store(true, Ordering::Relaxed);
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
