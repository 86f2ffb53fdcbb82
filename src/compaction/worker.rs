use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::compaction::Compactor;
use crate::error::{Error, Result};

/// Pending requests beyond this are dropped; a queued `MaybeCompact`
/// already covers them.
const QUEUE_DEPTH: usize = 16;

pub enum CompactionRequest {
    /// A flush happened; compact whatever became over-full.
    MaybeCompact,
    /// Explicit full compaction; the result goes back on the sender.
    Compact(Sender<Result<()>>),
    Shutdown,
}

/// Background thread that owns all scheduled compaction.
pub struct CompactionWorker {
    sender: Sender<CompactionRequest>,
    join: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    pub fn spawn(compactor: Arc<Compactor>) -> Result<Self> {
        let (sender, receiver) = bounded(QUEUE_DEPTH);
        let join = thread::Builder::new()
            .name("lsm-compaction".into())
            .spawn(move || worker_loop(compactor, receiver))?;
        Ok(CompactionWorker {
            sender,
            join: Some(join),
        })
    }

    /// Nudge the worker after a flush. Never blocks.
    pub fn notify(&self) {
        match self.sender.try_send(CompactionRequest::MaybeCompact) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("compaction worker is gone; skipping notification");
            }
        }
    }

    /// Run a full compaction on the worker and wait for it.
    pub fn compact(&self) -> Result<()> {
        let (reply, result) = bounded(1);
        self.sender
            .send(CompactionRequest::Compact(reply))
            .map_err(|_| Error::EngineClosed)?;
        result
            .recv()
            .map_err(|_| Error::CompactionFailed("compaction worker exited".into()))?
    }

    /// Stop the worker after the job it is running, if any.
    pub fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.send(CompactionRequest::Shutdown);
            if join.join().is_err() {
                tracing::warn!("compaction worker panicked");
            }
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(compactor: Arc<Compactor>, requests: Receiver<CompactionRequest>) {
    tracing::debug!("compaction worker started");
    for request in requests.iter() {
        match request {
            CompactionRequest::MaybeCompact => {
                // Failures are logged by the compactor; the next flush retries.
                let _ = compactor.run_pending();
            }
            CompactionRequest::Compact(reply) => {
                let _ = reply.send(compactor.compact_all());
            }
            CompactionRequest::Shutdown => break,
        }
    }
    tracing::debug!("compaction worker stopped");
}
