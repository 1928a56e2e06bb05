//! Operation serializer
//!
//! A bounded FIFO queue drained by one worker task. Operations run strictly in
//! submission order and never overlap; a failed operation releases the queue just
//! like a successful one. Callers that stop waiting do not cancel their operation.

use crate::core::error::{Error, Result};
use crate::core::executor::CommandExecutor;
use crate::core::sync::FirewallSynchronizer;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One engine call and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Operation {
    Append(Vec<String>),
    Replace(Vec<String>),
    Flush,
}

struct PendingOperation {
    operation: Operation,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
pub(crate) struct OperationSerializer {
    queue: mpsc::Sender<PendingOperation>,
}

impl OperationSerializer {
    /// Starts the worker on the current tokio runtime.
    pub(crate) fn spawn<E: CommandExecutor>(
        synchronizer: FirewallSynchronizer<E>,
        depth: usize,
    ) -> Self {
        let (queue, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(run_worker(rx, synchronizer));
        Self { queue }
    }

    /// Enqueues `operation` and waits until it has fully settled.
    pub(crate) async fn submit(&self, operation: Operation) -> Result<()> {
        let (reply, settled) = oneshot::channel();
        self.queue
            .send(PendingOperation { operation, reply })
            .await
            .map_err(|_| Error::Internal("ban engine worker has stopped".to_string()))?;
        settled
            .await
            .map_err(|_| Error::Internal("ban engine worker dropped the operation".to_string()))?
    }
}

async fn run_worker<E: CommandExecutor>(
    mut rx: mpsc::Receiver<PendingOperation>,
    mut synchronizer: FirewallSynchronizer<E>,
) {
    while let Some(PendingOperation { operation, reply }) = rx.recv().await {
        let kind = operation.as_ref().to_string();
        debug!("Running {kind} operation");
        let result = match operation {
            Operation::Append(raw) => synchronizer.append(&raw).await,
            Operation::Replace(raw) => synchronizer.replace(&raw).await,
            Operation::Flush => synchronizer.flush().await,
        };
        if let Err(e) = &result {
            warn!("{kind} operation failed: {e}");
        }
        // The caller may have gone away; the operation still ran to completion
        let _ = reply.send(result);
    }
    debug!("Ban engine worker exiting: all handles dropped");
}
