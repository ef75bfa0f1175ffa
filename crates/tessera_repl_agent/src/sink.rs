//! Delivery of unrecoverable faults to the hosting server.

use crate::state::Fault;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tessera_core::LogStorage;

/// Receives the fault that stopped an agent.
///
/// Called at most once per agent, from the agent thread.
pub trait CriticalErrorSink: Send + Sync {
    /// Handles an unrecoverable fault.
    fn shutdown(&self, fault: &Fault);
}

impl CriticalErrorSink for Sender<Fault> {
    fn shutdown(&self, fault: &Fault) {
        if self.send(fault.clone()).is_err() {
            tracing::warn!(%fault, "fault receiver dropped");
        }
    }
}

/// Closes the storage, and optionally exits the process, on a fault.
pub struct StorageShutdown<S: LogStorage> {
    storage: Arc<S>,
    exit_code: Option<i32>,
}

impl<S: LogStorage> StorageShutdown<S> {
    /// Closes `storage` on a fault.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            exit_code: None,
        }
    }

    /// Also exits the process with `code` after closing the storage.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

impl<S: LogStorage> CriticalErrorSink for StorageShutdown<S> {
    fn shutdown(&self, fault: &Fault) {
        tracing::error!(%fault, "closing storage after replication fault");
        if let Err(e) = self.storage.close() {
            tracing::error!(error = %e, "failed to close storage");
        }
        if let Some(code) = self.exit_code {
            std::process::exit(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FaultKind;
    use tessera_core::{PagedLog, StorageConfig};
    use tessera_storage::InMemoryBackend;
    use uuid::Uuid;

    fn fault() -> Fault {
        Fault {
            kind: FaultKind::WrongPageId,
            message: "diverged".into(),
        }
    }

    #[test]
    fn channel_sink_delivers() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.shutdown(&fault());
        assert_eq!(rx.try_recv().unwrap(), fault());

        drop(rx);
        tx.shutdown(&fault());
    }

    #[test]
    fn storage_shutdown_closes_log() {
        let log = PagedLog::create_slave(
            Box::new(InMemoryBackend::new()),
            StorageConfig::new().page_size(256),
            Uuid::new_v4(),
        )
        .unwrap();
        let log = Arc::new(log);
        StorageShutdown::new(Arc::clone(&log)).shutdown(&fault());
        assert!(log.is_closed());
    }
}
