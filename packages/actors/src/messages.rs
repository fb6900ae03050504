//! Message types for actor communication.

use ractor::RpcReplyPort;

/// Counters kept by each worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Items handled successfully and acknowledged.
    pub succeeded: u64,
    /// Items whose handling failed; left for redelivery.
    pub failed: u64,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Receive and process at most one item.
    Poll,

    /// Get the worker's counters.
    GetStats { reply: RpcReplyPort<WorkerStats> },

    /// Stop after the current iteration.
    Shutdown,
}

/// Messages for the WatcherActor.
#[derive(Debug)]
pub enum WatcherMessage {
    /// An object was written to the render bucket.
    ArtifactCreated { key: String },

    /// Finalize Processing jobs whose composite already exists.
    Reconcile,

    /// Stop the watcher.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Forward a render-bucket creation event to the watcher.
    ArtifactCreated { key: String },

    /// Creation events were lost; ask the watcher to rescan.
    Reconcile,

    /// List the ids of the running workers.
    ListWorkers { reply: RpcReplyPort<Vec<String>> },

    /// Counters of every running worker, keyed by worker id.
    GetStats {
        reply: RpcReplyPort<Vec<(String, WorkerStats)>>,
    },

    /// Drain workers and stop.
    Shutdown,
}
