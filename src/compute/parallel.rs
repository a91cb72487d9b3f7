//! A worker-pool evaluator with asynchronous result delivery.
//!
//! Ready nodes are snapshotted into [`NodeCall`]s and spawned onto a rayon
//! thread pool. Workers never see the graph: each sends its outcome back over
//! an mpsc channel whose only consumer is the drain loop, so the dirty set,
//! the pending set and every slot are mutated from a single thread.

use super::evaluator::Evaluator;
use super::task::NodeCall;
use crate::graph::{GraphError, NodeId, NodeStore};
use crate::store::Value;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Message sent by a worker when a node finishes, successfully or not.
#[derive(Debug)]
struct Completion {
    node: NodeId,
    outcome: Result<Value, GraphError>,
}

pub struct ParallelEvaluator {
    /// Pool size; 0 lets rayon pick one thread per CPU.
    workers: usize,
    poll_interval: Duration,
    pool: Option<ThreadPool>,
    /// Nodes submitted to the pool whose completion has not been applied yet.
    pending: BTreeSet<NodeId>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

impl fmt::Debug for ParallelEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelEvaluator")
            .field("workers", &self.workers)
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.pool.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

impl ParallelEvaluator {
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            workers,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pool: None,
            pending: BTreeSet::new(),
            sender,
            receiver,
        }
    }

    /// Upper bound on each blocking wait for completions. The loop wakes as
    /// soon as a completion arrives; this only bounds idle waits.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(self.workers, |p| p.current_num_threads())
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pending(&self) -> &BTreeSet<NodeId> {
        &self.pending
    }

    /// Ready nodes minus those already in flight.
    fn ready(store: &NodeStore, pending: &BTreeSet<NodeId>) -> Vec<NodeId> {
        store.ready().into_iter().filter(|id| !pending.contains(id)).collect()
    }

    fn complete(
        store: &mut NodeStore,
        pending: &mut BTreeSet<NodeId>,
        completion: Completion,
        failure: &mut Option<GraphError>,
    ) {
        pending.remove(&completion.node);
        let applied = completion
            .outcome
            .and_then(|value| store.set_result(completion.node, value));

        if let Err(e) = applied {
            tracing::warn!(node = %completion.node, error = %e, "node failed");
            if failure.is_none() {
                *failure = Some(e);
            }
        }
    }
}

impl Evaluator for ParallelEvaluator {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn start(&mut self) -> Result<(), GraphError> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("dataflow-worker-{}", i))
            .build()
            .map_err(|e| GraphError::WorkerPool(e.to_string()))?;
        tracing::debug!(workers = pool.current_num_threads(), "worker pool started");
        self.pool = Some(pool);
        Ok(())
    }

    /// Drops the pool. `drain` never returns with work in flight, so no
    /// completion is lost.
    fn stop(&mut self) {
        if let Some(pool) = self.pool.take() {
            tracing::debug!(workers = pool.current_num_threads(), "worker pool stopped");
        }
    }

    fn drain(&mut self, store: &mut NodeStore) -> Result<(), GraphError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| GraphError::WorkerPool("evaluator not started".to_string()))?;
        let mut failure: Option<GraphError> = None;

        loop {
            // After a failure nothing new is submitted; in-flight work is
            // still collected so the pending set ends empty.
            if failure.is_none() {
                for node in Self::ready(store, &self.pending) {
                    let call: NodeCall = match store.prepare(node) {
                        Ok(call) => call,
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    };
                    let sender = self.sender.clone();
                    tracing::trace!(%node, "submitting");
                    self.pending.insert(node);
                    pool.spawn(move || {
                        let outcome = call.invoke();
                        // The receiver lives as long as the evaluator.
                        let _ = sender.send(Completion { node: call.node, outcome });
                    });
                }
            }

            if self.pending.is_empty() {
                break;
            }

            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(completion) => Self::complete(store, &mut self.pending, completion, &mut failure),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GraphError::WorkerPool("completion channel closed".to_string()));
                }
            }
            while let Ok(completion) = self.receiver.try_recv() {
                Self::complete(store, &mut self.pending, completion, &mut failure);
            }
        }

        match failure {
            Some(e) => Err(e),
            None if !store.is_clean() => Err(GraphError::Stalled { remaining: store.dirty().len() }),
            None => Ok(()),
        }
    }
}

impl Drop for ParallelEvaluator {
    fn drop(&mut self) {
        self.stop();
    }
}
