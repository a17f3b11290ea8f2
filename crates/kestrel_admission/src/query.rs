//! Contracts the engine consumes: the query handle owned by the execution
//! engine, and the submission sink that runs start actions.

use std::fmt;

use kestrel_common::QueryId;

/// Externally observed lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Admitted but not yet started.
    Queued,
    /// Executing on the worker fleet.
    Running,
    Finished,
    Failed,
    Canceled,
}

impl QueryState {
    /// Terminal states release the query's admission slot.
    pub fn is_done(self) -> bool {
        matches!(
            self,
            QueryState::Finished | QueryState::Failed | QueryState::Canceled
        )
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryState::Queued => write!(f, "QUEUED"),
            QueryState::Running => write!(f, "RUNNING"),
            QueryState::Finished => write!(f, "FINISHED"),
            QueryState::Failed => write!(f, "FAILED"),
            QueryState::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Callback invoked on each query state transition.
pub type StateChangeListener = Box<dyn Fn(QueryState) + Send + Sync>;

/// Handle to a submitted query. The execution engine owns the query's
/// lifecycle; the admission engine keeps a reference for bookkeeping and
/// releases it when the terminal-state listener fires.
pub trait QueryExecution: Send + Sync {
    /// Coordinator-assigned id, stable for the life of the query.
    fn query_id(&self) -> QueryId;

    /// Begin execution. Idempotent. Failures surface as terminal states and
    /// are never reported to the caller.
    fn start(&self);

    fn state(&self) -> QueryState;

    /// Register a listener for state transitions that happen after
    /// registration. Deliveries may arrive from arbitrary threads and may be
    /// duplicated; the admission engine's cleanup is idempotent. The current
    /// state is not replayed to new listeners.
    fn add_state_change_listener(&self, listener: StateChangeListener);

    /// Memory currently reserved by the query, in bytes. The admission
    /// engine reads this only while holding the tree lock.
    fn total_memory_reservation(&self) -> u64;
}

/// Submission sink that runs start actions asynchronously.
///
/// `execute` is called while the tree lock is held and must not block on
/// work that could call back into the admission engine.
pub trait Executor: Send + Sync {
    fn execute(&self, action: Box<dyn FnOnce() + Send>);
}

/// Runs each action on a freshly spawned thread.
pub struct SpawnExecutor;

impl Executor for SpawnExecutor {
    fn execute(&self, action: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(action);
    }
}

/// Runs each action inline on the submitting thread.
///
/// Only suitable when the actions cannot re-enter the admission engine: the
/// submitter holds the tree lock, so a re-entrant action would deadlock.
pub struct SynchronousExecutor;

impl Executor for SynchronousExecutor {
    fn execute(&self, action: Box<dyn FnOnce() + Send>) {
        action();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!QueryState::Queued.is_done());
        assert!(!QueryState::Running.is_done());
        assert!(QueryState::Finished.is_done());
        assert!(QueryState::Failed.is_done());
        assert!(QueryState::Canceled.is_done());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(QueryState::Running.to_string(), "RUNNING");
        assert_eq!(QueryState::Canceled.to_string(), "CANCELED");
    }

    #[test]
    fn test_synchronous_executor_runs_inline() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&ran);
        SynchronousExecutor.execute(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
