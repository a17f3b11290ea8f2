//! Hierarchical resource-group admission and scheduling for the kestrel
//! query coordinator.
//!
//! Work is organized into a tree of resource groups. Each group enforces a
//! running-query limit, a queued-query limit, and an advisory memory bound;
//! leaf groups hold the submitted queries. Admission walks the ancestor
//! spine, so a saturated ancestor gates every descendant. A background
//! driver periodically refreshes memory accounting and promotes queued
//! queries in fair round-robin order across sibling groups.
//!
//! ```no_run
//! use std::sync::Arc;
//! use kestrel_admission::{
//!     GroupLimits, ResourceGroupTree, SchedulerDriver, SpawnExecutor,
//! };
//!
//! # fn main() -> kestrel_admission::KestrelResult<()> {
//! let tree = ResourceGroupTree::new("global", GroupLimits::default(), Arc::new(SpawnExecutor))?;
//! let adhoc = tree.root().get_or_create_sub_group("adhoc", GroupLimits::new(10, 100, 1 << 30))?;
//! let driver = SchedulerDriver::spawn(Arc::clone(&tree), Default::default());
//! // adhoc.add(query)? for each submitted query ...
//! driver.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod group;
pub mod query;
pub mod queue;
pub mod stats;


pub use driver::SchedulerDriver;
pub use group::{ResourceGroup, ResourceGroupTree};
pub use query::{
    Executor, QueryExecution, QueryState, SpawnExecutor, StateChangeListener, SynchronousExecutor,
};
pub use queue::LinkedQueue;
pub use stats::GroupInfo;

// Re-export from kestrel_common for convenience
pub use kestrel_common::{
    DriverConfig, ErrorKind, GroupLimits, KestrelError, KestrelResult, QueryId, ResourceGroupId,
};
