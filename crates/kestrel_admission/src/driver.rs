//! Background driver that ticks a tree on a fixed interval.
//!
//! Each tick refreshes memory accounting and promotes as many queued queries
//! as capacity permits. The tick itself serializes on the tree lock; this
//! thread only supplies the timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kestrel_common::DriverConfig;

use crate::group::ResourceGroupTree;

/// Periodic driver for one tree. Stops on `shutdown` or drop.
pub struct SchedulerDriver {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerDriver {
    pub fn spawn(tree: Arc<ResourceGroupTree>, config: DriverConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        if !config.enabled {
            tracing::info!("scheduler driver disabled by config");
            return Self {
                shutdown,
                handle: None,
            };
        }
        let flag = Arc::clone(&shutdown);
        let interval = Duration::from_millis(config.tick_interval_ms.max(1));
        let handle = thread::spawn(move || {
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                "scheduler driver started"
            );
            while !flag.load(Ordering::Relaxed) {
                if let Err(err) = tree.process_queued_queries() {
                    tracing::error!(%err, "driver tick failed");
                }
                thread::sleep(interval);
            }
            tracing::info!("scheduler driver stopped");
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the driver thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
