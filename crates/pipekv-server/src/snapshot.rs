//! Snapshot supervisor: bounded fan-out of backup tasks.
//!
//! A backup clones the whole table under the exclusive table lock - the
//! consistency point - and then streams the clone to disk from a background
//! thread holding no lock at all. The supervisor caps how many of those
//! writer threads run at once; a request made at the ceiling waits for a
//! slot instead of failing.

use parking_lot::{Condvar, Mutex};
use pipekv::{Store, TableSnapshot};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// In-flight task count plus the condvar both slot-waiters and
/// [`SnapshotSupervisor::wait_all`] sleep on. Shared with every writer
/// thread so it can retire its own slot.
struct TaskGauge {
    active: Mutex<usize>,
    task_done: Condvar,
}

impl TaskGauge {
    fn finish_one(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        drop(active);
        self.task_done.notify_all();
    }
}

pub struct SnapshotSupervisor {
    store: Arc<Store>,
    max_tasks: usize,
    gauge: Arc<TaskGauge>,
}

impl SnapshotSupervisor {
    /// # Panics
    ///
    /// Panics if `max_tasks` is 0 - a ceiling of zero could never admit a
    /// backup.
    pub fn new(store: Arc<Store>, max_tasks: usize) -> Self {
        assert!(max_tasks > 0, "snapshot ceiling must admit at least one task");
        Self {
            store,
            max_tasks,
            gauge: Arc::new(TaskGauge {
                active: Mutex::new(0),
                task_done: Condvar::new(),
            }),
        }
    }

    /// Takes a snapshot and hands it to a background writer thread.
    ///
    /// Blocks while `max_tasks` snapshots are already in flight. Returns
    /// once the writer thread owns the clone; an error means the task could
    /// not be spawned and nothing was written.
    pub fn request(&self, target: PathBuf) -> io::Result<()> {
        {
            let mut active = self.gauge.active.lock();
            while *active >= self.max_tasks {
                self.gauge.task_done.wait(&mut active);
            }
            *active += 1;
        }

        // Consistency point: every mutator is quiesced while the clone is
        // taken; the write below happens against the detached copy.
        let snapshot = self.store.clone_contents();

        let gauge = Arc::clone(&self.gauge);
        let spawned = thread::Builder::new()
            .name("snapshot".to_owned())
            .spawn(move || {
                match write_snapshot(&target, &snapshot) {
                    Ok(()) => debug!(
                        path = %target.display(),
                        entries = snapshot.len(),
                        "snapshot written"
                    ),
                    Err(e) => error!(path = %target.display(), "failed to write snapshot: {e}"),
                }
                gauge.finish_one();
            });
        if let Err(e) = spawned {
            self.gauge.finish_one();
            return Err(e);
        }
        Ok(())
    }

    /// Blocks until every in-flight snapshot task has finished.
    pub fn wait_all(&self) {
        let mut active = self.gauge.active.lock();
        while *active > 0 {
            self.gauge.task_done.wait(&mut active);
        }
    }

    /// Number of snapshot tasks currently in flight.
    pub fn active_tasks(&self) -> usize {
        *self.gauge.active.lock()
    }
}

fn write_snapshot(target: &Path, snapshot: &TableSnapshot) -> io::Result<()> {
    let mut file = File::create(target)?;
    snapshot.write_to(&mut file)
}
