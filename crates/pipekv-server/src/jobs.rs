//! Job-runner worker pool.
//!
//! Workers share one directory iterator behind a mutex; each claims the
//! next `.job` file, writes its results to the sibling `.out` file, and
//! dispatches parsed commands to the executor, the store listing, or the
//! snapshot supervisor.

use crate::parser::{Command, JobParser, HELP_TEXT};
use crate::signal;
use crate::snapshot::SnapshotSupervisor;
use parking_lot::Mutex;
use pipekv::{write_listing, BatchExecutor};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// The shared `.job` iterator. Each lock/next/unlock claims one directory
/// entry; filtering happens outside the lock.
pub struct JobDirectory {
    entries: Mutex<fs::ReadDir>,
}

impl JobDirectory {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            entries: Mutex::new(fs::read_dir(path)?),
        })
    }

    /// Claims the next regular `.job` file, or `None` when the directory is
    /// exhausted.
    fn next_job(&self) -> Option<PathBuf> {
        loop {
            let entry = self.entries.lock().next()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable directory entry: {e}");
                    continue;
                }
            };
            let is_file = entry.file_type().is_ok_and(|t| t.is_file());
            let path = entry.path();
            if is_file && path.extension().is_some_and(|ext| ext == "job") {
                return Some(path);
            }
        }
    }
}

/// Body of one job worker thread: masks the reset signal, then drains the
/// directory.
pub fn run_worker(
    directory: &JobDirectory,
    executor: &BatchExecutor,
    snapshots: &SnapshotSupervisor,
) {
    if let Err(e) = signal::block_on_this_thread() {
        error!("failed to mask SIGUSR1 in job worker: {e}");
    }
    while let Some(job_path) = directory.next_job() {
        debug!(path = %job_path.display(), "processing job file");
        if let Err(e) = process_job(&job_path, executor, snapshots) {
            error!(path = %job_path.display(), "job file failed: {e}");
        }
    }
}

/// Output path for backup number `seq` of `job_path`: `<stem>-<seq>.bck`.
fn backup_path(job_path: &Path, seq: u32) -> PathBuf {
    let stem = job_path.file_stem().unwrap_or_default().to_string_lossy();
    job_path.with_file_name(format!("{stem}-{seq}.bck"))
}

fn process_job(
    job_path: &Path,
    executor: &BatchExecutor,
    snapshots: &SnapshotSupervisor,
) -> io::Result<()> {
    let job = File::open(job_path)?;
    let mut out = File::create(job_path.with_extension("out"))?;
    let mut backup_seq = 1u32;

    for command in JobParser::new(BufReader::new(job)) {
        match command {
            Command::Write(pairs) => {
                if let Err(e) = executor.write_batch(&pairs) {
                    error!("failed to write pairs: {e}");
                }
            }
            Command::Read(keys) => executor.read_batch(&keys, &mut out)?,
            Command::Delete(keys) => executor.delete_batch(&keys, &mut out)?,
            Command::Show => write_listing(executor.store(), &mut out)?,
            Command::Wait(delay_ms) => {
                if delay_ms > 0 {
                    out.write_all(b"Waiting...\n")?;
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
            Command::Backup => match snapshots.request(backup_path(job_path, backup_seq)) {
                Ok(()) => backup_seq += 1,
                Err(e) => {
                    // A backup that cannot start aborts the rest of this
                    // job file.
                    error!(path = %job_path.display(), "failed to start backup: {e}");
                    break;
                }
            },
            Command::Help => print!("{HELP_TEXT}"),
            Command::Invalid => error!("Invalid command. See HELP for usage"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_paths_count_per_job_file() {
        let job = Path::new("/jobs/batch_a.job");
        assert_eq!(backup_path(job, 1), Path::new("/jobs/batch_a-1.bck"));
        assert_eq!(backup_path(job, 2), Path::new("/jobs/batch_a-2.bck"));
    }
}
