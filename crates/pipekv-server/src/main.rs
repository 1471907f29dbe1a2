use anyhow::{bail, Context};
use clap::Parser;
use pipekv::{BatchExecutor, Store, SubscriptionRegistry};
use pipekv_proto::{MAX_SESSION_COUNT, MAX_SUBSCRIBERS_PER_KEY};
use pipekv_server::admission::SessionQueue;
use pipekv_server::jobs::{self, JobDirectory};
use pipekv_server::session::{self, ActiveSessions};
use pipekv_server::signal;
use pipekv_server::snapshot::SnapshotSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pipekv-server",
    about = "Concurrent key-value store fed by job files and named-pipe client sessions"
)]
struct Cli {
    /// Directory scanned for .job files
    jobs_dir: PathBuf,
    /// Maximum number of concurrent snapshot tasks
    max_proc: usize,
    /// Number of job worker threads
    max_threads: usize,
    /// Registration FIFO name; the pipe is created at /tmp/<name>
    register_pipe_name: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    if cli.max_threads == 0 {
        bail!("invalid number of job threads: 0");
    }
    if cli.max_proc == 0 {
        bail!("invalid snapshot task ceiling: 0");
    }

    // Mask the reset signal before any thread exists; every spawned thread
    // inherits the mask and only the host thread unblocks it.
    signal::block_on_this_thread().context("failed to mask SIGUSR1")?;

    let store = Arc::new(Store::new());
    let registry = Arc::new(SubscriptionRegistry::new(
        Arc::clone(&store),
        MAX_SUBSCRIBERS_PER_KEY,
    ));
    let executor = Arc::new(BatchExecutor::new(Arc::clone(&store), Arc::clone(&registry)));
    let snapshots = Arc::new(SnapshotSupervisor::new(Arc::clone(&store), cli.max_proc));
    let directory = Arc::new(
        JobDirectory::open(&cli.jobs_dir)
            .with_context(|| format!("failed to open jobs directory {}", cli.jobs_dir.display()))?,
    );

    let fifo_path = session::create_registration_fifo(&cli.register_pipe_name)
        .context("failed to create registration pipe")?;

    let queue = Arc::new(SessionQueue::with_capacity(MAX_SESSION_COUNT));
    let sessions = Arc::new(ActiveSessions::new());

    let host = {
        let queue = Arc::clone(&queue);
        let registry = Arc::clone(&registry);
        let sessions = Arc::clone(&sessions);
        thread::Builder::new()
            .name("host".to_owned())
            .spawn(move || session::run_host(&fifo_path, &queue, &registry, &sessions))
            .context("failed to spawn host thread")?
    };

    for i in 0..MAX_SESSION_COUNT {
        let queue = Arc::clone(&queue);
        let registry = Arc::clone(&registry);
        let sessions = Arc::clone(&sessions);
        thread::Builder::new()
            .name(format!("session-{i}"))
            .spawn(move || session::run_session_worker(&queue, &registry, &sessions))
            .context("failed to spawn session worker")?;
    }

    let mut job_workers = Vec::with_capacity(cli.max_threads);
    for i in 0..cli.max_threads {
        let directory = Arc::clone(&directory);
        let executor = Arc::clone(&executor);
        let snapshots = Arc::clone(&snapshots);
        job_workers.push(
            thread::Builder::new()
                .name(format!("job-{i}"))
                .spawn(move || jobs::run_worker(&directory, &executor, &snapshots))
                .context("failed to spawn job worker")?,
        );
    }

    for worker in job_workers {
        if worker.join().is_err() {
            error!("a job worker panicked");
        }
    }
    snapshots.wait_all();
    info!("job directory drained; serving client sessions");

    // Sessions are served until the process is killed; the host thread
    // only returns on a fatal registration-pipe error.
    match host.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e).context("registration pipe failed"),
        Err(_) => bail!("host thread panicked"),
    }
}
