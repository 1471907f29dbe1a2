//! Server runtime for pipekv.
//!
//! The binary wires four thread groups around the core store: a job-runner
//! pool draining a directory of `.job` files, a host thread accepting
//! client connections on a registration FIFO, a fixed set of session
//! workers, and a bounded pool of snapshot writer tasks. SIGUSR1, observed
//! only by the host thread, disconnects every client and clears the
//! subscription registry.

pub mod admission;
pub mod jobs;
pub mod parser;
pub mod session;
pub mod signal;
pub mod snapshot;
