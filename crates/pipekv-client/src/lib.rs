//! Client-side API for a pipekv session.
//!
//! A session talks to the server over three FIFOs the client creates and
//! the server opens: requests out, responses in, notifications in. The
//! notification pipe is read by a dedicated listener thread so change
//! records print as they arrive, independent of the command loop.

mod api;
mod command;

pub use api::{connect, run_notification_listener, ClientError, ClientPipes, Session};
pub use command::{parse_client_command, ClientCommand};
