//! Wire protocol for the pipekv named-pipe transport.
//!
//! Everything a client and the server must agree on lives here: the shared
//! size constants, the op codes, the fixed-width NUL-padded frames exchanged
//! over the registration/request/response/notification FIFOs, and the small
//! POSIX surface (`mkfifo`, interruptible exact reads) both binaries need.
//!
//! Frames are fixed-size on purpose: each one fits well under `PIPE_BUF`, so
//! a single `write` is atomic and readers never have to resynchronize.

mod consts;
mod error;
mod fifo;
mod frame;

pub use consts::{
    CONNECT_FRAME_LEN, KEY_FRAME_LEN, MAX_CLIENT_SUBS, MAX_PIPE_PATH_LENGTH, MAX_SESSION_COUNT,
    MAX_STRING_SIZE, MAX_SUBSCRIBERS_PER_KEY, MAX_WRITE_SIZE, NOTIFICATION_FRAME_LEN, RESPONSE_LEN,
};
pub use error::ProtoError;
pub use fifo::{create_fifo, open_read, open_read_write, open_write, read_exact_or_eof, remove_fifo, ReadOutcome};
pub use frame::{ConnectRequest, KeyRequest, Notification, OpCode, Response};
