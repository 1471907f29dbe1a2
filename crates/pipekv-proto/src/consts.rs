//! Shared size constants.
//!
//! Both sides of every pipe must agree on these; changing one is a wire
//! format change.

/// Maximum length of a key or value, in bytes.
pub const MAX_STRING_SIZE: usize = 40;

/// Maximum length of a FIFO path carried in a connection frame.
///
/// One constant for both sides; the server rejects longer paths and the
/// client refuses to derive them.
pub const MAX_PIPE_PATH_LENGTH: usize = 40;

/// Number of concurrently accepted sessions (and session worker threads).
pub const MAX_SESSION_COUNT: usize = 4;

/// Per-key subscriber ceiling.
pub const MAX_SUBSCRIBERS_PER_KEY: usize = 10 * MAX_SESSION_COUNT;

/// Client-side cap on outstanding subscriptions.
pub const MAX_CLIENT_SUBS: usize = MAX_SESSION_COUNT;

/// Maximum number of pairs (or keys) in one batched command.
pub const MAX_WRITE_SIZE: usize = 256;

/// Registration frame: op code plus three NUL-padded FIFO paths.
pub const CONNECT_FRAME_LEN: usize = 1 + 3 * MAX_PIPE_PATH_LENGTH;

/// Subscribe/unsubscribe frame: op code plus one NUL-padded key.
pub const KEY_FRAME_LEN: usize = 1 + MAX_STRING_SIZE;

/// Every response is exactly `[op_code, result]`.
pub const RESPONSE_LEN: usize = 2;

/// Notification frame: type tag plus NUL-padded key and value.
pub const NOTIFICATION_FRAME_LEN: usize = 1 + 2 * MAX_STRING_SIZE;
