use std::io;
use thiserror::Error;

/// Errors surfaced by frame codecs and pipe I/O.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The peer closed its end in the middle of a frame.
    #[error("peer closed the pipe mid-frame")]
    UnexpectedEof,

    /// A blocking read was interrupted while a reset was pending.
    ///
    /// Only the thread that keeps the reset signal unblocked ever sees
    /// this; it is the sentinel telling that thread to run its reset path
    /// instead of retrying the read.
    #[error("read interrupted by a pending reset")]
    Interrupted,

    /// The first byte of a frame named no known operation.
    #[error("unknown op code {0}")]
    UnknownOpCode(u8),

    /// A string does not fit the fixed-width field carrying it.
    #[error("field of {len} bytes exceeds frame limit of {max}")]
    FieldTooLong { len: usize, max: usize },

    /// Structurally invalid frame contents.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtoError {
    /// Returns `true` if the peer is gone and the session should end.
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::UnexpectedEof => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is the reset sentinel.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
