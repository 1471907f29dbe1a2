//! Named-pipe plumbing: creation, the open modes each endpoint needs, and
//! an exact-read primitive that understands signal interruption.

use crate::error::ProtoError;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Creates a FIFO at `path` with mode 0666, replacing any stale one.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    remove_fifo(path);
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    // SAFETY: cpath is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Best-effort unlink; a missing file is not an error.
pub fn remove_fifo(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            eprintln!("unlink({}) failed: {e}", path.display());
        }
    }
}

/// Opens a FIFO for reading; blocks until a writer arrives.
pub fn open_read(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Opens a FIFO for writing; blocks until a reader arrives.
pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Opens a FIFO for both reading and writing.
///
/// Used for the registration pipe: holding a write end ourselves means the
/// read side never sees EOF while clients come and go.
pub fn open_read_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// What a completed [`read_exact_or_eof`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer was filled.
    Full,
    /// EOF before the first byte; the peer is gone.
    Eof,
}

/// Reads exactly `buf.len()` bytes, or reports a clean EOF at a frame
/// boundary.
///
/// `EINTR` is retried, unless `interrupt` is set at the moment of the
/// interruption; then [`ProtoError::Interrupted`] is surfaced so the
/// caller can run its reset path. EOF after a partial frame is a protocol
/// error.
pub fn read_exact_or_eof(
    reader: &mut impl Read,
    buf: &mut [u8],
    interrupt: Option<&AtomicBool>,
) -> Result<ReadOutcome, ProtoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => return Err(ProtoError::UnexpectedEof),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                if interrupt.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                    return Err(ProtoError::Interrupted);
                }
            }
            Err(e) => return Err(ProtoError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}
