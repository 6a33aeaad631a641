use std::io;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced while creating or attaching to a stream.
///
/// Everything here is a construction-time failure: an instance that fails
/// with one of these is never handed out half-built.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The name cannot be passed to the OS (interior NUL byte).
    #[error("invalid object name {name:?}")]
    InvalidName { name: String },

    /// A producer tried to create a segment that is already present.
    #[error("shared memory segment {name:?} already exists")]
    AlreadyExists { name: String },

    /// A libc call failed.
    #[error("{op} failed for {name:?}: {source}")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// An attached segment is smaller than the control block says it must be.
    #[error("shared memory segment {name:?} holds {actual} bytes, expected at least {expected}")]
    SegmentTooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A buffer size does not fit the type the protocol stores it in.
    #[error("{what} of {size} bytes is too large")]
    BufferTooLarge { what: &'static str, size: u64 },

    /// The configured attach deadline passed before the producer showed up.
    #[error("gave up waiting for {name:?} after {waited:?}")]
    AttachTimedOut { name: String, waited: Duration },
}

impl Error {
    /// Captures `errno` for a failed libc call.
    pub(crate) fn last_os(op: &'static str, name: &str) -> Self {
        Error::Os {
            op,
            name: name.to_owned(),
            source: io::Error::last_os_error(),
        }
    }
}
