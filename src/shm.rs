//! POSIX shared-memory segments.
//!
//! A [`SharedMemory`] is either *created* (the producer side, which owns the
//! segment and unlinks it on drop) or *attached* (the consumer side, which
//! waits for the segment to appear and only ever unmaps it).

use crate::error::{Error, Result};
use std::ffi::CString;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Default delay between two attach attempts.
pub const ATTACH_BACKOFF: Duration = Duration::from_secs(1);

/// How a segment is mapped into this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn open_flags(self) -> libc::c_int {
        match self {
            Access::ReadOnly => libc::O_RDONLY,
            Access::ReadWrite => libc::O_RDWR,
        }
    }

    fn prot(self) -> libc::c_int {
        match self {
            Access::ReadOnly => libc::PROT_READ,
            Access::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Longest POSIX IPC name the platform accepts, leading `/` included.
/// Darwin caps both `shm_open` and `sem_open` names at `PSHMNAMLEN` (31).
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) const MAX_OS_NAME: usize = 31;
/// Linux allows `NAME_MAX` (255) bytes; glibc spends four of them on the
/// `sem.` prefix of named semaphores.
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub(crate) const MAX_OS_NAME: usize = 251;

/// Turns a stream object name into a POSIX IPC name (leading `/`).
///
/// Names longer than the platform allows are shortened to a readable head
/// plus `~` and a 64-bit hash of the whole name, so producer and consumer
/// still agree on the result.
pub(crate) fn os_name(name: &str) -> Result<CString> {
    os_name_within(name, MAX_OS_NAME)
}

fn os_name_within(name: &str, max: usize) -> Result<CString> {
    let invalid = || Error::InvalidName {
        name: name.to_owned(),
    };
    if name.contains('\0') {
        return Err(invalid());
    }

    let bare = name.strip_prefix('/').unwrap_or(name);
    let full = if bare.len() < max {
        format!("/{bare}")
    } else {
        // '/' + head + '~' + 16 hex digits
        let keep = max.checked_sub(18).ok_or_else(invalid)?;
        let cut = bare
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= keep)
            .last()
            .unwrap_or(0);
        format!("/{}~{:016x}", &bare[..cut], fnv1a(bare.as_bytes()))
    };
    CString::new(full).map_err(|_| invalid())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// A mapped POSIX shared-memory segment.
///
/// The mapping is released before the name is unlinked, so no handle in this
/// process outlives the segment it points into.
///
/// Contents are only reachable through `unsafe` copies whose callers hold
/// the named mutex guarding the segment, or through `&mut self` before the
/// segment is published.
#[derive(Debug)]
pub(crate) struct SharedMemory {
    name: String,
    os_name: CString,
    ptr: NonNull<u8>,
    len: usize,
    access: Access,
    owned: bool,
}

// SAFETY: the mapping stays valid for the lifetime of the value. Shared
// access to the bytes goes through the unsafe copy helpers, whose contract
// requires the guarding mutex to be held.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Creates a new read-write segment of `len` bytes and takes ownership of
    /// its name.
    ///
    /// A segment left behind by a crashed run is unlinked first. If the name
    /// is still taken after that (another live producer raced us), this
    /// fails with [`Error::AlreadyExists`].
    pub(crate) fn create(name: &str, len: usize) -> Result<Self> {
        let os_name = os_name(name)?;
        remove_stale(name, &os_name);

        let fd = unsafe {
            libc::shm_open(
                os_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            )
        };
        if fd == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(Error::AlreadyExists {
                    name: name.to_owned(),
                });
            }
            return Err(Error::Os {
                op: "shm_open",
                name: name.to_owned(),
                source: err,
            });
        }

        let mapped = unsafe {
            if libc::ftruncate(fd, len as libc::off_t) == -1 {
                Err(Error::last_os("ftruncate", name))
            } else {
                map(fd, len, Access::ReadWrite, name)
            }
        };
        unsafe {
            libc::close(fd); // mapping stays valid
        }

        match mapped {
            Ok(ptr) => {
                debug!(name, len, "created shared memory segment");
                Ok(Self {
                    name: name.to_owned(),
                    os_name,
                    ptr,
                    len,
                    access: Access::ReadWrite,
                    owned: true,
                })
            }
            Err(err) => {
                unsafe {
                    libc::shm_unlink(os_name.as_ptr());
                }
                Err(err)
            }
        }
    }

    /// Waits until a segment called `name` exists, then maps it.
    ///
    /// Missing segments are retried every `backoff`. A segment that exists
    /// but has not been sized yet counts as missing. With `timeout` set to
    /// `None` this only returns once the segment shows up or a real OS error
    /// occurs.
    pub(crate) fn open_existing(
        name: &str,
        access: Access,
        backoff: Duration,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let os_name = os_name(name)?;
        let started = Instant::now();

        loop {
            let fd = unsafe { libc::shm_open(os_name.as_ptr(), access.open_flags(), 0) };
            if fd == -1 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(Error::Os {
                        op: "shm_open",
                        name: name.to_owned(),
                        source: err,
                    });
                }
            } else {
                let len = unsafe { segment_len(fd, name) };
                let mapped = match len {
                    Ok(0) => None,
                    Ok(len) => Some(unsafe { map(fd, len, access, name) }.map(|ptr| (ptr, len))),
                    Err(err) => Some(Err(err)),
                };
                unsafe {
                    libc::close(fd);
                }

                if let Some(mapped) = mapped {
                    let (ptr, len) = mapped?;
                    debug!(name, len, ?access, "attached to shared memory segment");
                    return Ok(Self {
                        name: name.to_owned(),
                        os_name,
                        ptr,
                        len,
                        access,
                        owned: false,
                    });
                }
            }

            let waited = started.elapsed();
            if let Some(timeout) = timeout {
                if waited >= timeout {
                    return Err(Error::AttachTimedOut {
                        name: name.to_owned(),
                        waited,
                    });
                }
            }
            trace!(name, ?waited, "shared memory segment not there yet");
            std::thread::sleep(backoff);
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Start of the mapping.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Sets every byte of the segment to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the segment is mapped read-only.
    pub(crate) fn fill(&mut self, value: u8) {
        assert!(self.access == Access::ReadWrite, "segment is read-only");
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), value, self.len) }
    }

    /// Copies `min(src.len(), self.len())` bytes from `src` to the start of
    /// the segment and returns the number of bytes copied.
    ///
    /// # Safety
    ///
    /// No one else in this process may read or write the segment during the
    /// call: the caller holds the mutex that guards it.
    ///
    /// # Panics
    ///
    /// Panics if the segment is mapped read-only.
    pub(crate) unsafe fn copy_from(&self, src: &[u8]) -> usize {
        assert!(self.access == Access::ReadWrite, "segment is read-only");
        let n = src.len().min(self.len);
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), n) }
        n
    }

    /// Copies `min(dst.len(), self.len())` bytes from the start of the
    /// segment into `dst` and returns the number of bytes copied.
    ///
    /// # Safety
    ///
    /// No one may write the segment during the call: the caller holds the
    /// mutex that guards it.
    pub(crate) unsafe fn copy_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst.as_mut_ptr(), n) }
        n
    }
}

impl Drop for SharedMemory {
    /// Unmaps the segment, then unlinks its name if this handle owns it.
    fn drop(&mut self) {
        unsafe {
            if libc::munmap(self.ptr.as_ptr().cast(), self.len) == -1 {
                error!(
                    name = %self.name,
                    error = %std::io::Error::last_os_error(),
                    "munmap failed"
                );
            }
            if self.owned {
                if libc::shm_unlink(self.os_name.as_ptr()) == -1 {
                    error!(
                        name = %self.name,
                        error = %std::io::Error::last_os_error(),
                        "shm_unlink failed"
                    );
                } else {
                    debug!(name = %self.name, "removed shared memory segment");
                }
            }
        }
    }
}

/// Unlinks a segment left over from an earlier run, if there is one.
fn remove_stale(name: &str, os_name: &CString) {
    if unsafe { libc::shm_unlink(os_name.as_ptr()) } == 0 {
        debug!(name, "removed stale shared memory segment");
        return;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOENT) {
        warn!(name, error = %err, "could not remove stale shared memory segment");
    }
}

unsafe fn segment_len(fd: libc::c_int, name: &str) -> Result<usize> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } == -1 {
        return Err(Error::last_os("fstat", name));
    }
    Ok(stat.st_size.max(0) as usize)
}

unsafe fn map(fd: libc::c_int, len: usize, access: Access, name: &str) -> Result<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            access.prot(),
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(Error::last_os("mmap", name));
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| Error::last_os("mmap", name))
}
