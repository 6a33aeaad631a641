//! Cross-process named mutexes.
//!
//! Each mutex is a POSIX named semaphore with an initial count of one, so
//! unrelated processes can open it by name. The type parameter names the
//! piece of shared state the mutex protects. A [`LockGuard`] of that role is
//! the token every accessor of shared state asks for: the control-block
//! flags, the video slot copies and the audio ring. Accessors that own a
//! specific mutex also check that the guard was taken on that mutex (see
//! [`LockGuard::holds`]).

use crate::error::{Error, Result};
use crate::shm::os_name;
use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::{debug, error, warn};

/// Marker trait for the lock roles below.
pub trait LockRole {
    const LABEL: &'static str;
}

/// Guards the `active` flag and the initial visibility of the control block.
#[derive(Debug)]
pub enum Status {}

/// Guards the `last_buffer` flag.
#[derive(Debug)]
pub enum VideoSelect {}

/// Guards the contents of one video slot (front or back).
#[derive(Debug)]
pub enum VideoSlot {}

/// Guards the audio ring contents and its head.
#[derive(Debug)]
pub enum Audio {}

impl LockRole for Status {
    const LABEL: &'static str = "status";
}

impl LockRole for VideoSelect {
    const LABEL: &'static str = "video-selection";
}

impl LockRole for VideoSlot {
    const LABEL: &'static str = "video-slot";
}

impl LockRole for Audio {
    const LABEL: &'static str = "audio";
}

/// A named mutex shared between processes.
pub struct NamedMutex<R> {
    name: String,
    os_name: CString,
    sem: NonNull<libc::sem_t>,
    owns_cleanup: bool,
    _role: PhantomData<fn() -> R>,
}

// SAFETY: POSIX semaphores may be used concurrently from any thread.
unsafe impl<R> Send for NamedMutex<R> {}
unsafe impl<R> Sync for NamedMutex<R> {}

impl<R: LockRole> NamedMutex<R> {
    /// Opens the mutex called `name`, creating it unlocked if it does not
    /// exist.
    ///
    /// With `owns_cleanup` set, any existing object of that name is unlinked
    /// first (it can only be stale state from a previous run, possibly left
    /// locked) and the name is unlinked again when this handle is dropped.
    /// Only the side that owns the stream's lifetime sets it.
    pub fn get_or_create(name: &str, owns_cleanup: bool) -> Result<Self> {
        let os_name = os_name(name)?;
        if owns_cleanup {
            remove_stale(name, &os_name);
        }

        let sem = unsafe {
            libc::sem_open(
                os_name.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(Error::last_os("sem_open", name));
        }
        let sem = NonNull::new(sem).ok_or_else(|| Error::last_os("sem_open", name))?;

        debug!(name, role = R::LABEL, owns_cleanup, "opened named mutex");
        Ok(Self {
            name: name.to_owned(),
            os_name,
            sem,
            owns_cleanup,
            _role: PhantomData,
        })
    }

    /// Identity of the underlying OS object in this process.
    pub(crate) fn id(&self) -> LockId {
        LockId(self.sem)
    }

    /// Blocks until the mutex is acquired.
    ///
    /// # Panics
    ///
    /// Panics if `sem_wait` fails for a reason other than a signal, which
    /// only happens when the semaphore handle itself is invalid.
    pub fn lock(&self) -> LockGuard<'_, R> {
        loop {
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return LockGuard { mutex: self };
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                panic!("sem_wait failed on {:?}: {err}", self.name);
            }
        }
    }

    /// Acquires the mutex if it is free, without blocking.
    #[cfg(test)]
    pub fn try_lock(&self) -> Option<LockGuard<'_, R>> {
        loop {
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Some(LockGuard { mutex: self });
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return None;
            }
        }
    }

    fn unlock(&self) {
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == -1 {
            error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "sem_post failed"
            );
        }
    }
}

impl<R: LockRole> fmt::Debug for NamedMutex<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedMutex")
            .field("name", &self.name)
            .field("role", &R::LABEL)
            .field("owns_cleanup", &self.owns_cleanup)
            .finish()
    }
}

impl<R> Drop for NamedMutex<R> {
    /// Closes the local handle, then unlinks the name if this side owns it.
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem.as_ptr());
            if self.owns_cleanup {
                if libc::sem_unlink(self.os_name.as_ptr()) == -1 {
                    error!(
                        name = %self.name,
                        error = %std::io::Error::last_os_error(),
                        "sem_unlink failed"
                    );
                } else {
                    debug!(name = %self.name, "removed named mutex");
                }
            }
        }
    }
}

/// Identifies one open named mutex. Handles to the same OS object opened in
/// one process may compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LockId(NonNull<libc::sem_t>);

// SAFETY: only compared, never dereferenced.
unsafe impl Send for LockId {}
unsafe impl Sync for LockId {}

/// Proof that a [`NamedMutex`] of role `R` is held. Unlocks on drop.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct LockGuard<'a, R: LockRole> {
    mutex: &'a NamedMutex<R>,
}

impl<R: LockRole> LockGuard<'_, R> {
    /// `true` if this guard was taken on `mutex` (or on another handle to
    /// the same OS object).
    pub fn holds(&self, mutex: &NamedMutex<R>) -> bool {
        self.mutex.sem == mutex.sem
    }

    /// Identity of the mutex this guard holds.
    pub(crate) fn id(&self) -> LockId {
        LockId(self.mutex.sem)
    }
}

impl<R: LockRole> Drop for LockGuard<'_, R> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<R: LockRole> fmt::Debug for LockGuard<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.mutex.name)
            .finish()
    }
}

fn remove_stale(name: &str, os_name: &CString) {
    if unsafe { libc::sem_unlink(os_name.as_ptr()) } == 0 {
        debug!(name, "removed stale named mutex");
        return;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOENT) {
        warn!(name, error = %err, "could not remove stale named mutex");
    }
}
