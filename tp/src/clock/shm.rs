//! POSIX shared memory segments
//!
//! A segment is mapped as a single `T` and released when the handle drops.
//! The mode marker decides what drop does:
//!
//! - [`Creator`]: unmaps and unlinks the name (the controller)
//! - [`Opener`]: unmaps only (workers)
//!
//! Creation uses `O_EXCL`, so a leftover segment with the same name is
//! reported as a conflict instead of being silently reused.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::ptr::{NonNull, null_mut};

use rustix::fs::{Mode, fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use rustix::shm;
use thiserror::Error;
use tracing::debug;

/// Errors from shared memory setup
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("Invalid shared memory name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{op} failed for `{name}`: {source}")]
    Posix {
        op: &'static str,
        name: String,
        #[source]
        source: Errno,
    },

    #[error("Shared memory `{name}` has {actual} bytes, expected {expected}")]
    SizeMismatch { name: String, expected: usize, actual: i64 },
}

impl ShmError {
    fn posix(op: &'static str, name: &str, source: Errno) -> Self {
        Self::Posix {
            op,
            name: name.to_string(),
            source,
        }
    }

    /// Whether creation failed because the name is already taken
    pub fn is_conflict(&self) -> bool {
        matches!(self, ShmError::Posix { source, .. } if *source == Errno::EXIST)
    }
}

/// Types that can live in memory mapped by several processes
///
/// # Safety
///
/// Implementers must be `#[repr(C)]`, contain no pointers, be valid when
/// their destructor never runs, and only use atomics for interior mutation.
pub unsafe trait SharedMemorySafe: Send + Sync {}

/// Drop behavior of a segment handle
pub trait ShmMode {
    const SHOULD_UNLINK: bool;
}

/// Handle created the segment; dropping it unlinks the name
pub struct Creator;

impl ShmMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// Handle attached to an existing segment; dropping it only unmaps
pub struct Opener;

impl ShmMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// Mapped shared memory holding one `T`
pub struct Shm<T: SharedMemorySafe, M: ShmMode> {
    ptr: NonNull<T>,
    name: String,
    _mode: PhantomData<M>,
}

// SAFETY: T is Send + Sync and the mapping is not tied to the creating thread.
unsafe impl<T: SharedMemorySafe, M: ShmMode> Send for Shm<T, M> {}
// SAFETY: shared access only goes through &T, which is Sync.
unsafe impl<T: SharedMemorySafe, M: ShmMode> Sync for Shm<T, M> {}

const NAME_MAX: usize = 255;

fn validate_name(name: &str) -> Result<(), ShmError> {
    let reason = if !name.starts_with('/') {
        "name must start with '/'"
    } else if name[1..].contains('/') {
        "name must not contain another '/'"
    } else if name.len() > NAME_MAX {
        "name must be at most 255 bytes"
    } else if name.len() == 1 {
        "name must not be empty"
    } else {
        return Ok(());
    };

    Err(ShmError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Map `size_of::<T>()` bytes of `fd`, unlinking `name` on failure when asked to
fn map<T>(fd: &rustix::fd::OwnedFd, name: &str, unlink_on_error: bool) -> Result<NonNull<T>, ShmError> {
    // SAFETY: a fresh shared mapping of an fd sized for T; it aliases no Rust
    // object and mmap returns page-aligned memory, enough for any T.
    let mapped = unsafe {
        mmap(
            null_mut(),
            size_of::<T>(),
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
    };

    match mapped {
        Ok(ptr) => NonNull::new(ptr.cast::<T>()).ok_or_else(|| ShmError::posix("mmap", name, Errno::INVAL)),
        Err(err) => {
            if unlink_on_error {
                let _ = shm::unlink(name);
            }
            Err(ShmError::posix("mmap", name, err))
        }
    }
}

impl<T: SharedMemorySafe + Default> Shm<T, Creator> {
    /// Create and map a new segment initialized with `T::default()`
    pub fn create(name: &str) -> Result<Self, ShmError> {
        debug!(%name, "Shm::create: called");
        validate_name(name)?;

        let fd = shm::open(
            name,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|err| ShmError::posix("shm_open", name, err))?;

        if let Err(err) = ftruncate(&fd, size_of::<T>() as u64) {
            drop(fd);
            let _ = shm::unlink(name);
            return Err(ShmError::posix("ftruncate", name, err));
        }

        let ptr = map::<T>(&fd, name, true)?;

        // SAFETY: ptr is a valid, exclusively owned mapping of size_of::<T>() bytes.
        unsafe { std::ptr::write(ptr.as_ptr(), T::default()) };

        debug!(%name, bytes = size_of::<T>(), "Shm::create: segment mapped");
        Ok(Self {
            ptr,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe> Shm<T, Opener> {
    /// Attach to a segment created by another process
    pub fn open(name: &str) -> Result<Self, ShmError> {
        debug!(%name, "Shm::open: called");
        validate_name(name)?;

        let fd = shm::open(name, shm::OFlags::RDWR, Mode::empty())
            .map_err(|err| ShmError::posix("shm_open", name, err))?;

        let stat = fstat(&fd).map_err(|err| ShmError::posix("fstat", name, err))?;
        let actual = i64::try_from(stat.st_size).unwrap_or(-1);
        if actual != size_of::<T>() as i64 {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected: size_of::<T>(),
                actual,
            });
        }

        let ptr = map::<T>(&fd, name, false)?;
        Ok(Self {
            ptr,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe, M: ShmMode> Shm<T, M> {
    /// Name the segment was created or opened under
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: SharedMemorySafe, M: ShmMode> Drop for Shm<T, M> {
    fn drop(&mut self) {
        // SAFETY: ptr came from mmap with exactly this length and is unmapped once.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), size_of::<T>());
        }

        if M::SHOULD_UNLINK {
            debug!(name = %self.name, "Shm::drop: unlinking segment");
            let _ = shm::unlink(&self.name);
        }
    }
}

impl<T: SharedMemorySafe, M: ShmMode> Deref for Shm<T, M> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mapping lives as long as self and holds an initialized T.
        unsafe { self.ptr.as_ref() }
    }
}
