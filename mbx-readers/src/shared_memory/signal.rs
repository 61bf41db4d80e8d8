//! Named cross-process binary signals
//!
//! A signal is a system-wide object created by the producer and opened (never
//! created) by the consumer. Each direction has exactly one raiser and one
//! waiter; a waiter blocks until the signal is raised and clears it on wakeup.
//! Waits have no timeout: a producer that never answers is a fatal producer
//! failure, not a state the consumer recovers from.
//!
//! The POSIX backend keeps a semaphore binary by reading its value before
//! posting. Only Linux exposes that value (`sem_getvalue` is unavailable on
//! macOS), so elsewhere a second raise before the matching wait is counted
//! and wakes one extra wait.

use crate::error::Result;

/// A binary signal shared with another process
#[cfg_attr(test, mockall::automock)]
pub trait CrossProcessSignal: Send {
    /// Raise the signal
    fn set_signal(&self) -> Result<()>;

    /// Block until the signal is raised, then clear it
    fn wait_for_signal(&self) -> Result<()>;
}

/// Opens existing signals by name
pub trait SignalOpener {
    /// Open the signal `name`; fails if nobody created it
    fn open(&self, name: &str) -> Result<Box<dyn CrossProcessSignal>>;
}

#[cfg(unix)]
pub use posix::{NamedSemaphore, NamedSemaphoreOpener};

#[cfg(unix)]
#[allow(unsafe_code)]
mod posix {
    use std::ffi::CString;
    use std::io;
    use std::ptr::NonNull;

    use super::{CrossProcessSignal, SignalOpener};
    use crate::error::{Error, Result};

    /// Binary signal backed by a POSIX named semaphore
    pub struct NamedSemaphore {
        name: String,
        sem: NonNull<libc::sem_t>,
        owner: bool,
    }

    // Safety: named semaphores are process-shared objects designed for
    // concurrent use; the handle itself carries no thread affinity
    unsafe impl Send for NamedSemaphore {}

    impl NamedSemaphore {
        /// Open an existing semaphore
        pub fn open(name: &str) -> Result<Self> {
            let os_name = os_name(name)?;
            // Safety: `os_name` is a valid NUL-terminated string
            let sem = unsafe { libc::sem_open(os_name.as_ptr(), 0) };

            Self::from_raw(name, sem, false).map_err(|source| Error::SignalUnavailable {
                name: name.to_string(),
                source,
            })
        }

        /// Create a semaphore in the lowered state, replacing any stale one.
        ///
        /// The creating handle unlinks the name when dropped.
        pub fn create(name: &str) -> Result<Self> {
            let os_name = os_name(name)?;
            // Safety: `os_name` is a valid NUL-terminated string; a missing
            // name is not an error here
            unsafe { libc::sem_unlink(os_name.as_ptr()) };

            let mode: libc::c_uint = 0o600;
            let initial: libc::c_uint = 0;
            // Safety: O_CREAT takes the mode and initial value as varargs
            let sem = unsafe { libc::sem_open(os_name.as_ptr(), libc::O_CREAT, mode, initial) };

            Self::from_raw(name, sem, true).map_err(|source| Error::SignalFailed {
                name: name.to_string(),
                operation: "Create",
                source,
            })
        }

        fn from_raw(name: &str, sem: *mut libc::sem_t, owner: bool) -> io::Result<Self> {
            if sem == libc::SEM_FAILED {
                return Err(io::Error::last_os_error());
            }
            let sem = NonNull::new(sem).ok_or_else(io::Error::last_os_error)?;

            Ok(Self {
                name: name.to_string(),
                sem,
                owner,
            })
        }

        fn failed(&self, operation: &'static str) -> Error {
            Error::SignalFailed {
                name: self.name.clone(),
                operation,
                source: io::Error::last_os_error(),
            }
        }

        #[cfg(target_os = "linux")]
        fn is_raised(&self) -> Result<bool> {
            let mut value: libc::c_int = 0;
            // Safety: `sem` is a valid open semaphore
            if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } != 0 {
                return Err(self.failed("GetValue"));
            }
            Ok(value > 0)
        }

        #[cfg(not(target_os = "linux"))]
        fn is_raised(&self) -> Result<bool> {
            Ok(false)
        }
    }

    impl CrossProcessSignal for NamedSemaphore {
        fn set_signal(&self) -> Result<()> {
            // Keep the semaphore binary: a second raise before the wait is a no-op
            if self.is_raised()? {
                return Ok(());
            }

            // Safety: `sem` is a valid open semaphore
            if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
                return Err(self.failed("SetSignal"));
            }
            Ok(())
        }

        fn wait_for_signal(&self) -> Result<()> {
            loop {
                // Safety: `sem` is a valid open semaphore
                if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                    return Ok(());
                }
                if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                    return Err(self.failed("WaitForSignal"));
                }
            }
        }
    }

    impl Drop for NamedSemaphore {
        fn drop(&mut self) {
            // Safety: `sem` was returned by sem_open and is closed once
            unsafe { libc::sem_close(self.sem.as_ptr()) };

            if self.owner {
                if let Ok(os_name) = os_name(&self.name) {
                    // Safety: valid NUL-terminated string
                    unsafe { libc::sem_unlink(os_name.as_ptr()) };
                }
            }
        }
    }

    /// Opens signals as POSIX named semaphores
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NamedSemaphoreOpener;

    impl SignalOpener for NamedSemaphoreOpener {
        fn open(&self, name: &str) -> Result<Box<dyn CrossProcessSignal>> {
            Ok(Box::new(NamedSemaphore::open(name)?))
        }
    }

    fn os_name(name: &str) -> Result<CString> {
        let prefixed = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        };
        CString::new(prefixed)
            .map_err(|_| Error::InvalidOptions(format!("Signal name [{name}] contains a NUL byte")))
    }

}
