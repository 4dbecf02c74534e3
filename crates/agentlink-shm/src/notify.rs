use std::ffi::CString;
use std::io;
use std::time::Duration;

use crate::error::{Result, ShmError};
use crate::ring::RingNotify;

/// Named POSIX semaphore used for producer-to-consumer wake-up.
///
/// Same creator/joiner asymmetry as the region: the creator unlinks a stale
/// name and creates the semaphore exclusively; joiners open the existing
/// one. Like [`crate::ShmRegion`], this type holds no protocol knowledge.
pub struct ShmNotify {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: sem_post/sem_wait on a POSIX semaphore are thread-safe by
// definition; the raw pointer is only handed to those calls.
unsafe impl Send for ShmNotify {}
unsafe impl Sync for ShmNotify {}

impl ShmNotify {
    /// Create a fresh named semaphore with an initial count of zero,
    /// removing a stale one first.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
        // SAFETY: c_name is a valid NUL-terminated string; unlinking a
        // missing name is harmless.
        let sem = unsafe {
            libc::sem_unlink(c_name.as_ptr());
            libc::sem_open(c_name.as_ptr(), libc::O_CREAT | libc::O_EXCL, 0o600, 0)
        };
        if sem == libc::SEM_FAILED {
            return Err(ShmError::Semaphore(io::Error::last_os_error()));
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Open an existing named semaphore.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::Semaphore(err));
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Remove the name from the system. Idempotent.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let rc = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::Semaphore(err));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sem_post(&self) {
        // SAFETY: self.sem came from a successful sem_open.
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    fn sem_wait_forever(&self) -> bool {
        loop {
            // SAFETY: self.sem came from a successful sem_open.
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                return true;
            }
            if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                return false;
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn sem_wait_timeout(&self, timeout: Duration) -> bool {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: now is a valid out-pointer for clock_gettime.
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
        }
        let mut abs_nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let mut abs_sec = now.tv_sec + timeout.as_secs() as libc::time_t;
        if abs_nsec >= 1_000_000_000 {
            abs_sec += 1;
            abs_nsec -= 1_000_000_000;
        }
        let deadline = libc::timespec {
            tv_sec: abs_sec,
            tv_nsec: abs_nsec,
        };
        loop {
            // SAFETY: self.sem is valid and deadline is a valid timespec.
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return true;
            }
            match io::Error::last_os_error().kind() {
                io::ErrorKind::Interrupted => continue,
                _ => return false,
            }
        }
    }

    // sem_timedwait is not portable beyond Linux; poll with sem_trywait.
    #[cfg(not(target_os = "linux"))]
    fn sem_wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            // SAFETY: self.sem came from a successful sem_open.
            let rc = unsafe { libc::sem_trywait(self.sem) };
            if rc == 0 {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl RingNotify for ShmNotify {
    fn post(&self) {
        self.sem_post();
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => self.sem_wait_forever(),
            Some(t) => self.sem_wait_timeout(t),
        }
    }
}

impl Drop for ShmNotify {
    fn drop(&mut self) {
        // SAFETY: self.sem came from a successful sem_open and is closed
        // exactly once. The name is removed separately via unlink().
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn unique_name(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/agentlink_{tag}_{}_{nanos}", std::process::id())
    }

    #[test]
    fn post_then_wait_succeeds() {
        let name = unique_name("sem");
        let sem = ShmNotify::create(&name).unwrap();
        sem.post();
        assert!(sem.wait(Some(Duration::from_millis(100))));
        drop(sem);
        ShmNotify::unlink(&name).unwrap();
    }

    #[test]
    fn wait_times_out_when_unposted() {
        let name = unique_name("sem_to");
        let sem = ShmNotify::create(&name).unwrap();
        let start = std::time::Instant::now();
        assert!(!sem.wait(Some(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(25));
        drop(sem);
        ShmNotify::unlink(&name).unwrap();
    }

    #[test]
    fn creator_and_joiner_share_counter() {
        let name = unique_name("sem_pair");
        let creator = Arc::new(ShmNotify::create(&name).unwrap());
        let joiner = ShmNotify::open(&name).unwrap();

        let poster = {
            let creator = Arc::clone(&creator);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                creator.post();
            })
        };

        assert!(joiner.wait(Some(Duration::from_secs(2))));
        poster.join().unwrap();
        drop(joiner);
        drop(creator);
        ShmNotify::unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_is_not_found() {
        let result = ShmNotify::open("/agentlink_missing_sem");
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }
}
