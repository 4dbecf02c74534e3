use std::ffi::CString;
use std::io;
use std::ptr;

use tracing::debug;

use crate::error::{Result, ShmError};

/// Named POSIX shared memory mapping.
///
/// Intentionally dumb: it holds no protocol knowledge. `create` sizes and
/// zero-fills a fresh object (removing a stale one with the same name
/// first); `open` maps an existing one. The mapping is released on drop;
/// the name is removed only by an explicit [`ShmRegion::unlink`], which the
/// creator side calls on teardown.
pub struct ShmRegion {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapping is shared across threads/processes by design; all
// cross-thread access goes through the atomic layout structs overlaid on it.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create a new shared memory object of `size` bytes and map it.
    ///
    /// An existing object with the same name is unlinked first: the single
    /// creator-side recovery for a stale object left by a crashed peer.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; unlink of a
        // missing name is harmless and its error is ignored deliberately.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is the descriptor just returned by shm_open.
        let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still open and unused after this point.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        let ptr = map_fd(fd, size)?;

        // SAFETY: ptr spans exactly `size` freshly-mapped writable bytes
        // with no other references yet.
        unsafe {
            ptr::write_bytes(ptr, 0, size);
        }

        debug!(name, size, "created shared memory region");
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Map an existing shared memory object of the agreed size.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        let ptr = map_fd(fd, size)?;
        debug!(name, size, "opened shared memory region");
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Remove the name from the system. Idempotent; the memory itself goes
    /// away once the last mapping is dropped.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink only
        // touches the namespace.
        let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from a successful mmap and are unmapped
        // exactly once here.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
    // SAFETY: fd is a live shared-memory descriptor; a null hint lets the
    // kernel pick the address; MAP_SHARED makes writes visible to peers.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    // SAFETY: the mapping (when it succeeded) holds its own reference to
    // the object, so the descriptor can be closed either way.
    unsafe { libc::close(fd) };
    if ptr == libc::MAP_FAILED {
        return Err(ShmError::Mmap(io::Error::last_os_error()));
    }
    Ok(ptr as *mut u8)
}

fn validate_name(name: &str) -> Result<()> {
    if !name.starts_with('/') || name.len() < 2 {
        return Err(ShmError::InvalidName(format!(
            "name must start with '/': {name}"
        )));
    }
    if name[1..].contains('/') {
        return Err(ShmError::InvalidName(format!(
            "name cannot contain '/' after the prefix: {name}"
        )));
    }
    if name.len() > 255 {
        return Err(ShmError::InvalidName(format!("name too long: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/agentlink_{tag}_{}_{nanos}", std::process::id())
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("/ok").is_ok());
        assert!(validate_name("no-slash").is_err());
        assert!(validate_name("/a/b").is_err());
        assert!(validate_name("/").is_err());
    }

    #[test]
    fn create_open_share_bytes() {
        let name = unique_name("region");
        let creator = ShmRegion::create(&name, 4096).unwrap();

        // SAFETY: the region is 4096 bytes; offsets 0..2 are in bounds.
        unsafe {
            *creator.as_ptr() = 0x42;
            *creator.as_ptr().add(1) = 0x43;
        }

        let joiner = ShmRegion::open(&name, 4096).unwrap();
        // SAFETY: same object, same bounds.
        unsafe {
            assert_eq!(*joiner.as_ptr(), 0x42);
            assert_eq!(*joiner.as_ptr().add(1), 0x43);
        }

        drop(joiner);
        drop(creator);
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_is_not_found() {
        let result = ShmRegion::open("/agentlink_missing_xyz", 4096);
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }

    #[test]
    fn create_replaces_stale_object() {
        let name = unique_name("stale");
        let first = ShmRegion::create(&name, 4096).unwrap();
        drop(first);
        // Name still linked; a new creator must recover.
        let second = ShmRegion::create(&name, 4096).unwrap();
        assert_eq!(second.size(), 4096);
        drop(second);
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = unique_name("unlink");
        let region = ShmRegion::create(&name, 4096).unwrap();
        drop(region);
        assert!(ShmRegion::unlink(&name).is_ok());
        assert!(ShmRegion::unlink(&name).is_ok());
    }
}
