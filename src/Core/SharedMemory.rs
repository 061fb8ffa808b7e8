// Named shared memory regions: a file under /dev/shm mapped MAP_SHARED, so a
// second process can open the same bytes knowing only the name.

use std::fmt::Debug;
use std::io;
use std::path::PathBuf;

/// A mapped region, whichever way it was obtained.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Base address of the mapping
    fn as_ptr(&self) -> *mut u8;

    /// Mapped length in bytes
    fn size(&self) -> usize;

    fn raw_handle(&self) -> RawHandle;

    /// Name the region was created or attached under
    fn name(&self) -> &str;
}

/// OS handle backing a mapping.
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    Fd(i32),
}

/// Path of the backing file for a named region.
pub fn shm_path(name: &str) -> PathBuf {
    PathBuf::from("/dev/shm").join(name)
}

fn check_name(name: &str) -> io::Result<()> {
    let bad = name.is_empty() || name.chars().any(|c| c == '/' || c == '\0');
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{name:?} is not usable as a shared memory name"),
        ));
    }
    Ok(())
}

/// Create the region `name` with `size` zeroed bytes.
///
/// Fails with `AlreadyExists` when the name is taken.
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    check_name(name)?;
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxSharedMemory::create(size, name)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = size;
        Err(unsupported())
    }
}

/// Map an existing region. The whole backing file is mapped; anything
/// shorter than `min_size` is rejected as truncated or foreign.
pub fn attach_shared_memory(name: &str, min_size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    check_name(name)?;
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxSharedMemory::attach(name, min_size)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = min_size;
        Err(unsupported())
    }
}

/// Remove the name. Live mappings are unaffected; a missing name is not an error.
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    check_name(name)?;
    if cfg!(not(target_os = "linux")) {
        return Err(unsupported());
    }
    std::fs::remove_file(shm_path(name)).or_else(|e| match e.kind() {
        io::ErrorKind::NotFound => Ok(()),
        _ => Err(e),
    })
}

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "named shared memory needs Linux /dev/shm")
}

#[cfg(target_os = "linux")]
pub use linux::LinuxSharedMemory;

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::{IntoRawFd, RawFd};
    use std::os::unix::fs::OpenOptionsExt;
    use std::ptr::{self, NonNull};

    use super::{shm_path, RawHandle, SharedMemoryBackend};

    #[derive(Debug)]
    pub struct LinuxSharedMemory {
        base: NonNull<u8>,
        len: usize,
        fd: RawFd,
        name: String,
    }

    // The mapping is plain shared bytes; synchronisation is the caller's job.
    unsafe impl Send for LinuxSharedMemory {}
    unsafe impl Sync for LinuxSharedMemory {}

    impl LinuxSharedMemory {
        pub fn create(size: usize, name: &str) -> io::Result<Self> {
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot create an empty shared memory region",
                ));
            }
            let path = shm_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;

            let mapped = file.set_len(size as u64).and_then(|()| Self::map_file(file, size, name));
            if mapped.is_err() {
                let _ = std::fs::remove_file(&path);
            }
            mapped
        }

        pub fn attach(name: &str, min_size: usize) -> io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(shm_path(name))?;
            let len = file.metadata()?.len() as usize;
            if len == 0 || len < min_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("region {name} holds {len} bytes, need at least {min_size}"),
                ));
            }
            Self::map_file(file, len, name)
        }

        /// Takes ownership of `file`; its descriptor lives as long as the mapping.
        fn map_file(file: File, len: usize, name: &str) -> io::Result<Self> {
            let fd = file.into_raw_fd();
            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            let base = if addr == libc::MAP_FAILED {
                None
            } else {
                NonNull::new(addr.cast::<u8>())
            };
            match base {
                Some(base) => Ok(Self {
                    base,
                    len,
                    fd,
                    name: name.to_owned(),
                }),
                None => {
                    let err = io::Error::last_os_error();
                    unsafe { libc::close(fd) };
                    Err(err)
                }
            }
        }
    }

    impl Drop for LinuxSharedMemory {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base.as_ptr().cast(), self.len);
                libc::close(self.fd);
            }
        }
    }

    impl SharedMemoryBackend for LinuxSharedMemory {
        fn as_ptr(&self) -> *mut u8 {
            self.base.as_ptr()
        }

        fn size(&self) -> usize {
            self.len
        }

        fn raw_handle(&self) -> RawHandle {
            RawHandle::Fd(self.fd)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
