// Shared memory backend tests for Linux
// Run with: cargo test --test shared_memory -- --nocapture

#[cfg(target_os = "linux")]
mod linux_tests {
    use dmxp_simbridge::Core::SharedMemory::shm_path;
    use dmxp_simbridge::Core::{
        attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle,
    };
    use serial_test::serial;
    use std::io;

    fn name(tag: &str) -> String {
        format!("simbridge_shm_{}_{}", tag, std::process::id())
    }

    #[test]
    #[serial]
    fn test_create_shared_memory() -> io::Result<()> {
        let name = name("create");
        let size = 4096;
        let shm = create_shared_memory(size, &name)?;

        assert_eq!(shm.size(), size);
        assert!(!shm.as_ptr().is_null());
        assert_eq!(shm.name(), name);
        assert!(shm_path(&name).exists());

        // Fresh regions are zero-filled.
        unsafe {
            let slice = std::slice::from_raw_parts(shm.as_ptr(), size);
            assert!(slice.iter().all(|&b| b == 0));
        }

        drop(shm);
        unlink_shared_memory(&name)?;
        assert!(!shm_path(&name).exists());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_create_is_exclusive() -> io::Result<()> {
        let name = name("exclusive");
        let _shm = create_shared_memory(4096, &name)?;

        let err = create_shared_memory(4096, &name).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        unlink_shared_memory(&name)
    }

    #[test]
    #[serial]
    fn test_attach_sees_writes() -> io::Result<()> {
        let name = name("attach");
        let size = 8192;
        let creator = create_shared_memory(size, &name)?;
        let attacher = attach_shared_memory(&name, 1024)?;

        assert_eq!(attacher.size(), size);
        assert_ne!(creator.as_ptr(), attacher.as_ptr());

        unsafe {
            let src = std::slice::from_raw_parts_mut(creator.as_ptr(), size);
            for (i, b) in src.iter_mut().take(100).enumerate() {
                *b = (i % 256) as u8;
            }
            let dst = std::slice::from_raw_parts(attacher.as_ptr(), size);
            for (i, b) in dst.iter().take(100).enumerate() {
                assert_eq!(*b, (i % 256) as u8);
            }
        }

        unlink_shared_memory(&name)
    }

    #[test]
    #[serial]
    fn test_attach_missing_and_truncated() -> io::Result<()> {
        let name = name("missing");
        let err = attach_shared_memory(&name, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let _shm = create_shared_memory(4096, &name)?;
        let err = attach_shared_memory(&name, 8192).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        unlink_shared_memory(&name)
    }

    #[test]
    #[serial]
    fn test_invalid_arguments() {
        assert!(create_shared_memory(0, &name("zero")).is_err());
        assert!(create_shared_memory(4096, "a/b").is_err());
        assert!(create_shared_memory(4096, "").is_err());
        // Unlinking what is not there is not an error.
        assert!(unlink_shared_memory(&name("never_created")).is_ok());
    }

    #[test]
    #[serial]
    fn test_raw_handle() -> io::Result<()> {
        let name = name("handle");
        let shm = create_shared_memory(4096, &name)?;

        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd > 0, "File descriptor should be positive"),
        }

        unlink_shared_memory(&name)
    }
}
