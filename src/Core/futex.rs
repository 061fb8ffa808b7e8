use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Words handed to these helpers sit in a MAP_SHARED region seen by two
// processes, so FUTEX_PRIVATE_FLAG must not be set.

/// Park while `word` still reads `expected`, for at most `timeout`.
/// May return early or spuriously; the caller re-checks its condition.
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    if word.load(Ordering::Acquire) != expected {
        return;
    }
    sys::wait(word, expected, timeout);
}

/// Wake every thread parked on `word`, in any process.
pub fn futex_wake_all(word: &AtomicU32) {
    sys::wake(word, i32::MAX);
}

#[cfg(target_os = "linux")]
mod sys {
    use std::ptr;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    pub fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // ETIMEDOUT, EAGAIN and EINTR all just mean "look again".
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                &ts as *const libc::timespec,
                ptr::null::<u32>(),
                0u32,
            );
        }
    }

    pub fn wake(word: &AtomicU32, count: i32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAKE,
                count,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    pub fn wait(_word: &AtomicU32, _expected: u32, timeout: Duration) {
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
    }

    pub fn wake(_word: &AtomicU32, _count: i32) {}
}
