// Process liveness helpers used to detect a vanished peer.

/// Pid of the calling process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether a process with `pid` exists. `0` is treated as "unknown" and
/// reported alive, so an unregistered peer is never declared lost.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid == current_pid() {
        return true;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means it exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}
