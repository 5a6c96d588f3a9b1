//! Terminating a simulation together with every worker it forked.
//!
//! Children are spawned as leaders of their own process group (POSIX) or
//! process group (Windows), so the whole tree can be signalled at once.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TreeSignal {
    /// Polite request: SIGTERM on POSIX.
    Terminate,
    /// SIGKILL on POSIX.
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Signalled,
    /// Nothing left to signal; the group had already exited.
    AlreadyExited,
}

/// Mark a command so the child becomes the root of a signalable group.
pub(crate) fn isolate_group(cmd: &mut std::process::Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Signal the process group led by `pid`.
#[cfg(unix)]
pub(crate) async fn signal_tree(pid: u32, signal: TreeSignal) -> io::Result<Delivery> {
    let sig = match signal {
        TreeSignal::Terminate => libc::SIGTERM,
        TreeSignal::Kill => libc::SIGKILL,
    };
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: killpg only reads its integer arguments.
    let rc = unsafe { libc::killpg(pgid, sig) };
    if rc == 0 {
        return Ok(Delivery::Signalled);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(Delivery::AlreadyExited)
    } else {
        Err(err)
    }
}

/// Terminate the process tree rooted at `pid`.
///
/// Windows has no graceful group signal for console-less children, so both
/// variants force the tree down with `taskkill /T /F`.
#[cfg(windows)]
pub(crate) async fn signal_tree(pid: u32, _signal: TreeSignal) -> io::Result<Delivery> {
    let status = tokio::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    // taskkill exits with 128 when the process no longer exists.
    match status.code() {
        Some(0) => Ok(Delivery::Signalled),
        Some(128) => Ok(Delivery::AlreadyExited),
        _ => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill failed with {}", status),
        )),
    }
}
