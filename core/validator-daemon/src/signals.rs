//! SIGINT/SIGTERM handling.
//!
//! The signals are blocked before any thread is spawned, so every thread
//! inherits the mask and only the dedicated `sigwait` thread ever sees them.

use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub struct TerminationSignals {
    set: libc::sigset_t,
}

impl TerminationSignals {
    /// Must run on the main thread before any other thread starts.
    pub fn block() -> Result<Self, String> {
        let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGINT);
            libc::sigaddset(&mut set, libc::SIGTERM);
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(format!("Failed to block termination signals: errno {}", rc));
        }
        Ok(Self { set })
    }

    fn wait(&self) -> Result<i32, String> {
        let mut signal: libc::c_int = 0;
        let rc = unsafe { libc::sigwait(&self.set, &mut signal) };
        if rc != 0 {
            return Err(format!("sigwait failed: errno {}", rc));
        }
        Ok(signal)
    }

    /// Waits for a termination signal on a background thread, then raises
    /// `stop` and wakes the accept loop blocked on `listener_fd`.
    pub fn spawn_listener(self, stop: Arc<AtomicBool>, socket_path: PathBuf, listener_fd: RawFd) {
        thread::spawn(move || {
            match self.wait() {
                Ok(signal) => tracing::info!(signal, "Shutdown signal received"),
                Err(err) => {
                    tracing::error!(error = %err, "Signal listener failed");
                    return;
                }
            }
            stop.store(true, Ordering::SeqCst);
            wake_listener(&socket_path, listener_fd);
        });
    }
}

/// Wakes a thread blocked in `accept`. The normal path is a loopback connect;
/// if that fails the listening socket is shut down, which makes a pending
/// `accept` return an error on Linux. Returns whether either step worked.
fn wake_listener(socket_path: &Path, listener_fd: RawFd) -> bool {
    let err = match UnixStream::connect(socket_path) {
        Ok(_) => return true,
        Err(err) => err,
    };
    tracing::error!(
        error = %err,
        path = %socket_path.display(),
        "Failed to wake accept loop by connecting; shutting listener down"
    );

    let rc = unsafe { libc::shutdown(listener_fd, libc::SHUT_RDWR) };
    if rc != 0 {
        tracing::error!(
            error = %std::io::Error::last_os_error(),
            "Failed to shut down listener; daemon needs SIGKILL"
        );
        return false;
    }
    true
}
