//! Error-stream interposition for the current process.
//!
//! [`Interposer::begin_capture`] points a descriptor (normally fd 2) at a pipe
//! whose reader forwards every byte to the original destination and then to a
//! bounded capture file. [`Capture::finish`] puts the original destination
//! back with `dup2`, so terminal and job-control state are exactly what they
//! were before the command ran.

use crate::error::{HookError, Result};
use crate::relay::{self, TailSink, TAIL_WINDOW};
use colored::*;
use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct Interposer {
    target: RawFd,
    drain_timeout: Duration,
}

impl Interposer {
    pub fn stderr() -> Self {
        Self::for_fd(libc::STDERR_FILENO)
    }

    pub fn for_fd(target: RawFd) -> Self {
        Self {
            target,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn target(&self) -> RawFd {
        self.target
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Start duplicating everything written to the target descriptor.
    ///
    /// On error nothing has been rewired and no temporary file is left behind.
    pub fn begin_capture(&self) -> Result<Capture> {
        let fd = self.target;
        let storage = tempfile::Builder::new()
            .prefix("ghostcoach-")
            .suffix(".stderr")
            .tempfile()
            .map_err(HookError::TempStorage)?;
        let mut sink = storage
            .reopen()
            .and_then(TailSink::from_file)
            .map_err(HookError::TempStorage)?;

        let saved = dup_cloexec(fd).map_err(|source| HookError::Duplicate { fd, source })?;
        let primary = File::from(dup_cloexec(fd).map_err(|source| HookError::Duplicate { fd, source })?);
        let (read_end, write_end) = pipe_cloexec().map_err(|source| HookError::Rewire { fd, source })?;

        // The relay is running before the first byte can reach the pipe.
        let (done_tx, done_rx) = mpsc::channel();
        let relay = thread::Builder::new()
            .name("ghostcoach-relay".to_string())
            .spawn(move || {
                let outcome = relay::relay(File::from(read_end), primary, Some(&mut sink));
                let _ = done_tx.send(outcome);
            })
            .map_err(|source| HookError::Rewire { fd, source })?;

        if let Err(source) = dup2_retry(write_end.as_raw_fd(), fd) {
            // Dropping the only write end lets the relay reach EOF and exit.
            drop(write_end);
            return Err(HookError::Rewire { fd, source });
        }
        drop(write_end);
        debug!(fd, path = %storage.path().display(), "capture started");

        Ok(Capture {
            target: fd,
            saved: Some(saved),
            storage: Some(storage),
            done: done_rx,
            relay: Some(relay),
            drain_timeout: self.drain_timeout,
        })
    }
}

/// A live interposition. Dropping it without calling [`Capture::finish`] still
/// restores the original destination and removes the capture file.
pub struct Capture {
    target: RawFd,
    saved: Option<OwnedFd>,
    storage: Option<NamedTempFile>,
    done: Receiver<io::Result<u64>>,
    relay: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Capture {
    pub fn path(&self) -> Option<&Path> {
        self.storage.as_ref().map(|s| s.path())
    }

    /// Restore the original destination, then return the captured tail and
    /// delete the capture file.
    ///
    /// The restore step runs first and unconditionally. If it fails the error
    /// is reported on the original destination before being returned.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.restore()?;
        self.drain();

        let Some(storage) = self.storage.take() else {
            return Ok(Vec::new());
        };
        let captured = relay::read_tail(storage.path(), TAIL_WINDOW).map_err(|source| HookError::ReadBack {
            path: storage.path().to_path_buf(),
            source,
        });
        if let Err(e) = storage.close() {
            warn!(error = %e, "could not remove capture file");
        }
        captured
    }

    /// Tear down without reading anything back.
    pub fn discard(mut self) -> Result<()> {
        self.restore()?;
        self.drain();
        if let Some(storage) = self.storage.take() {
            if let Err(e) = storage.close() {
                warn!(error = %e, "could not remove capture file");
            }
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        match dup2_retry(saved.as_raw_fd(), self.target) {
            Ok(()) => {
                debug!(fd = self.target, "error stream restored");
                Ok(())
            }
            Err(source) => {
                let err = HookError::Restore {
                    fd: self.target,
                    source,
                };
                error!(error = %err, "error stream left rewired");
                report_on(&saved, &format!("ghostcoach: {err}; this shell's stderr is no longer reliable"));
                Err(err)
            }
        }
    }

    fn drain(&mut self) {
        let Some(handle) = self.relay.take() else {
            return;
        };
        match self.done.recv_timeout(self.drain_timeout) {
            Ok(Ok(bytes)) => {
                debug!(bytes, "relay drained");
                let _ = handle.join();
            }
            Ok(Err(e)) => {
                warn!(error = %e, "relay stopped early");
                let _ = handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                // A background job still holds the pipe; it keeps forwarding
                // to the original destination on its own.
                debug!("relay still open after command, detaching");
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if self.saved.is_some() {
            let _ = self.restore();
            self.drain();
        }
    }
}

fn report_on(fd: &OwnedFd, message: &str) {
    // SAFETY: the descriptor is owned by `fd` and outlives this borrow; the
    // ManuallyDrop wrapper keeps it from being closed here.
    let mut out = ManuallyDrop::new(unsafe { File::from_raw_fd(fd.as_raw_fd()) });
    let _ = writeln!(out, "{}", message.red().bold());
}

fn dup_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

fn dup2_retry(src: RawFd, dst: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(src, dst) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, both descriptors are new and unowned.
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read_end)?;
    set_cloexec(&write_end)?;
    Ok((read_end, write_end))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    fn write_fd(fd: RawFd, bytes: &[u8]) {
        let mut out = ManuallyDrop::new(unsafe { File::from_raw_fd(fd) });
        out.write_all(bytes).unwrap();
    }

    #[test]
    fn captures_and_forwards_then_restores() {
        let terminal = tempfile::NamedTempFile::new().unwrap();
        let fd = terminal.as_file().as_raw_fd();
        let interposer = Interposer::for_fd(fd);

        let capture = interposer.begin_capture().unwrap();
        let path = capture.path().unwrap().to_path_buf();
        assert!(path.exists());
        write_fd(fd, b"during\n");
        let captured = capture.finish().unwrap();

        write_fd(fd, b"after\n");

        assert_eq!(captured, b"during\n");
        assert_eq!(std::fs::read(terminal.path()).unwrap(), b"during\nafter\n");
        assert!(!path.exists());
    }

    #[test]
    fn empty_command_captures_nothing() {
        let terminal = tempfile::NamedTempFile::new().unwrap();
        let capture = Interposer::for_fd(terminal.as_file().as_raw_fd()).begin_capture().unwrap();
        assert_eq!(capture.finish().unwrap(), Vec::<u8>::new());
        assert_eq!(std::fs::read(terminal.path()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn noisy_command_returns_bounded_tail() {
        let terminal = tempfile::NamedTempFile::new().unwrap();
        let fd = terminal.as_file().as_raw_fd();
        let capture = Interposer::for_fd(fd).begin_capture().unwrap();

        let line = b"0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcde\n";
        for _ in 0..10_000 {
            write_fd(fd, line);
        }
        let captured = capture.finish().unwrap();

        assert_eq!(captured.len(), TAIL_WINDOW);
        assert_eq!(std::fs::metadata(terminal.path()).unwrap().len(), 10_000 * line.len() as u64);
        assert!(captured.ends_with(line));
    }

    #[test]
    fn invalid_descriptor_fails_without_side_effects() {
        let err = Interposer::for_fd(-1).begin_capture().err().unwrap();
        assert!(matches!(err, HookError::Duplicate { fd: -1, .. }));
        assert!(!err.is_teardown());
    }

    #[test]
    fn drop_restores_original_destination() {
        let terminal = tempfile::NamedTempFile::new().unwrap();
        let fd = terminal.as_file().as_raw_fd();
        let capture = Interposer::for_fd(fd).begin_capture().unwrap();
        let path = capture.path().unwrap().to_path_buf();
        write_fd(fd, b"one\n");
        drop(capture);

        write_fd(fd, b"two\n");
        assert_eq!(std::fs::read(terminal.path()).unwrap(), b"one\ntwo\n");
        assert!(!path.exists());
    }

    #[test]
    fn lingering_writer_does_not_block_finish() {
        let terminal = tempfile::NamedTempFile::new().unwrap();
        let fd = terminal.as_file().as_raw_fd();
        let capture = Interposer::for_fd(fd)
            .with_drain_timeout(Duration::from_millis(50))
            .begin_capture()
            .unwrap();

        // Stands in for a backgrounded job that inherited the pipe.
        let background = dup_cloexec(fd).unwrap();
        let started = Instant::now();
        let _ = capture.finish().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(background);
    }
}
