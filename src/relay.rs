use crate::payload::MAX_ERROR_TAIL_BYTES;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Raw bytes kept on disk and read back. Lossy decoding never shrinks a byte
/// sequence and resynchronizes within three bytes, so decoding this window and
/// keeping its last `MAX_ERROR_TAIL_BYTES` matches decoding the whole stream.
pub const TAIL_WINDOW: usize = MAX_ERROR_TAIL_BYTES + 4;

/// Capture files larger than this are compacted down to `TAIL_WINDOW`.
pub const COMPACT_THRESHOLD: u64 = 4 * MAX_ERROR_TAIL_BYTES as u64;

const CHUNK: usize = 8192;
const SEAL_POLL: Duration = Duration::from_millis(5);

/// Owner write bit. A capture file without it has been sealed by its relay.
const OWNER_WRITE: u32 = 0o200;
const SEALED_MODE: u32 = 0o400;

/// Capture file that never grows much beyond `COMPACT_THRESHOLD` bytes.
pub struct TailSink {
    file: File,
    len: u64,
    threshold: u64,
    keep: usize,
}

impl TailSink {
    /// Open an existing capture file; a file removed under us is not recreated.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        Self::with_limits(file, COMPACT_THRESHOLD, TAIL_WINDOW)
    }

    pub fn with_limits(mut file: File, threshold: u64, keep: usize) -> io::Result<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            len,
            threshold: threshold.max(keep as u64),
            keep,
        })
    }

    /// Mark the capture complete by dropping its write permission. A reader in
    /// another process waits for this before reading, and a sealed file can no
    /// longer be opened by [`TailSink::open`].
    pub fn seal(self) -> io::Result<()> {
        self.file.set_permissions(Permissions::from_mode(SEALED_MODE))
    }

    pub fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)?;
        self.len += buf.len() as u64;
        if self.len > self.threshold {
            self.compact()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> io::Result<()> {
        let keep = (self.keep as u64).min(self.len);
        let mut tail = vec![0u8; keep as usize];
        self.file.seek(SeekFrom::Start(self.len - keep))?;
        self.file.read_exact(&mut tail)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&tail)?;
        self.file.set_len(keep)?;
        self.len = self.file.seek(SeekFrom::End(0))?;
        debug!(kept = keep, "compacted capture file");
        Ok(())
    }
}

/// Copy `reader` into `primary` and, after each chunk reaches `primary`, into
/// `sink`. Runs until end of input; the sink stays with the caller.
///
/// A failing sink is dropped and forwarding continues. A failing `primary`
/// does not stop draining either, so the writer on the other side of the pipe
/// never blocks on a dead relay.
pub fn relay<R: Read, W: Write>(
    mut reader: R,
    mut primary: W,
    mut sink: Option<&mut TailSink>,
) -> io::Result<u64> {
    let mut buffer = [0u8; CHUNK];
    let mut total = 0u64;
    let mut primary_ok = true;
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = &buffer[..bytes_read];
        total += bytes_read as u64;

        if primary_ok {
            if let Err(e) = primary.write_all(chunk).and_then(|_| primary.flush()) {
                debug!(error = %e, "original destination stopped accepting output");
                primary_ok = false;
            }
        }

        if let Some(s) = sink.as_mut() {
            if let Err(e) = s.write_chunk(chunk) {
                warn!(error = %e, "capture sink failed, capture abandoned");
                sink = None;
            }
        }
    }
    Ok(total)
}

/// Wait up to `timeout` for the relay writing `path` to seal it. Returns false
/// on timeout or when the file is gone.
///
/// An empty, unlocked file says nothing: the relay may not have started yet.
/// Only the seal means every byte is on disk.
pub fn wait_for_seal(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match fs::metadata(path) {
            Ok(meta) if meta.permissions().mode() & OWNER_WRITE == 0 => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
        if Instant::now() >= deadline {
            debug!(path = %path.display(), "capture not sealed in time, reading what is there");
            return false;
        }
        thread::sleep(SEAL_POLL);
    }
}

/// Read at most the last `limit` bytes of the file at `path`.
pub fn read_tail(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    read_tail_from(&mut file, limit)
}

pub fn read_tail_from(file: &mut File, limit: usize) -> io::Result<Vec<u8>> {
    let len = file.seek(SeekFrom::End(0))?;
    let start = len.saturating_sub(limit as u64);
    file.seek(SeekFrom::Start(start))?;
    let mut collected = Vec::with_capacity((len - start) as usize);
    file.take(limit as u64).read_to_end(&mut collected)?;
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn relay_writes_both_destinations() -> io::Result<()> {
        let capture = tempfile::NamedTempFile::new()?;
        let mut sink = TailSink::open(capture.path())?;
        let mut terminal = Vec::new();

        let copied = relay(Cursor::new(b"warning: x\nerror: y\n".to_vec()), &mut terminal, Some(&mut sink))?;

        assert_eq!(copied, 20);
        assert_eq!(terminal, b"warning: x\nerror: y\n");
        assert_eq!(std::fs::read(capture.path())?, b"warning: x\nerror: y\n");
        Ok(())
    }

    #[test]
    fn relay_without_sink_still_forwards() -> io::Result<()> {
        let mut terminal = Vec::new();
        relay(Cursor::new(b"plain".to_vec()), &mut terminal, None)?;
        assert_eq!(terminal, b"plain");
        Ok(())
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn relay_keeps_draining_when_primary_fails() -> io::Result<()> {
        let capture = tempfile::NamedTempFile::new()?;
        let mut sink = TailSink::open(capture.path())?;
        let input = vec![b'e'; 3 * CHUNK];

        let copied = relay(Cursor::new(input.clone()), Closed, Some(&mut sink))?;

        assert_eq!(copied, input.len() as u64);
        assert_eq!(std::fs::read(capture.path())?, input);
        Ok(())
    }

    #[test]
    fn sink_compacts_to_tail() -> io::Result<()> {
        let capture = tempfile::NamedTempFile::new()?;
        let mut sink = TailSink::with_limits(capture.reopen()?, 16, 8)?;
        sink.write_chunk(b"0123456789")?;
        sink.write_chunk(b"abcdefghij")?;

        assert_eq!(std::fs::read(capture.path())?, b"cdefghij");

        sink.write_chunk(b"XY")?;
        assert_eq!(std::fs::read(capture.path())?, b"cdefghijXY");
        Ok(())
    }

    #[test]
    fn bounded_capture_matches_full_decode() -> io::Result<()> {
        // Multi-byte text plus stray invalid bytes, long enough to compact many times.
        let mut stream = Vec::new();
        for i in 0..20_000 {
            stream.extend_from_slice("сбой ".as_bytes());
            if i % 97 == 0 {
                stream.push(0xfe);
            }
        }
        let capture = tempfile::NamedTempFile::new()?;
        let mut sink = TailSink::open(capture.path())?;
        relay(Cursor::new(stream.clone()), io::sink(), Some(&mut sink))?;

        let on_disk = std::fs::metadata(capture.path())?.len();
        assert!(on_disk <= COMPACT_THRESHOLD);

        let bounded = payload::build("x", 1, &read_tail(capture.path(), TAIL_WINDOW)?, "/");
        let full = payload::build("x", 1, &stream, "/");
        assert_eq!(bounded.error_tail, full.error_tail);
        Ok(())
    }

    #[test]
    fn unsealed_capture_is_not_finished() -> io::Result<()> {
        // What a reader sees before the relay process has started.
        let capture = tempfile::NamedTempFile::new()?;
        assert!(!wait_for_seal(capture.path(), Duration::from_millis(30)));

        let mut sink = TailSink::open(capture.path())?;
        relay(Cursor::new(b"late\n".to_vec()), io::sink(), Some(&mut sink))?;
        sink.seal()?;

        assert!(wait_for_seal(capture.path(), Duration::from_millis(30)));
        assert_eq!(read_tail(capture.path(), TAIL_WINDOW)?, b"late\n");
        Ok(())
    }

    #[test]
    fn seal_arriving_later_is_awaited() -> io::Result<()> {
        let capture = tempfile::NamedTempFile::new()?;
        let path = capture.path().to_path_buf();
        let writer = thread::spawn(move || -> io::Result<()> {
            thread::sleep(Duration::from_millis(100));
            let mut sink = TailSink::open(&path)?;
            relay(Cursor::new(b"slow start\n".to_vec()), io::sink(), Some(&mut sink))?;
            sink.seal()
        });

        assert!(wait_for_seal(capture.path(), Duration::from_secs(10)));
        writer.join().unwrap()?;
        assert_eq!(std::fs::read(capture.path())?, b"slow start\n");
        Ok(())
    }

    #[test]
    fn sealed_capture_cannot_be_reopened() -> io::Result<()> {
        if unsafe { libc::geteuid() } == 0 {
            // Permission bits do not stop root.
            return Ok(());
        }
        let capture = tempfile::NamedTempFile::new()?;
        TailSink::open(capture.path())?.seal()?;
        assert!(TailSink::open(capture.path()).is_err());
        Ok(())
    }

    #[test]
    fn missing_capture_does_not_wait() {
        let started = Instant::now();
        assert!(!wait_for_seal(Path::new("/nonexistent/ghostcoach.capture"), Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn read_tail_of_short_file_is_whole_file() -> io::Result<()> {
        let capture = tempfile::NamedTempFile::new()?;
        std::fs::write(capture.path(), b"short")?;
        assert_eq!(read_tail(capture.path(), 100)?, b"short");
        assert_eq!(read_tail(capture.path(), 3)?, b"ort");
        Ok(())
    }
}
