/// Bounded output collection and normalization
///
/// Each child stream gets its own reader thread. A reader keeps at most
/// `limit + 1` bytes but keeps draining until EOF, so a chatty child never
/// blocks on a full pipe while the supervisor is waiting on it. Captures are
/// shared with the supervisor, so what was read so far is available even when
/// a stream never closes.
use crate::config::types::TRUNCATION_MARKER;
use serde::Serialize;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::process::{ChildStderr, ChildStdout};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

/// How a captured stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    /// Everything the child wrote was kept
    Complete,
    /// Child wrote more than the bound; the tail was drained and dropped
    TruncatedByLimit,
    /// The pipe failed before EOF
    ReadError,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// Bytes retained from one stream plus what was seen in total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamCapture {
    /// First `limit + 1` bytes at most
    pub data: Vec<u8>,
    /// Every byte the child wrote, kept or not
    pub total_bytes: usize,
    /// Final byte of the whole stream, not of `data`
    pub last_byte: Option<u8>,
    pub read_error: bool,
}

impl StreamCapture {
    pub fn integrity(&self, limit: usize) -> OutputIntegrity {
        if self.read_error {
            OutputIntegrity::ReadError
        } else if self.total_bytes > limit {
            OutputIntegrity::TruncatedByLimit
        } else {
            OutputIntegrity::Complete
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }
}

/// Both streams of one run.
#[derive(Clone, Debug, Default)]
pub struct OutputResult {
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
}

/// How draining ended.
#[derive(Debug)]
pub enum Drain {
    /// Every stream reached EOF
    Complete(OutputResult),
    /// The deadline passed with a stream still open; holds what was read
    HeldOpen(OutputResult),
}

/// One background reader and the capture it fills.
struct StreamReader {
    capture: Arc<Mutex<StreamCapture>>,
    /// Disconnects when the reader thread ends
    done: Receiver<()>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(stream: R, limit: usize) -> Self {
        let capture = Arc::new(Mutex::new(StreamCapture::default()));
        let (tx, done) = channel::<()>();
        let sink = Arc::clone(&capture);
        thread::spawn(move || {
            let _done = tx;
            drain_into(stream, limit, &sink);
        });
        StreamReader { capture, done }
    }

    fn wait_closed(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn snapshot(&self) -> StreamCapture {
        self.capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Reader threads for a running child.
///
/// Dropping this without calling [`PendingOutput::finish`] detaches the
/// readers; they exit on their own once every writer closes the pipe.
pub struct PendingOutput {
    stdout: Option<StreamReader>,
    stderr: Option<StreamReader>,
}

/// Output collector with a per-stream retention bound
pub struct OutputCollector {
    limit: usize,
}

impl OutputCollector {
    pub fn new(limit: usize) -> Self {
        OutputCollector { limit }
    }

    /// Start draining both streams in the background.
    pub fn start(&self, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> PendingOutput {
        PendingOutput {
            stdout: stdout.map(|stream| StreamReader::spawn(stream, self.limit)),
            stderr: stderr.map(|stream| StreamReader::spawn(stream, self.limit)),
        }
    }
}

impl PendingOutput {
    /// Wait until `deadline` for both readers to hit EOF.
    ///
    /// A stream can only outlive its group when some process outside the
    /// group inherited the pipe; that comes back as [`Drain::HeldOpen`].
    pub fn finish(self, deadline: Instant) -> Drain {
        let closed = [&self.stdout, &self.stderr]
            .into_iter()
            .flatten()
            .all(|reader| reader.wait_closed(deadline));

        let output = OutputResult {
            stdout: self.stdout.as_ref().map(StreamReader::snapshot).unwrap_or_default(),
            stderr: self.stderr.as_ref().map(StreamReader::snapshot).unwrap_or_default(),
        };
        if closed {
            Drain::Complete(output)
        } else {
            Drain::HeldOpen(output)
        }
    }
}

/// Read `stream` to EOF, keeping at most `limit + 1` bytes.
///
/// The extra byte lets the normalizer tell "exactly at the bound plus a final
/// newline" apart from real overflow.
pub fn collect_stream<R: Read>(stream: R, limit: usize) -> StreamCapture {
    let capture = Mutex::new(StreamCapture::default());
    drain_into(stream, limit, &capture);
    capture.into_inner().unwrap_or_else(PoisonError::into_inner)
}

fn drain_into<R: Read>(mut stream: R, limit: usize, capture: &Mutex<StreamCapture>) {
    let keep = limit.saturating_add(1);
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
                let room = keep.saturating_sub(capture.data.len());
                capture.data.extend_from_slice(&chunk[..n.min(room)]);
                capture.total_bytes += n;
                capture.last_byte = Some(chunk[n - 1]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Output reader stopped early: {}", e);
                capture.lock().unwrap_or_else(PoisonError::into_inner).read_error = true;
                break;
            }
        }
    }
}

/// Normalized stdout: one trailing newline stripped, then bounded.
///
/// The newline is only stripped when the output is longer than one byte, so a
/// lone `"\n"` survives. Returns the text and whether it was truncated.
pub fn normalize_stdout(capture: &StreamCapture, limit: usize) -> (String, bool) {
    let strip = capture.last_byte == Some(b'\n') && capture.total_bytes > 1;
    let effective = capture.total_bytes - usize::from(strip);
    bounded_text(capture, effective, limit)
}

/// Stderr is bounded the same way but otherwise left untouched.
pub fn normalize_stderr(capture: &StreamCapture, limit: usize) -> (String, bool) {
    bounded_text(capture, capture.total_bytes, limit)
}

fn bounded_text(capture: &StreamCapture, effective: usize, limit: usize) -> (String, bool) {
    if effective <= limit {
        let end = effective.min(capture.data.len());
        return (String::from_utf8_lossy(&capture.data[..end]).into_owned(), false);
    }

    let kept = &capture.data[..limit.min(capture.data.len())];
    let mut text = String::from_utf8_lossy(&kept[..utf8_boundary(kept)]).into_owned();
    truncate_to_char_boundary(&mut text, limit);
    text.push_str(TRUNCATION_MARKER);
    (text, true)
}

/// Length of `bytes` without a multi-byte sequence cut off at the end.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

/// Lossy decoding can grow invalid input; never hand back more than `limit`.
fn truncate_to_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    fn capture(bytes: &[u8], limit: usize) -> StreamCapture {
        collect_stream(Cursor::new(bytes.to_vec()), limit)
    }

    #[test]
    fn reader_drains_past_the_bound() {
        let out = capture(&[b'a'; 10_000], 100);
        assert_eq!(out.data.len(), 101);
        assert_eq!(out.total_bytes, 10_000);
        assert_eq!(out.last_byte, Some(b'a'));
        assert_eq!(out.integrity(100), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn single_trailing_newline_is_stripped() {
        assert_eq!(normalize_stdout(&capture(b"6\n", 64), 64).0, "6");
        assert_eq!(normalize_stdout(&capture(b"a\n\n", 64), 64).0, "a\n");
        assert_eq!(normalize_stdout(&capture(b"abc", 64), 64).0, "abc");
    }

    #[test]
    fn lone_newline_is_kept() {
        assert_eq!(normalize_stdout(&capture(b"\n", 64), 64).0, "\n");
        assert_eq!(normalize_stdout(&capture(b"", 64), 64).0, "");
    }

    #[test]
    fn exactly_at_the_bound_is_not_truncated() {
        let limit = 16;
        let (text, truncated) = normalize_stdout(&capture(&[b'x'; 16], limit), limit);
        assert_eq!(text.len(), 16);
        assert!(!truncated);

        // Bound plus the newline that gets stripped anyway.
        let mut with_newline = vec![b'x'; 16];
        with_newline.push(b'\n');
        let (text, truncated) = normalize_stdout(&capture(&with_newline, limit), limit);
        assert_eq!(text, "x".repeat(16));
        assert!(!truncated);
    }

    #[test]
    fn overflow_keeps_prefix_and_appends_marker() {
        let limit = 16;
        let (text, truncated) = normalize_stdout(&capture(&[b'x'; 17], limit), limit);
        assert!(truncated);
        assert_eq!(text, format!("{}{}", "x".repeat(16), TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_backs_off_to_a_char_boundary() {
        // 15 ASCII bytes then a 3-byte char straddling the 16-byte bound.
        let mut bytes = vec![b'a'; 15];
        bytes.extend_from_slice("€€".as_bytes());
        let (text, truncated) = normalize_stdout(&capture(&bytes, 16), 16);
        assert!(truncated);
        assert_eq!(text, format!("{}{}", "a".repeat(15), TRUNCATION_MARKER));
    }

    #[test]
    fn stderr_keeps_its_trailing_newline() {
        let (text, truncated) = normalize_stderr(&capture(b"Traceback\n", 64), 64);
        assert_eq!(text, "Traceback\n");
        assert!(!truncated);

        let (text, truncated) = normalize_stderr(&capture(&[b'e'; 40], 8), 8);
        assert!(truncated);
        assert!(text.starts_with("eeeeeeee\n..."));
    }

    #[test]
    fn missing_streams_finish_empty() {
        let pending = OutputCollector::new(64).start(None, None);
        let Drain::Complete(result) = pending.finish(Instant::now()) else {
            panic!("no streams means nothing can be held open");
        };
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn held_open_stream_returns_what_was_read() {
        // `sleep` keeps the write end open past the deadline.
        let Ok(mut child) = Command::new("/bin/sh")
            .args(["-c", "echo early; exec sleep 5"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        else {
            return;
        };

        let pending = OutputCollector::new(64).start(child.stdout.take(), None);
        thread::sleep(Duration::from_millis(300));
        let drain = pending.finish(Instant::now() + Duration::from_millis(200));
        let _ = child.kill();
        let _ = child.wait();

        let Drain::HeldOpen(result) = drain else {
            panic!("stream should still be open: {:?}", drain);
        };
        assert_eq!(result.stdout.data, b"early\n");
    }

    #[test]
    fn integrity_display() {
        assert_eq!(OutputIntegrity::Complete.to_string(), "complete");
        assert_eq!(OutputIntegrity::TruncatedByLimit.to_string(), "truncated_by_limit");
        assert_eq!(OutputIntegrity::ReadError.to_string(), "read_error");
    }
}
