//! Event sources: a one-shot scan of an existing log and a live tail that
//! follows the log as it grows.
//!
//! Both yield events through the same [`EventSource::poll_event`] contract
//! so the runner's dispatch is identical in either mode. Lines that fail to
//! parse are logged, counted and skipped; they never end the scan.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::config::{LiveConfig, StartPosition};
use crate::error::{EvalError, Result};
use crate::event::AuditEvent;

/// Outcome of asking a source for its next event.
#[derive(Debug)]
pub enum SourcePoll {
    /// A parsed event.
    Event(AuditEvent),
    /// Nothing available yet; try again after the suggested back-off.
    Pending(Duration),
    /// The input is finished.
    Exhausted,
}

/// Line accounting for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Complete lines read (including blank and skipped ones).
    pub lines: u64,
    /// Lines that produced an event.
    pub events: u64,
    /// Lines dropped because they could not be parsed.
    pub skipped: u64,
}

/// A lazy, ordered sequence of audit events.
pub trait EventSource: Send {
    /// Produce the next event, report that none is available yet, or report
    /// the end of input.
    fn poll_event(&mut self) -> Result<SourcePoll>;

    fn stats(&self) -> SourceStats;
}

/// Decode one raw line. Blank lines yield `Ok(None)`.
fn decode_line(raw: &[u8], line: u64) -> Result<Option<AuditEvent>> {
    let text = std::str::from_utf8(raw).map_err(|_| EvalError::InvalidUtf8 { line })?;
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return Ok(None);
    }
    AuditEvent::from_json_line(text).map(Some)
}

/// Decode a line, turning failures into a diagnostic plus a skip count.
fn accept_line(
    raw: &[u8],
    line: u64,
    origin: &dyn std::fmt::Display,
    stats: &mut SourceStats,
) -> Option<AuditEvent> {
    stats.lines += 1;
    match decode_line(raw, line) {
        Ok(Some(event)) => {
            stats.events += 1;
            Some(event)
        }
        Ok(None) => None,
        Err(e) => {
            stats.skipped += 1;
            log::warn!("{origin}: skipping line {line}: {e}");
            None
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Reads a log once from start to end-of-file.
///
/// A final line without a trailing newline is still parsed.
pub struct BatchSource<R> {
    reader: R,
    origin: String,
    buf: Vec<u8>,
    line: u64,
    stats: SourceStats,
}

impl BatchSource<BufReader<File>> {
    /// Open a log file for a single scan.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }
}

impl<R: BufRead + Send> BatchSource<R> {
    /// Scan any buffered reader; `origin` labels diagnostics.
    pub fn from_reader(reader: R, origin: impl Into<String>) -> Self {
        BatchSource {
            reader,
            origin: origin.into(),
            buf: Vec::new(),
            line: 0,
            stats: SourceStats::default(),
        }
    }
}

impl<R: BufRead + Send> EventSource for BatchSource<R> {
    fn poll_event(&mut self) -> Result<SourcePoll> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Ok(SourcePoll::Exhausted);
            }
            self.line += 1;
            if let Some(event) = accept_line(&self.buf, self.line, &self.origin, &mut self.stats)
            {
                return Ok(SourcePoll::Event(event));
            }
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

// =============================================================================
// Live tail
// =============================================================================

/// Follows a growing log file.
///
/// Waits for the file to exist, opens it at the configured start position
/// (end-of-file by default, so history is not replayed) and then returns
/// one event per complete line. Bytes of an unfinished line are held until
/// the writer completes it, up to `max_line_bytes`; a longer line is
/// dropped and counted as skipped. If the file shrinks below the read position it
/// is assumed truncated and read again from the beginning.
pub struct TailSource {
    path: PathBuf,
    origin: String,
    reader: Option<BufReader<File>>,
    start: StartPosition,
    idle_interval: Duration,
    file_wait_interval: Duration,
    /// Bytes of the current, not yet terminated line.
    partial: Vec<u8>,
    /// Byte offset just past the last complete line consumed.
    offset: u64,
    line: u64,
    max_line_bytes: usize,
    /// Inside an overlong line; bytes are dropped up to its newline.
    discarding: bool,
    waiting_logged: bool,
    stats: SourceStats,
}

impl TailSource {
    pub fn new(path: impl Into<PathBuf>, live: &LiveConfig) -> Self {
        let path = path.into();
        TailSource {
            origin: path.display().to_string(),
            path,
            reader: None,
            start: live.start,
            idle_interval: live.idle_interval(),
            file_wait_interval: live.file_wait_interval(),
            partial: Vec::new(),
            offset: 0,
            line: 0,
            max_line_bytes: live.max_line_bytes.max(1),
            discarding: false,
            waiting_logged: false,
            stats: SourceStats::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log file has been opened.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Offset just past the last complete line; resuming from here with
    /// [`StartPosition::Offset`] re-reads any unfinished line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes of an unfinished line currently held.
    pub fn pending_bytes(&self) -> usize {
        self.partial.len()
    }

    /// Try to open the file. `Ok(false)` means it does not exist yet.
    fn try_open(&mut self) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.waiting_logged {
                    log::info!("waiting for {} to be created", self.origin);
                    self.waiting_logged = true;
                }
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let pos = match self.start {
            StartPosition::End => file.seek(SeekFrom::End(0))?,
            StartPosition::Beginning => file.seek(SeekFrom::Start(0))?,
            StartPosition::Offset(off) if off <= len => file.seek(SeekFrom::Start(off))?,
            StartPosition::Offset(off) => {
                log::warn!(
                    "{}: resume offset {off} is past end of file ({len} bytes); tailing from end",
                    self.origin
                );
                file.seek(SeekFrom::End(0))?
            }
        };

        log::info!("tailing {} from byte {pos}", self.origin);
        self.offset = pos;
        self.partial.clear();
        self.discarding = false;
        self.reader = Some(BufReader::new(file));
        self.waiting_logged = false;
        Ok(true)
    }

    /// Detect truncation at end-of-file and schedule a reopen from the start.
    fn check_truncated(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        let read_pos = self.offset + self.partial.len() as u64;
        if meta.len() < read_pos {
            log::warn!(
                "{} shrank from {read_pos} to {} bytes; reading again from the beginning",
                self.origin,
                meta.len()
            );
            self.reader = None;
            self.partial.clear();
            self.discarding = false;
            self.start = StartPosition::Beginning;
        }
    }
}

impl EventSource for TailSource {
    fn poll_event(&mut self) -> Result<SourcePoll> {
        loop {
            if self.reader.is_none() && !self.try_open()? {
                return Ok(SourcePoll::Pending(self.file_wait_interval));
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(SourcePoll::Pending(self.file_wait_interval));
            };

            // One byte of headroom so a maximal line still reads its newline.
            let room = (self.max_line_bytes + 1).saturating_sub(self.partial.len()) as u64;
            let n = match reader.by_ref().take(room).read_until(b'\n', &mut self.partial) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                self.check_truncated();
                return Ok(SourcePoll::Pending(self.idle_interval));
            }

            let complete = self.partial.ends_with(b"\n");
            if self.discarding {
                self.offset += self.partial.len() as u64;
                self.partial.clear();
                self.discarding = !complete;
                continue;
            }
            if !complete {
                if self.partial.len() > self.max_line_bytes {
                    self.line += 1;
                    self.stats.lines += 1;
                    self.stats.skipped += 1;
                    log::warn!(
                        "{}: skipping line {}: longer than {} bytes",
                        self.origin,
                        self.line,
                        self.max_line_bytes
                    );
                    self.offset += self.partial.len() as u64;
                    self.partial.clear();
                    self.discarding = true;
                    continue;
                }
                // Writer is mid-line; keep the bytes and wait for the rest.
                return Ok(SourcePoll::Pending(self.idle_interval));
            }

            let raw = std::mem::take(&mut self.partial);
            self.offset += raw.len() as u64;
            self.line += 1;
            if let Some(event) = accept_line(&raw, self.line, &self.origin, &mut self.stats) {
                return Ok(SourcePoll::Event(event));
            }
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const LOGIN: &str = r#"{"event":"login_attempt","username":"a","success":false,"client_ip":"1.1.1.1","timestamp":"2024-07-10T12:30:00Z"}"#;

    fn drain<S: EventSource>(source: &mut S) -> Vec<AuditEvent> {
        let mut out = Vec::new();
        while let SourcePoll::Event(e) = source.poll_event().unwrap() {
            out.push(e);
        }
        out
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn live() -> LiveConfig {
        LiveConfig {
            idle_interval_ms: 5,
            file_wait_interval_ms: 7,
            start: StartPosition::End,
            ..Default::default()
        }
    }

    // =========================================================================
    // Batch
    // =========================================================================

    #[test]
    fn test_batch_reads_all_lines() {
        let input = format!("{LOGIN}\n{LOGIN}\n{LOGIN}");
        let mut source = BatchSource::from_reader(Cursor::new(input), "mem");
        assert_eq!(drain(&mut source).len(), 3);
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Exhausted));
        assert_eq!(
            source.stats(),
            SourceStats {
                lines: 3,
                events: 3,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_batch_skips_bad_lines() {
        let input = format!(
            "{LOGIN}\nnot json\n\n{{\"event\":\"login_attempt\"}}\n[1,2]\n{LOGIN}\r\n"
        );
        let mut source = BatchSource::from_reader(Cursor::new(input), "mem");
        assert_eq!(drain(&mut source).len(), 2);
        let stats = source.stats();
        assert_eq!(stats.lines, 6);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.skipped, 3);
    }

    #[test]
    fn test_batch_skips_invalid_utf8() {
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"event\":\"x\xff\"}\n");
        input.extend_from_slice(LOGIN.as_bytes());
        input.push(b'\n');
        let mut source = BatchSource::from_reader(Cursor::new(input), "mem");
        assert_eq!(drain(&mut source).len(), 1);
        assert_eq!(source.stats().skipped, 1);
    }

    #[test]
    fn test_batch_open_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BatchSource::open(&dir.path().join("absent.log")).err().unwrap();
        assert!(matches!(err, EvalError::Io(_)));
    }

    // =========================================================================
    // Tail
    // =========================================================================

    #[test]
    fn test_tail_waits_for_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut source = TailSource::new(&path, &live());

        match source.poll_event().unwrap() {
            SourcePoll::Pending(d) => assert_eq!(d, Duration::from_millis(7)),
            other => panic!("expected pending, got {other:?}"),
        }
        assert!(!source.is_open());

        std::fs::write(&path, "").unwrap();
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert!(source.is_open());

        append(&path, &format!("{LOGIN}\n"));
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Event(_)));
    }

    #[test]
    fn test_tail_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, format!("{LOGIN}\n{LOGIN}\n")).unwrap();

        let mut source = TailSource::new(&path, &live());
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert_eq!(source.offset(), (LOGIN.len() as u64 + 1) * 2);

        append(&path, &format!("{LOGIN}\n"));
        assert_eq!(drain(&mut source).len(), 1);
    }

    #[test]
    fn test_tail_from_beginning_replays_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, format!("{LOGIN}\n{LOGIN}\n")).unwrap();

        let config = LiveConfig {
            start: StartPosition::Beginning,
            ..live()
        };
        let mut source = TailSource::new(&path, &config);
        assert_eq!(drain(&mut source).len(), 2);
    }

    #[test]
    fn test_tail_holds_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();
        let mut source = TailSource::new(&path, &live());
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));

        let (head, tail) = LOGIN.split_at(40);
        append(&path, head);
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert_eq!(source.pending_bytes(), 40);
        assert_eq!(source.offset(), 0);

        append(&path, tail);
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));

        append(&path, "\n");
        match source.poll_event().unwrap() {
            SourcePoll::Event(e) => assert_eq!(e.get_str("client_ip"), Some("1.1.1.1")),
            other => panic!("expected event, got {other:?}"),
        }
        assert_eq!(source.pending_bytes(), 0);
        assert_eq!(source.offset(), LOGIN.len() as u64 + 1);
        assert_eq!(source.stats().events, 1);
    }

    #[test]
    fn test_tail_skips_malformed_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();
        let mut source = TailSource::new(&path, &live());
        source.poll_event().unwrap();

        append(&path, &format!("{{broken\n{LOGIN}\n"));
        assert_eq!(drain(&mut source).len(), 1);
        assert_eq!(source.stats().skipped, 1);
    }

    #[test]
    fn test_tail_resume_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, format!("{LOGIN}\n{LOGIN}\n")).unwrap();

        let config = LiveConfig {
            start: StartPosition::Offset(LOGIN.len() as u64 + 1),
            ..live()
        };
        let mut source = TailSource::new(&path, &config);
        assert_eq!(drain(&mut source).len(), 1);
    }

    #[test]
    fn test_tail_drops_overlong_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();
        let config = LiveConfig {
            max_line_bytes: 256,
            ..live()
        };
        let mut source = TailSource::new(&path, &config);
        source.poll_event().unwrap();

        // A writer that never ends its line.
        append(&path, &"x".repeat(600));
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert_eq!(source.pending_bytes(), 0);
        assert_eq!(source.stats().skipped, 1);

        append(&path, &"x".repeat(600));
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert_eq!(source.pending_bytes(), 0);

        append(&path, &format!("xx\n{LOGIN}\n"));
        let events = drain(&mut source);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str("client_ip"), Some("1.1.1.1"));
        assert_eq!(source.stats().skipped, 1);
        assert_eq!(source.offset(), 1203 + LOGIN.len() as u64 + 1);
    }

    #[test]
    fn test_tail_line_at_limit_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();
        let config = LiveConfig {
            max_line_bytes: LOGIN.len(),
            ..live()
        };
        let mut source = TailSource::new(&path, &config);
        source.poll_event().unwrap();

        append(&path, &format!("{LOGIN}\n"));
        assert_eq!(drain(&mut source).len(), 1);
        assert_eq!(source.stats().skipped, 0);
    }

    #[test]
    fn test_tail_rereads_after_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, format!("{LOGIN}\n{LOGIN}\n")).unwrap();
        let mut source = TailSource::new(&path, &live());
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));

        std::fs::write(&path, format!("{LOGIN}\n")).unwrap();
        // Truncation noticed at end-of-file, then the file is reopened from the start.
        assert!(matches!(source.poll_event().unwrap(), SourcePoll::Pending(_)));
        assert_eq!(drain(&mut source).len(), 1);
    }
}
