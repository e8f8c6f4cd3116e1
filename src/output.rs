/// Child output forwarding: every non-blank line a directive command writes
/// is re-emitted as a debug event, and the last few lines are kept so a
/// failing command can report them.
use std::collections::VecDeque;
use std::io::BufRead;

/// Number of trailing lines kept per stream.
pub const TAIL_LINES: usize = 8;

/// Which child pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// The most recent lines read from a stream, oldest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tail {
    lines: VecDeque<String>,
}

impl Tail {
    fn push(&mut self, line: String) {
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// The most recent line, usually the one naming the error.
    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }
}

/// Read `reader` to the end, logging each non-blank line at debug level.
///
/// Bytes that are not valid UTF-8 are replaced rather than aborting the
/// read, so the child never blocks on a full pipe.
pub fn forward_lines<R: BufRead>(mut reader: R, stream: Stream) -> Tail {
    let mut tail = Tail::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, stream = stream.as_str(), "stopped reading child output");
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!(stream = stream.as_str(), "{line}");
        tail.push(line.to_string());
    }
    tail
}
