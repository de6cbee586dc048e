use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

/// Ordered log of every line seen during one logical operation.
///
/// Cloning shares the same log. Appends happen one whole line at a time, and
/// every change bumps a revision that waiters can subscribe to.
#[derive(Clone)]
pub struct Transcript {
    inner: Arc<Inner>,
}

struct Inner {
    lines: RwLock<Vec<String>>,
    fragment: RwLock<Fragment>,
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct Fragment {
    text: String,
    revision: u64,
}

/// Position in the transcript taken just before a command goes out. Lines
/// and fragments newer than the mark belong to that command's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub line: usize,
    pub revision: u64,
}

impl Transcript {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                lines: RwLock::new(Vec::new()),
                fragment: RwLock::new(Fragment::default()),
                revision,
            }),
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transcript = Self::new();
        for line in lines {
            transcript.push_line(line);
        }
        transcript
    }

    /// Append a line and return its index. The revision is bumped under the
    /// same lock, so a `Mark` never sees one without the other.
    pub fn push_line(&self, line: impl Into<String>) -> usize {
        let mut lines = self.inner.lines.write();
        lines.push(line.into());
        self.bump();
        lines.len() - 1
    }

    /// Drop the line at `index`, if there is one.
    pub fn remove_line(&self, index: usize) -> Option<String> {
        let mut lines = self.inner.lines.write();
        if index >= lines.len() {
            return None;
        }
        let line = lines.remove(index);
        self.bump();
        Some(line)
    }

    /// Record the unterminated tail of the stream after a read. It is never
    /// part of the line log, but prompt detection may look at it.
    pub fn set_fragment(&self, text: String) {
        let mut fragment = self.inner.fragment.write();
        fragment.text = text;
        fragment.revision = self.bump();
    }

    pub fn fragment(&self) -> String {
        self.inner.fragment.read().text.clone()
    }

    /// The fragment, if it was last touched after `mark`.
    pub fn fragment_since(&self, mark: Mark) -> Option<String> {
        let fragment = self.inner.fragment.read();
        (fragment.revision > mark.revision).then(|| fragment.text.clone())
    }

    pub fn mark(&self) -> Mark {
        let lines = self.inner.lines.read();
        Mark {
            line: lines.len(),
            revision: *self.inner.revision.borrow(),
        }
    }

    /// Start a new operation.
    pub fn clear(&self) {
        let mut lines = self.inner.lines.write();
        lines.clear();
        self.bump();
    }

    pub fn len(&self) -> usize {
        self.inner.lines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lines.read().clone()
    }

    /// Lines from `start` (clamped) to the end.
    pub fn since(&self, start: usize) -> Vec<String> {
        let lines = self.inner.lines.read();
        let start = start.min(lines.len());
        lines[start..].to_vec()
    }

    pub fn range(&self, start: usize, end: usize) -> Vec<String> {
        let lines = self.inner.lines.read();
        let end = end.min(lines.len());
        let start = start.min(end);
        lines[start..end].to_vec()
    }

    /// The last `n` lines at or after `start`.
    pub fn tail_since(&self, start: usize, n: usize) -> Vec<String> {
        let lines = self.inner.lines.read();
        let start = start.min(lines.len()).max(lines.len().saturating_sub(n));
        lines[start..].to_vec()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn bump(&self) -> u64 {
        self.inner.revision.send_modify(|rev| *rev += 1);
        *self.inner.revision.borrow()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("lines", &self.len())
            .field("fragment", &self.fragment())
            .finish()
    }
}
