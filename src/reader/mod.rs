// Counter Reader: leaf I/O primitive for kernel/driver text interfaces.
//
// Every failure (missing path, permission denied by MAC policy, I/O error,
// invalid UTF-8) collapses to `None`. Nothing here panics or returns an error
// to the caller.

#[cfg(any(test, feature = "test-util"))]
mod fake;
#[cfg(unix)]
mod fast;
mod portable;

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeReader;
#[cfg(unix)]
pub use fast::FastReader;
pub use portable::PortableReader;

use tracing::{debug, info, trace};

/// Upper bound on bytes accepted from a single counter file.
pub const MAX_COUNTER_BYTES: usize = 1 << 20;

pub trait CounterReader: Send + Sync {
    /// Whole file as UTF-8 text.
    fn read_text(&self, path: &str) -> Option<String>;

    /// At most `max_lines` lines, read incrementally where the implementation can.
    fn read_lines(&self, path: &str, max_lines: usize) -> Option<Vec<String>> {
        self.read_text(path)
            .map(|t| t.lines().take(max_lines).map(str::to_owned).collect())
    }

    /// Raw bytes, for callers that tolerate invalid UTF-8.
    fn read_raw(&self, path: &str) -> Option<Vec<u8>> {
        self.read_text(path).map(String::into_bytes)
    }

    fn is_readable(&self, path: &str) -> bool {
        self.read_raw(path).is_some()
    }

    /// Reads N independent paths. Observably equivalent to N `read_text` calls.
    fn read_batch(&self, paths: &[String]) -> Vec<Option<String>> {
        paths.iter().map(|p| self.read_text(p)).collect()
    }
}

/// Production reader: the syscall fast path when it probed healthy at startup,
/// with a same-call fallback to the portable reader on any fast-path failure.
pub struct ProcReader {
    fast: Option<Box<dyn CounterReader>>,
    portable: PortableReader,
}

impl Default for ProcReader {
    fn default() -> Self {
        Self::detect(true)
    }
}

impl ProcReader {
    /// Probes the fast path once; the outcome is fixed for the reader's lifetime.
    pub fn detect(enable_fast_path: bool) -> Self {
        let fast = if enable_fast_path {
            probe_fast_path()
        } else {
            None
        };
        match fast {
            Some(_) => info!(operation = "reader_detect", "counter fast path enabled"),
            None => info!(
                operation = "reader_detect",
                requested = enable_fast_path,
                "counter fast path unavailable; using portable reader"
            ),
        }
        Self {
            fast,
            portable: PortableReader,
        }
    }

    pub fn portable_only() -> Self {
        Self {
            fast: None,
            portable: PortableReader,
        }
    }

    /// Uses `fast` as the primary path without probing it.
    pub fn with_fast_path(fast: Box<dyn CounterReader>) -> Self {
        Self {
            fast: Some(fast),
            portable: PortableReader,
        }
    }

    pub fn is_fast_path_active(&self) -> bool {
        self.fast.is_some()
    }
}

#[cfg(unix)]
fn probe_fast_path() -> Option<Box<dyn CounterReader>> {
    FastReader::probe().map(|r| Box::new(r) as Box<dyn CounterReader>)
}

#[cfg(not(unix))]
fn probe_fast_path() -> Option<Box<dyn CounterReader>> {
    None
}

impl CounterReader for ProcReader {
    fn read_text(&self, path: &str) -> Option<String> {
        if let Some(fast) = &self.fast {
            if let Some(text) = fast.read_text(path) {
                return Some(text);
            }
            trace!(path, "fast read failed; falling back to portable");
        }
        self.portable.read_text(path)
    }

    fn read_lines(&self, path: &str, max_lines: usize) -> Option<Vec<String>> {
        self.portable.read_lines(path, max_lines)
    }

    fn read_raw(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(fast) = &self.fast
            && let Some(bytes) = fast.read_raw(path)
        {
            return Some(bytes);
        }
        self.portable.read_raw(path)
    }

    fn read_batch(&self, paths: &[String]) -> Vec<Option<String>> {
        let Some(fast) = &self.fast else {
            return self.portable.read_batch(paths);
        };
        let mut out = fast.read_batch(paths);
        // A fast path that returns a short batch is treated as failing the rest.
        out.resize(paths.len(), None);
        let mut fell_back = 0usize;
        for (slot, path) in out.iter_mut().zip(paths) {
            if slot.is_none() {
                *slot = self.portable.read_text(path);
                fell_back += 1;
            }
        }
        if fell_back > 0 {
            debug!(
                operation = "read_batch",
                total = paths.len(),
                fell_back,
                "batch entries served by portable reader"
            );
        }
        out
    }
}
