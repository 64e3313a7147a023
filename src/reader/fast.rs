// Syscall fast path: open(2)/read(2)/close(2) straight into a reusable buffer,
// no std::fs layering or intermediate BufReader.

use super::{CounterReader, MAX_COUNTER_BYTES};
use std::ffi::CString;

const CHUNK: usize = 4096;
const PROBE_PATH: &str = "/proc/self/stat";

#[derive(Debug, Default, Clone, Copy)]
pub struct FastReader;

impl FastReader {
    /// Returns a reader only if a known counter can be read through the fast path.
    pub fn probe() -> Option<Self> {
        let reader = FastReader;
        let mut buf = Vec::with_capacity(CHUNK);
        reader.read_into(PROBE_PATH, &mut buf)?;
        if buf.is_empty() {
            return None;
        }
        Some(reader)
    }

    /// Reads the whole file into `buf` (cleared first). `None` on any syscall failure.
    fn read_into(&self, path: &str, buf: &mut Vec<u8>) -> Option<()> {
        let c_path = CString::new(path).ok()?;
        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            return None;
        }
        buf.clear();
        let mut chunk = [0u8; CHUNK];
        let result = loop {
            // SAFETY: chunk is a live, writable buffer of CHUNK bytes and fd is open.
            let n = unsafe { libc::read(fd, chunk.as_mut_ptr().cast::<libc::c_void>(), CHUNK) };
            if n < 0 {
                if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                break None;
            }
            if n == 0 {
                break Some(());
            }
            buf.extend_from_slice(&chunk[..n as usize]);
            if buf.len() >= MAX_COUNTER_BYTES {
                buf.truncate(MAX_COUNTER_BYTES);
                break Some(());
            }
        };
        // SAFETY: fd was returned by a successful open above and is closed exactly once.
        unsafe { libc::close(fd) };
        result
    }
}

impl CounterReader for FastReader {
    fn read_text(&self, path: &str) -> Option<String> {
        String::from_utf8(self.read_raw(path)?).ok()
    }

    fn read_raw(&self, path: &str) -> Option<Vec<u8>> {
        let mut buf = Vec::with_capacity(CHUNK);
        self.read_into(path, &mut buf)?;
        Some(buf)
    }

    fn read_batch(&self, paths: &[String]) -> Vec<Option<String>> {
        let mut buf = Vec::with_capacity(CHUNK);
        paths
            .iter()
            .map(|p| {
                self.read_into(p, &mut buf)?;
                std::str::from_utf8(&buf).ok().map(str::to_owned)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_file_larger_than_one_chunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let body = "x".repeat(CHUNK * 3 + 17);
        file.write_all(body.as_bytes()).unwrap();
        let text = FastReader.read_text(file.path().to_str().unwrap()).unwrap();
        assert_eq!(text.len(), body.len());
    }

    #[test]
    fn interior_nul_in_path_is_unreadable() {
        assert!(FastReader.read_text("/proc/\0stat").is_none());
    }

    #[test]
    fn invalid_utf8_is_unreadable_as_text_but_not_raw() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x63, 0x70, 0x75, 0xff]).unwrap();
        let path = file.path().to_str().unwrap();
        assert!(FastReader.read_text(path).is_none());
        assert_eq!(FastReader.read_raw(path).unwrap().len(), 4);
    }
}
