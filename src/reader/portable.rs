// Portable reader on std::fs. Always available.

use super::{CounterReader, MAX_COUNTER_BYTES};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

#[derive(Debug, Default, Clone, Copy)]
pub struct PortableReader;

impl CounterReader for PortableReader {
    fn read_text(&self, path: &str) -> Option<String> {
        String::from_utf8(self.read_raw(path)?).ok()
    }

    fn read_lines(&self, path: &str, max_lines: usize) -> Option<Vec<String>> {
        let file = File::open(path).ok()?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            lines.push(line.ok()?);
            if lines.len() >= max_lines {
                break;
            }
        }
        Some(lines)
    }

    fn read_raw(&self, path: &str) -> Option<Vec<u8>> {
        let file = File::open(path).ok()?;
        let mut buf = Vec::new();
        // procfs reports size 0, so read until EOF rather than trusting metadata
        file.take(MAX_COUNTER_BYTES as u64)
            .read_to_end(&mut buf)
            .ok()?;
        Some(buf)
    }
}
