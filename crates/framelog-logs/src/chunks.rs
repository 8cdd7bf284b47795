use std::io::{ErrorKind, Read};

/// Default read size for a followed log
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Turns a byte source into a sequence of UTF-8 text chunks.
///
/// Every successful `read` becomes one chunk, however much it returned. A
/// multi-byte character cut by a read boundary is carried into the next
/// chunk; invalid sequences are replaced with U+FFFD.
pub struct ChunkReader<R> {
    reader: R,
    buf: Vec<u8>,
    carry: Vec<u8>,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_CHUNK_BYTES)
    }

    pub fn with_capacity(reader: R, chunk_bytes: usize) -> Self {
        Self {
            reader,
            buf: vec![0; chunk_bytes.max(1)],
            carry: Vec::new(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let n = match self.reader.read(&mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if n == 0 {
                self.done = true;
                if self.carry.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return Some(Ok(text));
            }

            self.carry.extend_from_slice(&self.buf[..n]);
            let text = take_decoded(&mut self.carry);
            if !text.is_empty() {
                return Some(Ok(text));
            }
        }
        None
    }
}

/// Decode the longest complete prefix of `bytes`, leaving an unfinished
/// trailing character in place.
fn take_decoded(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;

    while start < bytes.len() {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = bytes.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&bytes[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }

    bytes.drain(..start);
    text
}
