//! Printable-string extraction and raw pattern matching over byte buffers.
//!
//! Binaries, class files, and certificate blobs are all searched the same
//! way: printable-ASCII runs are lifted out with their source offsets and fed
//! to the regex patterns, while byte needles are searched directly against
//! the buffer.

use crate::patterns::{BytePattern, RegexPattern};

/// A maximal printable-ASCII run and its byte offset in the source buffer.
#[derive(Debug, Clone)]
pub struct AsciiString {
    pub offset: usize,
    pub text: String,
}

/// A regex pattern match found inside an extracted string.
#[derive(Debug)]
pub struct TextHit<'a> {
    pub pattern: &'a RegexPattern,
    pub matched: String,
    pub offset: usize,
}

/// A byte-needle match. The rendered form is the needle in uppercase hex.
#[derive(Debug)]
pub struct ByteHit<'a> {
    pub pattern: &'a BytePattern,
    pub offset: usize,
}

impl ByteHit<'_> {
    pub fn rendered(&self) -> String {
        hex::encode_upper(&self.pattern.bytes)
    }
}

fn is_printable(c: u8) -> bool {
    (0x20..=0x7E).contains(&c)
}

/// Extract every maximal printable-ASCII run of at least `min_len` bytes,
/// together with its offset into `data`.
pub fn extract_ascii_strings(data: &[u8], min_len: usize) -> Vec<AsciiString> {
    let mut out = Vec::new();
    let mut i = 0;
    let n = data.len();
    while i < n {
        while i < n && !is_printable(data[i]) {
            i += 1;
        }
        if i >= n {
            break;
        }
        let start = i;
        while i < n && is_printable(data[i]) {
            i += 1;
        }
        if i - start >= min_len {
            // The run is pure ASCII by construction.
            let text = String::from_utf8_lossy(&data[start..i]).into_owned();
            out.push(AsciiString {
                offset: start,
                text,
            });
        }
    }
    out
}

/// Run every compiled regex over every extracted string. Offsets are absolute
/// within the original buffer (`run.offset + position-in-run`).
pub fn scan_strings<'a>(
    strings: &[AsciiString],
    patterns: &'a [RegexPattern],
) -> Vec<TextHit<'a>> {
    let mut hits = Vec::new();
    for pattern in patterns {
        for run in strings {
            for m in pattern.regex.find_iter(&run.text) {
                hits.push(TextHit {
                    pattern,
                    matched: m.as_str().to_string(),
                    offset: run.offset + m.start(),
                });
            }
        }
    }
    hits
}

fn all_same_byte(needle: &[u8]) -> Option<u8> {
    let first = *needle.first()?;
    needle.iter().all(|&b| b == first).then_some(first)
}

/// A needle of 16+ bytes drawn from at most two distinct values. Scanning
/// these with single-byte advance explodes on padded or zeroed regions.
fn is_low_entropy(needle: &[u8]) -> bool {
    if needle.len() < 16 {
        return false;
    }
    let mut seen = [false; 256];
    let mut distinct = 0usize;
    for &b in needle {
        if !seen[b as usize] {
            seen[b as usize] = true;
            distinct += 1;
            if distinct > 2 {
                return false;
            }
        }
    }
    true
}

fn find_from(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > data.len() || needle.is_empty() || data.len() - from < needle.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Search the buffer for every byte needle. Degenerate needles use skip
/// policies that stay linear: a single repeated byte consumes the whole run
/// it hit inside, and a long two-valued needle advances non-overlapping.
/// All other needles are scanned with single-byte advance so every
/// occurrence is reported.
pub fn scan_bytes<'a>(data: &[u8], patterns: &'a [BytePattern]) -> Vec<ByteHit<'a>> {
    let mut hits = Vec::new();
    for pattern in patterns {
        let needle = &pattern.bytes;
        if needle.is_empty() || data.len() < needle.len() {
            continue;
        }
        let same = all_same_byte(needle);
        let low_entropy = is_low_entropy(needle);
        let mut pos = 0usize;
        while let Some(off) = find_from(data, pos, needle) {
            hits.push(ByteHit { pattern, offset: off });
            if let Some(val) = same {
                let mut j = off + needle.len();
                while j < data.len() && data[j] == val {
                    j += 1;
                }
                pos = j;
            } else if low_entropy {
                pos = off + needle.len();
            } else {
                pos = off + 1;
            }
        }
    }
    hits
}
