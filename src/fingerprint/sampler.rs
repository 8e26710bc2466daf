//! Bounded content sampling.
//!
//! The content hash covers the file length plus a fixed number of
//! fixed-size segments: one at the head, one ending at EOF, and the rest
//! spaced evenly between them. Offsets use integer arithmetic only, so the
//! same bytes always produce the same hash on every platform. Files no
//! larger than the total sample size are hashed whole.

use std::io::{self, Read, Seek, SeekFrom};

/// Default number of sampled segments (head + tail + 6 strides).
pub const DEFAULT_SAMPLE_SEGMENTS: usize = 8;

/// Default size of each sampled segment (64 KiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024;

/// Sampling parameters for the content hash.
///
/// Changing either value changes every content hash, so persisted
/// fingerprints computed with other values should be cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    /// Number of segments sampled from files larger than the total sample
    pub segments: usize,
    /// Size of each segment in bytes
    pub segment_size: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            segments: DEFAULT_SAMPLE_SEGMENTS,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl SampleConfig {
    /// Create a sampling configuration.
    ///
    /// At least two segments (head and tail) and one byte per segment are
    /// always used.
    #[must_use]
    pub fn new(segments: usize, segment_size: u64) -> Self {
        Self {
            segments: segments.max(2),
            segment_size: segment_size.max(1),
        }
    }

    /// Total bytes read from a file larger than the sample.
    #[must_use]
    pub fn total_sample_bytes(&self) -> u64 {
        let (segments, segment_size) = self.effective();
        segment_size.saturating_mul(segments as u64)
    }

    // Fields are public, so values built without `new` are clamped here.
    fn effective(&self) -> (usize, u64) {
        (self.segments.max(2), self.segment_size.max(1))
    }
}

/// Compute the `(offset, length)` ranges sampled from a file of `len` bytes.
///
/// Ranges are sorted and never overlap.
#[must_use]
pub fn segment_ranges(len: u64, config: &SampleConfig) -> Vec<(u64, u64)> {
    if len == 0 {
        return Vec::new();
    }
    if len <= config.total_sample_bytes() {
        return vec![(0, len)];
    }

    let (segments, segment_size) = config.effective();
    let last_start = u128::from(len - segment_size);
    let steps = (segments - 1) as u128;
    (0..segments)
        .map(|i| {
            // last_start / steps > segment_size, so consecutive ranges stay disjoint.
            let offset = (last_start * i as u128 / steps) as u64;
            (offset, segment_size)
        })
        .collect()
}

/// Hash the sampled ranges of a reader holding `len` bytes.
///
/// # Errors
///
/// Returns an I/O error if seeking or reading fails, including
/// `UnexpectedEof` when the file shrank while being read.
pub fn sample_hash<R: Read + Seek>(
    reader: &mut R,
    len: u64,
    config: &SampleConfig,
) -> io::Result<super::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&len.to_le_bytes());

    for (offset, length) in segment_ranges(len, config) {
        reader.seek(SeekFrom::Start(offset))?;
        let copied = io::copy(&mut reader.by_ref().take(length), &mut hasher)?;
        if copied != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes at offset {}, read {}", length, offset, copied),
            ));
        }
    }

    Ok(*hasher.finalize().as_bytes())
}
