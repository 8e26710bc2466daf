//! Lightweight container header parsing.
//!
//! Only the structures needed for duration, resolution and codec are read.
//! Each parser walks top-level boxes/elements/chunks by seeking over their
//! payloads, so the media data itself is never read.
//!
//! Supported containers:
//! - ISO base media (MP4, MOV, M4V): [`mp4`]
//! - Matroska and WebM: [`matroska`]
//! - AVI (RIFF): [`avi`]

pub mod avi;
pub mod matroska;
pub mod mp4;

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use super::FingerprintError;

/// Largest header structure read into memory in one piece.
pub(crate) const MAX_HEADER_BYTES: u64 = 16 * 1024 * 1024;

/// Container family recognised from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// ISO base media file format (MP4, MOV, M4V, 3GP)
    IsoBmff,
    /// Matroska or WebM (EBML)
    Matroska,
    /// Audio Video Interleave (RIFF)
    Avi,
}

/// Structural metadata of the primary video track.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaInfo {
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Canonical codec name (see [`canonical_codec`])
    pub codec: String,
}

/// Failure while probing a container.
#[derive(Debug)]
pub enum ProbeError {
    /// Reading failed for a reason other than running out of bytes.
    Io(io::Error),
    /// The structure ended early or is inconsistent.
    Truncated(String),
    /// No known container signature.
    Unsupported,
}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated("unexpected end of file".to_string())
        } else {
            Self::Io(e)
        }
    }
}

impl ProbeError {
    pub(crate) fn truncated(reason: impl Into<String>) -> Self {
        Self::Truncated(reason.into())
    }

    pub(crate) fn into_error(self, path: &Path) -> FingerprintError {
        match self {
            Self::Io(source) => FingerprintError::UnreadableFile {
                path: path.to_path_buf(),
                source,
            },
            Self::Truncated(reason) => FingerprintError::TruncatedMedia {
                path: path.to_path_buf(),
                reason,
            },
            Self::Unsupported => FingerprintError::UnsupportedFormat(path.to_path_buf()),
        }
    }
}

pub(crate) type ProbeResult<T> = Result<T, ProbeError>;

/// Identify the container from its first 12 bytes.
#[must_use]
pub fn detect(head: &[u8]) -> Option<ContainerKind> {
    if head.len() >= 4 && head[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some(ContainerKind::Matroska);
    }
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"AVI " {
        return Some(ContainerKind::Avi);
    }
    if head.len() >= 8 {
        let kind = &head[4..8];
        // Older QuickTime files may start with moov/mdat/wide/free instead of ftyp.
        if matches!(kind, b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free" | b"skip") {
            return Some(ContainerKind::IsoBmff);
        }
    }
    None
}

/// Probe a reader holding `len` bytes and extract media info.
///
/// # Errors
///
/// Returns [`ProbeError::Unsupported`] for unknown signatures and
/// [`ProbeError::Truncated`] for broken structures.
pub fn probe<R: Read + Seek>(reader: &mut R, len: u64) -> ProbeResult<MediaInfo> {
    let mut head = [0u8; 12];
    let available = usize::try_from(len.min(12)).unwrap_or(12);
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut head[..available])?;

    let kind = detect(&head[..available]).ok_or(ProbeError::Unsupported)?;
    log::trace!("Detected container {:?}", kind);
    match kind {
        ContainerKind::IsoBmff => mp4::probe(reader, len),
        ContainerKind::Matroska => matroska::probe(reader, len),
        ContainerKind::Avi => avi::probe(reader, len),
    }
}

/// Map container-specific codec identifiers to one shared name so files in
/// different containers can be compared.
#[must_use]
pub fn canonical_codec(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let lower = trimmed.to_ascii_lowercase();
    let name = match lower.as_str() {
        "avc1" | "avc3" | "h264" | "x264" | "v_mpeg4/iso/avc" => "h264",
        "hvc1" | "hev1" | "hevc" | "h265" | "x265" | "v_mpegh/iso/hevc" => "hevc",
        "vp09" | "vp90" | "v_vp9" => "vp9",
        "vp08" | "vp80" | "v_vp8" => "vp8",
        "av01" | "v_av1" => "av1",
        "mp4v" | "xvid" | "divx" | "dx50" | "fmp4" | "v_mpeg4/iso/asp" | "v_mpeg4/iso/sp" => {
            "mpeg4"
        }
        "mjpg" | "jpeg" | "v_mjpeg" => "mjpeg",
        "apcn" | "apch" | "apcs" | "apco" | "ap4h" | "v_prores" => "prores",
        "wmv3" | "v_ms/vfw/fourcc" => "wmv",
        _ => return lower,
    };
    name.to_string()
}

/// Render a four-character code, dropping non-printable bytes.
pub(crate) fn fourcc(bytes: [u8; 4]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|b| char::from(*b))
        .collect()
}

/// Read `len` bytes at `offset`, refusing structures larger than
/// [`MAX_HEADER_BYTES`].
pub(crate) fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: u64) -> ProbeResult<Vec<u8>> {
    if len > MAX_HEADER_BYTES {
        return Err(ProbeError::truncated(format!(
            "header structure of {} bytes exceeds limit",
            len
        )));
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Duration in milliseconds from a tick count and a ticks-per-second scale.
pub(crate) fn ticks_to_ms(ticks: u64, timescale: u64) -> u64 {
    if timescale == 0 {
        return 0;
    }
    u64::try_from(u128::from(ticks) * 1000 / u128::from(timescale)).unwrap_or(u64::MAX)
}
