//! Matroska/WebM (EBML) header parsing.
//!
//! Walks the top-level children of the `Segment` until both `Info` and
//! `Tracks` have been seen, skipping `SeekHead`, `Cues` and other elements
//! by their declared size. `Cluster` payloads are never read.

use std::io::{Read, Seek, SeekFrom};

use super::{canonical_codec, read_at, MediaInfo, ProbeError, ProbeResult};

const EBML_HEADER: u32 = 0x1A45_DFA3;
const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const TIMECODE_SCALE: u32 = 0x2A_D7B1;
const DURATION: u32 = 0x4489;
const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;

const TRACK_TYPE_VIDEO: u64 = 1;
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Decode an element ID (marker bit kept) at the start of `buf`.
fn read_id(buf: &[u8]) -> ProbeResult<(u32, usize)> {
    let first = *buf
        .first()
        .ok_or_else(|| ProbeError::truncated("missing element id"))?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 {
        return Err(ProbeError::truncated("invalid element id"));
    }
    let bytes = buf
        .get(..len)
        .ok_or_else(|| ProbeError::truncated("short element id"))?;
    let id = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    Ok((id, len))
}

/// Decode an element size (marker bit removed). `None` means unknown size.
fn read_size(buf: &[u8]) -> ProbeResult<(Option<u64>, usize)> {
    let first = *buf
        .first()
        .ok_or_else(|| ProbeError::truncated("missing element size"))?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 {
        return Err(ProbeError::truncated("invalid element size"));
    }
    let bytes = buf
        .get(..len)
        .ok_or_else(|| ProbeError::truncated("short element size"))?;

    let mask = (0xFFu32 >> len) as u8;
    let mut value = u64::from(first & mask);
    let mut all_ones = first & mask == mask;
    for b in &bytes[1..] {
        value = (value << 8) | u64::from(*b);
        all_ones &= *b == 0xFF;
    }
    Ok((if all_ones { None } else { Some(value) }, len))
}

/// Child elements of a fully buffered master element.
fn elements(mut buf: &[u8]) -> ProbeResult<Vec<(u32, &[u8])>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (id, id_len) = read_id(buf)?;
        let (size, size_len) = read_size(&buf[id_len..])?;
        let size = size.ok_or_else(|| ProbeError::truncated("unknown size inside header"))?;
        let start = id_len + size_len;
        let end = usize::try_from(size)
            .ok()
            .and_then(|s| start.checked_add(s))
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| ProbeError::truncated("element overruns its parent"))?;
        out.push((id, &buf[start..end]));
        buf = &buf[end..];
    }
    Ok(out)
}

fn uint(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn float(data: &[u8]) -> ProbeResult<f64> {
    match data.len() {
        0 => Ok(0.0),
        4 => Ok(f64::from(f32::from_be_bytes([data[0], data[1], data[2], data[3]]))),
        8 => Ok(f64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ])),
        n => Err(ProbeError::truncated(format!("float of {} bytes", n))),
    }
}

/// Duration in milliseconds from the `Info` payload.
fn parse_info(buf: &[u8]) -> ProbeResult<u64> {
    let mut scale = DEFAULT_TIMECODE_SCALE;
    let mut duration = 0.0f64;
    for (id, data) in elements(buf)? {
        match id {
            TIMECODE_SCALE => scale = uint(data),
            DURATION => duration = float(data)?,
            _ => {}
        }
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Ok(0);
    }
    // Duration is in TimecodeScale units (nanoseconds per unit).
    Ok((duration * scale as f64 / 1_000_000.0).round() as u64)
}

/// Dimensions and codec of the first video track in the `Tracks` payload.
fn parse_tracks(buf: &[u8]) -> ProbeResult<Option<(u32, u32, String)>> {
    for (id, entry) in elements(buf)? {
        if id != TRACK_ENTRY {
            continue;
        }
        let mut track_type = 0;
        let mut codec = String::new();
        let mut width = 0;
        let mut height = 0;
        for (child, data) in elements(entry)? {
            match child {
                TRACK_TYPE => track_type = uint(data),
                CODEC_ID => codec = String::from_utf8_lossy(data).into_owned(),
                VIDEO => {
                    for (field, value) in elements(data)? {
                        match field {
                            PIXEL_WIDTH => width = u32::try_from(uint(value)).unwrap_or(0),
                            PIXEL_HEIGHT => height = u32::try_from(uint(value)).unwrap_or(0),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if track_type == TRACK_TYPE_VIDEO {
            return Ok(Some((width, height, codec)));
        }
    }
    Ok(None)
}

/// Read an element header from the stream. Returns (id, size, header length).
fn read_header<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    end: u64,
) -> ProbeResult<(u32, Option<u64>, u64)> {
    let available = (end - offset).min(12);
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; available as usize];
    reader.read_exact(&mut buf)?;

    let (id, id_len) = read_id(&buf)?;
    let (size, size_len) = read_size(&buf[id_len..])?;
    Ok((id, size, (id_len + size_len) as u64))
}

/// Probe a Matroska/WebM file.
pub fn probe<R: Read + Seek>(reader: &mut R, len: u64) -> ProbeResult<MediaInfo> {
    let (id, size, header_len) = read_header(reader, 0, len)?;
    if id != EBML_HEADER {
        return Err(ProbeError::Unsupported);
    }
    let size = size.ok_or_else(|| ProbeError::truncated("EBML header of unknown size"))?;
    let segment_offset = header_len.saturating_add(size);
    if segment_offset >= len {
        return Err(ProbeError::truncated("missing segment"));
    }

    let (id, size, header_len) = read_header(reader, segment_offset, len)?;
    if id != SEGMENT {
        return Err(ProbeError::truncated("expected segment after EBML header"));
    }
    let segment_start = segment_offset + header_len;
    // A live or cut-short file may declare an unknown or oversized segment.
    let segment_end = size
        .map_or(len, |s| segment_start.saturating_add(s))
        .min(len);

    let mut duration_ms = None;
    let mut video = None;
    let mut offset = segment_start;
    while offset < segment_end && (duration_ms.is_none() || video.is_none()) {
        let (id, size, header_len) = read_header(reader, offset, segment_end)?;
        let payload_start = offset + header_len;
        match (id, size) {
            (INFO, Some(size)) => {
                duration_ms = Some(parse_info(&read_at(reader, payload_start, size)?)?);
            }
            (TRACKS, Some(size)) => {
                video = Some(parse_tracks(&read_at(reader, payload_start, size)?)?);
            }
            (_, None) => break,
            _ => {}
        }
        offset = match size {
            Some(size) => payload_start.saturating_add(size),
            None => break,
        };
    }

    let duration_ms = duration_ms.ok_or_else(|| ProbeError::truncated("missing segment info"))?;
    let (width, height, codec) = video
        .flatten()
        .ok_or_else(|| ProbeError::truncated("no video track"))?;

    Ok(MediaInfo {
        duration_ms,
        width,
        height,
        codec: canonical_codec(&codec),
    })
}
