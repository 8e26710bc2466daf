//! AVI (RIFF) header parsing.
//!
//! Only the `hdrl` list is read: `avih` gives frame period, frame count and
//! dimensions, the first `strl` with a `vids` stream header gives the codec
//! handler (falling back to the `strf` compression four-cc).

use std::io::{Read, Seek, SeekFrom};

use super::{canonical_codec, fourcc, read_at, MediaInfo, ProbeError, ProbeResult};

fn le_u32(buf: &[u8], at: usize) -> ProbeResult<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ProbeError::truncated("short AVI chunk"))
}

fn tag(buf: &[u8], at: usize) -> ProbeResult<[u8; 4]> {
    buf.get(at..at + 4)
        .map(|b| [b[0], b[1], b[2], b[3]])
        .ok_or_else(|| ProbeError::truncated("short AVI chunk"))
}

/// Chunks of a buffered list payload as (id, data).
fn chunks(mut buf: &[u8]) -> ProbeResult<Vec<([u8; 4], &[u8])>> {
    let mut out = Vec::new();
    while buf.len() >= 8 {
        let id = tag(buf, 0)?;
        let size = le_u32(buf, 4)? as usize;
        let end = 8usize
            .checked_add(size)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| ProbeError::truncated("AVI chunk overruns its list"))?;
        out.push((id, &buf[8..end]));
        // Chunks are padded to an even length.
        let next = (end + (size & 1)).min(buf.len());
        buf = &buf[next..];
    }
    Ok(out)
}

/// Codec of a stream list, or `None` when it is not a video stream.
fn parse_strl(strl: &[u8]) -> ProbeResult<Option<String>> {
    let mut handler = None;
    let mut compression = None;
    let mut is_video = false;
    for (id, data) in chunks(strl)? {
        match &id {
            b"strh" => {
                is_video = &tag(data, 0)? == b"vids";
                handler = Some(fourcc(tag(data, 4)?));
            }
            // BITMAPINFOHEADER: biCompression at offset 16.
            b"strf" => compression = tag(data, 16).ok().map(fourcc),
            _ => {}
        }
    }
    if !is_video {
        return Ok(None);
    }
    let codec = handler
        .filter(|h| !h.trim().is_empty())
        .or(compression)
        .unwrap_or_default();
    Ok(Some(codec))
}

/// Probe an AVI file.
pub fn probe<R: Read + Seek>(reader: &mut R, len: u64) -> ProbeResult<MediaInfo> {
    // RIFF header (12 bytes), then the first chunk must be LIST hdrl.
    if len < 24 {
        return Err(ProbeError::truncated("file too short for AVI header"));
    }
    reader.seek(SeekFrom::Start(12))?;
    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    if &header[..4] != b"LIST" || &header[8..12] != b"hdrl" {
        return Err(ProbeError::truncated("missing hdrl list"));
    }
    let list_size = u64::from(u32::from_le_bytes([header[4], header[5], header[6], header[7]]));
    if list_size < 4 || 20 + list_size > len {
        return Err(ProbeError::truncated("hdrl list overruns the file"));
    }
    let hdrl = read_at(reader, 24, list_size - 4)?;

    let mut main = None;
    let mut codec = None;
    for (id, data) in chunks(&hdrl)? {
        match &id {
            b"avih" => {
                main = Some((
                    le_u32(data, 0)?,
                    le_u32(data, 16)?,
                    le_u32(data, 32)?,
                    le_u32(data, 36)?,
                ));
            }
            b"LIST" if codec.is_none() && data.get(..4) == Some(b"strl".as_slice()) => {
                codec = parse_strl(&data[4..])?;
            }
            _ => {}
        }
    }

    let (micros_per_frame, frames, width, height) =
        main.ok_or_else(|| ProbeError::truncated("missing avih chunk"))?;
    let codec = codec.ok_or_else(|| ProbeError::truncated("no video stream"))?;
    let duration_ms = u64::from(micros_per_frame) * u64::from(frames) / 1000;

    Ok(MediaInfo {
        duration_ms,
        width,
        height,
        codec: canonical_codec(&codec),
    })
}
