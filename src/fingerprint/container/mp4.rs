//! ISO base media file format (MP4/MOV) header parsing.
//!
//! Reads `moov/mvhd` for the movie duration and the first `trak` whose
//! `mdia/hdlr` handler is `vide` for dimensions (`tkhd`) and codec
//! (`mdia/minf/stbl/stsd`).

use std::io::{Read, Seek, SeekFrom};

use super::{canonical_codec, fourcc, read_at, ticks_to_ms, MediaInfo, ProbeError, ProbeResult};

/// A box located in the file: its type and payload range.
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: [u8; 4],
    payload_start: u64,
    end: u64,
}

impl BoxHeader {
    fn payload_len(&self) -> u64 {
        self.end - self.payload_start
    }
}

/// List the child boxes between `start` and `end` without reading payloads.
fn children<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> ProbeResult<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut offset = start;

    while offset + 8 <= end {
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;

        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];
        let (size, header_len) = match size32 {
            0 => (end - offset, 8),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (u64::from_be_bytes(large), 16)
            }
            n => (u64::from(n), 8),
        };

        if size < header_len || offset.saturating_add(size) > end {
            return Err(ProbeError::truncated(format!(
                "box '{}' at offset {} overruns its parent",
                fourcc(kind),
                offset
            )));
        }

        boxes.push(BoxHeader {
            kind,
            payload_start: offset + header_len,
            end: offset + size,
        });
        offset += size;
    }

    Ok(boxes)
}

fn find(boxes: &[BoxHeader], kind: &[u8; 4]) -> Option<BoxHeader> {
    boxes.iter().copied().find(|b| &b.kind == kind)
}

fn be_u16(buf: &[u8], at: usize) -> ProbeResult<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| ProbeError::truncated("short box payload"))
}

fn be_u32(buf: &[u8], at: usize) -> ProbeResult<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ProbeError::truncated("short box payload"))
}

fn be_u64(buf: &[u8], at: usize) -> ProbeResult<u64> {
    buf.get(at..at + 8)
        .map(|b| u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| ProbeError::truncated("short box payload"))
}

/// Movie duration in milliseconds from an `mvhd` payload.
fn parse_mvhd(payload: &[u8]) -> ProbeResult<u64> {
    let version = *payload
        .first()
        .ok_or_else(|| ProbeError::truncated("empty mvhd"))?;
    let (timescale, duration) = if version == 1 {
        (be_u32(payload, 20)?, be_u64(payload, 24)?)
    } else {
        let duration = be_u32(payload, 16)?;
        // All ones marks an unknown duration.
        let duration = if duration == u32::MAX { 0 } else { u64::from(duration) };
        (be_u32(payload, 12)?, duration)
    };
    if timescale == 0 {
        return Err(ProbeError::truncated("mvhd timescale is zero"));
    }
    Ok(ticks_to_ms(duration, u64::from(timescale)))
}

/// Track width and height (16.16 fixed point, integer part) from `tkhd`.
fn parse_tkhd(payload: &[u8]) -> ProbeResult<(u32, u32)> {
    let version = *payload
        .first()
        .ok_or_else(|| ProbeError::truncated("empty tkhd"))?;
    let base = if version == 1 { 4 + 84 } else { 4 + 72 };
    Ok((be_u32(payload, base)? >> 16, be_u32(payload, base + 4)? >> 16))
}

/// Codec four-cc and coded dimensions of the first `stsd` sample entry.
fn parse_stsd(payload: &[u8]) -> ProbeResult<(String, u32, u32)> {
    if be_u32(payload, 4)? == 0 {
        return Err(ProbeError::truncated("stsd has no sample entries"));
    }
    let kind = payload
        .get(12..16)
        .map(|b| [b[0], b[1], b[2], b[3]])
        .ok_or_else(|| ProbeError::truncated("short stsd entry"))?;
    // Visual sample entry: 8-byte box header, 24 bytes of fields, then width/height.
    let width = be_u16(payload, 8 + 8 + 24).map(u32::from).unwrap_or(0);
    let height = be_u16(payload, 8 + 8 + 26).map(u32::from).unwrap_or(0);
    Ok((fourcc(kind), width, height))
}

/// Dimensions and codec of a `trak`, or `None` when it is not a video track.
fn parse_video_trak<R: Read + Seek>(
    reader: &mut R,
    trak: BoxHeader,
) -> ProbeResult<Option<(u32, u32, String)>> {
    let trak_children = children(reader, trak.payload_start, trak.end)?;
    let Some(mdia) = find(&trak_children, b"mdia") else {
        return Ok(None);
    };
    let mdia_children = children(reader, mdia.payload_start, mdia.end)?;
    let Some(hdlr) = find(&mdia_children, b"hdlr") else {
        return Ok(None);
    };
    let hdlr_payload = read_at(reader, hdlr.payload_start, hdlr.payload_len())?;
    if hdlr_payload.get(8..12) != Some(b"vide".as_slice()) {
        return Ok(None);
    }

    let (mut width, mut height) = match find(&trak_children, b"tkhd") {
        Some(tkhd) => parse_tkhd(&read_at(reader, tkhd.payload_start, tkhd.payload_len())?)?,
        None => (0, 0),
    };

    let minf = find(&mdia_children, b"minf")
        .ok_or_else(|| ProbeError::truncated("video track without minf"))?;
    let minf_children = children(reader, minf.payload_start, minf.end)?;
    let stbl = find(&minf_children, b"stbl")
        .ok_or_else(|| ProbeError::truncated("video track without stbl"))?;
    let stbl_children = children(reader, stbl.payload_start, stbl.end)?;
    let stsd = find(&stbl_children, b"stsd")
        .ok_or_else(|| ProbeError::truncated("video track without stsd"))?;
    let (codec, coded_width, coded_height) =
        parse_stsd(&read_at(reader, stsd.payload_start, stsd.payload_len())?)?;

    if width == 0 || height == 0 {
        width = coded_width;
        height = coded_height;
    }
    Ok(Some((width, height, codec)))
}

/// Probe an ISO base media file.
pub fn probe<R: Read + Seek>(reader: &mut R, len: u64) -> ProbeResult<MediaInfo> {
    let top = children(reader, 0, len)?;
    let moov = find(&top, b"moov").ok_or_else(|| ProbeError::truncated("missing moov box"))?;
    let moov_children = children(reader, moov.payload_start, moov.end)?;

    let mvhd = find(&moov_children, b"mvhd").ok_or_else(|| ProbeError::truncated("missing mvhd box"))?;
    let duration_ms = parse_mvhd(&read_at(reader, mvhd.payload_start, mvhd.payload_len())?)?;

    for trak in moov_children.iter().filter(|b| &b.kind == b"trak") {
        if let Some((width, height, codec)) = parse_video_trak(reader, *trak)? {
            return Ok(MediaInfo {
                duration_ms,
                width,
                height,
                codec: canonical_codec(&codec),
            });
        }
    }

    Err(ProbeError::truncated("no video track"))
}
