//! Multiplexed stream demultiplexing
//!
//! Attached exec and log streams of non-TTY containers interleave stdout and
//! stderr as frames: `[stream, 0, 0, 0, len (u32 big endian)]` followed by
//! `len` payload bytes, where stream is 0 (stdin), 1 (stdout) or 2 (stderr).

const HEADER_LEN: usize = 8;

fn is_header(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN && buf[0] <= 2 && buf[1..4] == [0, 0, 0]
}

/// Strip frame headers and concatenate the payloads
///
/// Input that does not start with a frame header is returned unchanged.
/// A truncated trailing frame contributes whatever payload is present.
pub fn demux_frames(buf: &[u8]) -> Vec<u8> {
    if !is_header(buf) {
        return buf.to_vec();
    }

    let mut out = Vec::with_capacity(buf.len());
    let mut rest = buf;

    while is_header(rest) {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let payload = &rest[HEADER_LEN..];
        let take = len.min(payload.len());
        out.extend_from_slice(&payload[..take]);
        rest = &payload[take..];
    }

    // Trailing bytes that don't form a header are kept as-is
    out.extend_from_slice(rest);
    out
}
