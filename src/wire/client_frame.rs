// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client↔server frame encode/decode (spec §4.1).
//!
//! ```text
//! client -> server: contentSize:u32 | msgIdLen:u8 | msgId:UTF8 | msgSeq:u16 | stageId:u64 | payload
//! server -> client: contentSize:u32 | msgIdLen:u8 | msgId:UTF8 | msgSeq:u16 | stageId:u64 | errorCode:u16 | originalSize:u32 | payload
//! ```
//!
//! All integers are little-endian. `originalSize == 0` means `payload`
//! is stored verbatim; otherwise it is LZ4-compressed and `originalSize`
//! is its decompressed length. Decoding is restartable: [`FrameReader`]
//! buffers across TCP chunk boundaries and only yields a frame once
//! `contentSize` bytes are available.

use crate::{
    error::PlayHouseError,
    wire::compression,
};

/// The largest value a one-byte length prefix can hold.
const MAX_MSG_ID_LEN: usize = u8::MAX as usize;

/// A decoded client → server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    /// Logical message type name.
    pub msg_id: String,
    /// `0` for a push/one-way message; otherwise the request sequence.
    pub msg_seq: u16,
    /// The stage this message targets, or `0` if none.
    pub stage_id: u64,
    /// The (always uncompressed) message body.
    pub payload: Vec<u8>,
}

/// A decoded server → client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    /// Echo of the request's `msgId`, or the push's own `msgId`.
    pub msg_id: String,
    /// Echo of the request's `msgSeq`, or `0` for a push.
    pub msg_seq: u16,
    /// Echo of the request's `stageId`.
    pub stage_id: u64,
    /// `0` on success.
    pub error_code: u16,
    /// The (always uncompressed, by the time the caller sees it) body.
    pub payload: Vec<u8>,
}

fn check_msg_id(msg_id: &str) -> Result<(), PlayHouseError> {
    if msg_id.len() > MAX_MSG_ID_LEN {
        Err(PlayHouseError::MsgIdOverflow)
    } else {
        Ok(())
    }
}

fn check_body(len: usize, max_body_size: u32) -> Result<(), PlayHouseError> {
    if len > max_body_size as usize {
        Err(PlayHouseError::BodyOverflow)
    } else {
        Ok(())
    }
}

/// Encode a client → server frame. Pure function of its input.
pub fn encode_client_frame(frame: &ClientFrame, max_body_size: u32) -> Result<Vec<u8>, PlayHouseError> {
    check_msg_id(&frame.msg_id)?;
    check_body(frame.payload.len(), max_body_size)?;

    let mut body = Vec::with_capacity(1 + frame.msg_id.len() + 2 + 8 + frame.payload.len());
    body.push(frame.msg_id.len() as u8);
    body.extend_from_slice(frame.msg_id.as_bytes());
    body.extend_from_slice(&frame.msg_seq.to_le_bytes());
    body.extend_from_slice(&frame.stage_id.to_le_bytes());
    body.extend_from_slice(&frame.payload);

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one client → server frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame (the
/// caller should buffer more bytes and retry); never consumes partial
/// data in that case.
pub fn decode_client_frame(
    buf: &[u8],
    max_body_size: u32,
) -> Result<Option<(ClientFrame, usize)>, PlayHouseError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let content_size = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let total_len = 4 + content_size;
    if buf.len() < total_len {
        return Ok(None);
    }
    let body = &buf[4..total_len];
    if body.is_empty() {
        return Err(PlayHouseError::Truncated);
    }
    let msg_id_len = body[0] as usize;
    let mut cursor = 1usize;
    if body.len() < cursor + msg_id_len + 2 + 8 {
        return Err(PlayHouseError::Truncated);
    }
    let msg_id = String::from_utf8(body[cursor..cursor + msg_id_len].to_vec())
        .map_err(|_| PlayHouseError::Truncated)?;
    cursor += msg_id_len;
    let msg_seq = u16::from_le_bytes(body[cursor..cursor + 2].try_into().unwrap());
    cursor += 2;
    let stage_id = u64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;
    let payload = body[cursor..].to_vec();
    check_body(payload.len(), max_body_size)?;

    Ok(Some((
        ClientFrame {
            msg_id,
            msg_seq,
            stage_id,
            payload,
        },
        total_len,
    )))
}

/// Encode a server → client frame, compressing the payload with LZ4 if
/// it exceeds `compression_threshold` bytes and compression actually
/// shrinks it.
pub fn encode_server_frame(
    frame: &ServerFrame,
    max_body_size: u32,
    compression_threshold: u32,
) -> Result<Vec<u8>, PlayHouseError> {
    check_msg_id(&frame.msg_id)?;
    check_body(frame.payload.len(), max_body_size)?;

    let compressed = if frame.payload.len() as u32 > compression_threshold {
        compression::compress(&frame.payload)
    } else {
        None
    };
    match compressed {
        Some(compressed) => encode_server_frame_raw(frame, &compressed, frame.payload.len() as u32),
        None => encode_server_frame_raw(frame, &frame.payload, 0),
    }
}

fn encode_server_frame_raw(
    frame: &ServerFrame,
    wire_payload: &[u8],
    original_size: u32,
) -> Result<Vec<u8>, PlayHouseError> {
    let mut body = Vec::with_capacity(1 + frame.msg_id.len() + 2 + 8 + 2 + 4 + wire_payload.len());
    body.push(frame.msg_id.len() as u8);
    body.extend_from_slice(frame.msg_id.as_bytes());
    body.extend_from_slice(&frame.msg_seq.to_le_bytes());
    body.extend_from_slice(&frame.stage_id.to_le_bytes());
    body.extend_from_slice(&frame.error_code.to_le_bytes());
    body.extend_from_slice(&original_size.to_le_bytes());
    body.extend_from_slice(wire_payload);

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one server → client frame from the front of `buf`, reversing
/// any LZ4 compression before returning.
pub fn decode_server_frame(
    buf: &[u8],
    max_body_size: u32,
) -> Result<Option<(ServerFrame, usize)>, PlayHouseError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let content_size = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let total_len = 4 + content_size;
    if buf.len() < total_len {
        return Ok(None);
    }
    let body = &buf[4..total_len];
    if body.is_empty() {
        return Err(PlayHouseError::Truncated);
    }
    let msg_id_len = body[0] as usize;
    let mut cursor = 1usize;
    if body.len() < cursor + msg_id_len + 2 + 8 + 2 + 4 {
        return Err(PlayHouseError::Truncated);
    }
    let msg_id = String::from_utf8(body[cursor..cursor + msg_id_len].to_vec())
        .map_err(|_| PlayHouseError::Truncated)?;
    cursor += msg_id_len;
    let msg_seq = u16::from_le_bytes(body[cursor..cursor + 2].try_into().unwrap());
    cursor += 2;
    let stage_id = u64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;
    let error_code = u16::from_le_bytes(body[cursor..cursor + 2].try_into().unwrap());
    cursor += 2;
    let original_size = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap());
    cursor += 4;
    let wire_payload = &body[cursor..];

    let payload = if original_size == 0 {
        wire_payload.to_vec()
    } else {
        compression::decompress(wire_payload, original_size as usize)?
    };
    check_body(payload.len(), max_body_size)?;

    Ok(Some((
        ServerFrame {
            msg_id,
            msg_seq,
            stage_id,
            error_code,
            payload,
        },
        total_len,
    )))
}

/// Accumulates bytes arriving from a TCP stream and yields whole client
/// frames as they become available, so a single `read()` that returns a
/// partial frame (or several frames back to back) is handled uniformly.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    max_body_size: u32,
}

impl FrameReader {
    /// A reader enforcing `max_body_size` (spec §6 `MaxBodySize`).
    pub fn new(max_body_size: u32) -> Self {
        Self {
            buf: Vec::new(),
            max_body_size,
        }
    }

    /// Feed newly-read bytes in and drain every complete frame now
    /// available. Errors are fatal to the connection: the framer does
    /// not attempt to resynchronize after a malformed frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ClientFrame>, PlayHouseError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            match decode_client_frame(&self.buf, self.max_body_size)? {
                Some((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    frames.push(frame);
                }
                None => break,
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client_frame() -> ClientFrame {
        ClientFrame {
            msg_id: "EchoRequest".to_string(),
            msg_seq: 42,
            stage_id: 12345,
            payload: b"hello".to_vec(),
        }
    }

    #[test]
    fn client_frame_round_trips() {
        let frame = sample_client_frame();
        let encoded = encode_client_frame(&frame, 1024).unwrap();
        let (decoded, consumed) = decode_client_frame(&encoded, 1024).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn client_frame_rejects_oversized_msg_id() {
        let mut frame = sample_client_frame();
        frame.msg_id = "x".repeat(300);
        assert!(matches!(
            encode_client_frame(&frame, 1024),
            Err(PlayHouseError::MsgIdOverflow)
        ));
    }

    #[test]
    fn client_frame_rejects_oversized_body() {
        let mut frame = sample_client_frame();
        frame.payload = vec![0u8; 2048];
        assert!(matches!(
            encode_client_frame(&frame, 1024),
            Err(PlayHouseError::BodyOverflow)
        ));
    }

    #[test]
    fn decode_reports_need_more_bytes_without_consuming() {
        let frame = sample_client_frame();
        let encoded = encode_client_frame(&frame, 1024).unwrap();
        let partial = &encoded[..encoded.len() - 1];
        assert_eq!(decode_client_frame(partial, 1024).unwrap(), None);
    }

    #[test]
    fn frame_reader_handles_split_and_coalesced_chunks() {
        let a = sample_client_frame();
        let mut b = sample_client_frame();
        b.msg_id = "BroadcastTrigger".to_string();
        b.msg_seq = 0;
        let enc_a = encode_client_frame(&a, 1024).unwrap();
        let enc_b = encode_client_frame(&b, 1024).unwrap();

        let mut reader = FrameReader::new(1024);
        // split frame A across two feeds
        let split = enc_a.len() / 2;
        assert!(reader.feed(&enc_a[..split]).unwrap().is_empty());
        let mut got = reader.feed(&enc_a[split..]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got.remove(0), a);

        // two frames arriving in one chunk
        let mut combined = enc_a.clone();
        combined.extend_from_slice(&enc_b);
        let got = reader.feed(&combined).unwrap();
        assert_eq!(got, vec![a, b]);
    }

    #[test]
    fn server_frame_below_threshold_is_uncompressed() {
        let frame = ServerFrame {
            msg_id: "EchoReply".to_string(),
            msg_seq: 42,
            stage_id: 12345,
            error_code: 0,
            payload: b"hi".to_vec(),
        };
        let encoded = encode_server_frame(&frame, 4096, 512).unwrap();
        let (decoded, consumed) = decode_server_frame(&encoded, 4096).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, frame);
        // originalSize field (bytes at a fixed offset) must read 0.
        let original_size_offset = 4 + 1 + frame.msg_id.len() + 2 + 8 + 2;
        assert_eq!(
            u32::from_le_bytes(encoded[original_size_offset..original_size_offset + 4].try_into().unwrap()),
            0
        );
    }

    #[test]
    fn server_frame_exactly_at_threshold_is_uncompressed() {
        let frame = ServerFrame {
            msg_id: "AtThreshold".to_string(),
            msg_seq: 1,
            stage_id: 1,
            error_code: 0,
            payload: vec![7u8; 512],
        };
        let encoded = encode_server_frame(&frame, 1 << 20, 512).unwrap();
        let original_size_offset = 4 + 1 + frame.msg_id.len() + 2 + 8 + 2;
        assert_eq!(
            u32::from_le_bytes(encoded[original_size_offset..original_size_offset + 4].try_into().unwrap()),
            0,
            "a payload exactly at the threshold must not be compressed (spec: only payloads exceeding it are)"
        );
        let (decoded, _) = decode_server_frame(&encoded, 1 << 20).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn server_frame_above_threshold_is_lz4_compressed_and_restores_exactly() {
        let frame = ServerFrame {
            msg_id: "BigReply".to_string(),
            msg_seq: 7,
            stage_id: 1,
            error_code: 0,
            payload: vec![9u8; 4096],
        };
        let encoded = encode_server_frame(&frame, 1 << 20, 512).unwrap();
        assert!(encoded.len() < frame.payload.len(), "should have compressed");
        let (decoded, _) = decode_server_frame(&encoded, 1 << 20).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }
}
