// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire layout for the three message kinds exchanged between a worker and
//! its clients:
//!
//! ```text
//! frame := uint32 totalLen | uint8 type | payload
//! type ∈ { 0x01 ReadRequest, 0x02 CancelRequest, 0x10 ReadResponse }
//! ReadRequest   := uint64 blockId | int64 offset | int64 length
//!                | int64 lockId   | int64 sessionId
//! CancelRequest := uint64 blockId
//! ReadResponse  := uint64 blockId | uint16 status | uint32 payloadLen | bytes
//! status ∈ { 0 SUCCESS, 1 CANCELLED, 2 ERROR (followed by utf8 message) }
//! ```
//!
//! `totalLen` covers everything after itself (the type byte plus payload).
//! A zero-byte `SUCCESS` payload is end-of-stream.

use std::mem::size_of;

use anyhow::{Context, Result, anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, I64, U16, U64};

/// Sentinel written for an absent `lockId`/`sessionId` (a generic-file
/// request rather than a tracked block).
pub const NO_TOKEN: i64 = -1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    ReadRequest = 0x01,
    CancelRequest = 0x02,
    ReadResponse = 0x10,
}

impl MessageType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => Self::ReadRequest,
            0x02 => Self::CancelRequest,
            0x10 => Self::ReadResponse,
            _ => return None,
        })
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawReadRequest {
    block_id: U64<BigEndian>,
    offset: I64<BigEndian>,
    length: I64<BigEndian>,
    lock_id: I64<BigEndian>,
    session_id: I64<BigEndian>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub block_id: u64,
    pub offset: i64,
    pub length: i64,
    pub lock_id: Option<i64>,
    pub session_id: Option<i64>,
}

impl ReadRequest {
    fn encode_payload(&self, buf: &mut BytesMut) {
        let raw = RawReadRequest {
            block_id: self.block_id.into(),
            offset: self.offset.into(),
            length: self.length.into(),
            lock_id: self.lock_id.unwrap_or(NO_TOKEN).into(),
            session_id: self.session_id.unwrap_or(NO_TOKEN).into(),
        };
        buf.put_slice(raw.as_bytes());
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let raw = RawReadRequest::read_from_bytes(payload)
            .map_err(|_| anyhow!("ReadRequest: payload must be {} bytes", size_of::<RawReadRequest>()))?;
        let lock_id = raw.lock_id.get();
        let session_id = raw.session_id.get();
        Ok(Self {
            block_id: raw.block_id.get(),
            offset: raw.offset.get(),
            length: raw.length.get(),
            lock_id: (lock_id != NO_TOKEN).then_some(lock_id),
            session_id: (session_id != NO_TOKEN).then_some(session_id),
        })
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawCancelRequest {
    block_id: U64<BigEndian>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub block_id: u64,
}

impl CancelRequest {
    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(RawCancelRequest { block_id: self.block_id.into() }.as_bytes());
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let raw = RawCancelRequest::read_from_bytes(payload)
            .map_err(|_| anyhow!("CancelRequest: payload must be {} bytes", size_of::<RawCancelRequest>()))?;
        Ok(Self { block_id: raw.block_id.get() })
    }
}

/// Outcome carried by a [`ReadResponse`]. `Error`'s message is the
/// response's trailing bytes decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Cancelled,
    Error(String),
}

impl Status {
    fn code(&self) -> u16 {
        match self {
            Status::Success => 0,
            Status::Cancelled => 1,
            Status::Error(_) => 2,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawReadResponseHead {
    block_id: U64<BigEndian>,
    status: U16<BigEndian>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub block_id: u64,
    pub status: Status,
    /// Raw payload bytes. For `Status::Success`/`Cancelled` these are data
    /// (empty means end-of-stream); for `Status::Error` this field is
    /// unused on the encode side and reconstructed from the message on
    /// decode.
    pub payload: Bytes,
}

impl ReadResponse {
    pub fn success(block_id: u64, payload: Bytes) -> Self {
        Self { block_id, status: Status::Success, payload }
    }

    pub fn end_of_stream(block_id: u64) -> Self {
        Self { block_id, status: Status::Success, payload: Bytes::new() }
    }

    pub fn cancelled(block_id: u64) -> Self {
        Self { block_id, status: Status::Cancelled, payload: Bytes::new() }
    }

    pub fn error(block_id: u64, message: impl Into<String>) -> Self {
        Self {
            block_id,
            status: Status::Error(message.into()),
            payload: Bytes::new(),
        }
    }

    /// `true` for a `Success` response carrying zero bytes.
    pub fn is_eof(&self) -> bool {
        matches!(self.status, Status::Success) && self.payload.is_empty()
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        let body: Bytes = match &self.status {
            Status::Error(msg) => Bytes::copy_from_slice(msg.as_bytes()),
            Status::Success | Status::Cancelled => self.payload.clone(),
        };
        buf.put_slice(
            RawReadResponseHead {
                block_id: self.block_id.into(),
                status: self.status.code().into(),
            }
            .as_bytes(),
        );
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        const HEAD_LEN: usize = size_of::<RawReadResponseHead>();
        if payload.len() < HEAD_LEN + 4 {
            bail!("ReadResponse: payload too short ({} bytes)", payload.len());
        }
        let (head, rest) = payload.split_at(HEAD_LEN);
        let head = RawReadResponseHead::read_from_bytes(head)
            .map_err(|_| anyhow!("ReadResponse: malformed head"))?;
        let mut rest = Bytes::copy_from_slice(rest);
        let payload_len = rest.get_u32() as usize;
        if rest.remaining() != payload_len {
            bail!(
                "ReadResponse: payloadLen {} does not match remaining {} bytes",
                payload_len,
                rest.remaining()
            );
        }
        let body = rest.copy_to_bytes(payload_len);
        let status = match head.status.get() {
            0 => Status::Success,
            1 => Status::Cancelled,
            2 => Status::Error(String::from_utf8(body.to_vec()).context("ERROR message not utf8")?),
            other => bail!("ReadResponse: unknown status code {other}"),
        };
        let payload = if matches!(status, Status::Error(_)) { Bytes::new() } else { body };
        Ok(Self { block_id: head.block_id.get(), status, payload })
    }
}

/// One decoded frame off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    ReadRequest(ReadRequest),
    CancelRequest(CancelRequest),
    ReadResponse(ReadResponse),
}

impl Frame {
    /// Encodes `self` including the leading `totalLen` prefix.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::new();
        let ty = match self {
            Frame::ReadRequest(r) => {
                r.encode_payload(&mut payload);
                MessageType::ReadRequest
            }
            Frame::CancelRequest(c) => {
                c.encode_payload(&mut payload);
                MessageType::CancelRequest
            }
            Frame::ReadResponse(r) => {
                r.encode_payload(&mut payload);
                MessageType::ReadResponse
            }
        };

        let mut out = BytesMut::with_capacity(4 + 1 + payload.len());
        out.put_u32((1 + payload.len()) as u32);
        out.put_u8(ty as u8);
        out.put_slice(&payload);
        out.freeze()
    }

    /// Decodes one frame's body (`type | payload`, i.e. everything after
    /// `totalLen` has already been read off the wire by the caller).
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            bail!("frame body must contain at least the type byte");
        }
        let ty = body.get_u8();
        let ty = MessageType::from_u8(ty).ok_or_else(|| anyhow!("unknown frame type 0x{ty:02x}"))?;
        Ok(match ty {
            MessageType::ReadRequest => Frame::ReadRequest(ReadRequest::decode_payload(&body)?),
            MessageType::CancelRequest => Frame::CancelRequest(CancelRequest::decode_payload(&body)?),
            MessageType::ReadResponse => Frame::ReadResponse(ReadResponse::decode_payload(&body)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_round_trips_with_generic_file_sentinel() {
        let req = ReadRequest {
            block_id: 42,
            offset: 0,
            length: 1024,
            lock_id: None,
            session_id: None,
        };
        let frame = Frame::ReadRequest(req);
        let encoded = frame.encode();
        let total_len = u32::from_be_bytes(encoded[0..4].try_into().unwrap()) as usize;
        assert_eq!(total_len + 4, encoded.len());

        let body = Bytes::copy_from_slice(&encoded[4..]);
        let decoded = Frame::decode_body(body).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn read_request_round_trips_with_tracked_block() {
        let req = ReadRequest {
            block_id: 7,
            offset: 10,
            length: 20,
            lock_id: Some(99),
            session_id: Some(5),
        };
        let encoded = Frame::ReadRequest(req).encode();
        let body = Bytes::copy_from_slice(&encoded[4..]);
        let Frame::ReadRequest(decoded) = Frame::decode_body(body).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.lock_id, Some(99));
        assert_eq!(decoded.session_id, Some(5));
    }

    #[test]
    fn read_response_empty_payload_is_eof() {
        let resp = ReadResponse::end_of_stream(1);
        assert!(resp.is_eof());
        let encoded = Frame::ReadResponse(resp).encode();
        let body = Bytes::copy_from_slice(&encoded[4..]);
        let Frame::ReadResponse(decoded) = Frame::decode_body(body).unwrap() else {
            panic!("wrong variant");
        };
        assert!(decoded.is_eof());
    }

    #[test]
    fn read_response_error_carries_utf8_message() {
        let resp = ReadResponse::error(3, "backing store unavailable");
        let encoded = Frame::ReadResponse(resp).encode();
        let body = Bytes::copy_from_slice(&encoded[4..]);
        let Frame::ReadResponse(decoded) = Frame::decode_body(body).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.status, Status::Error("backing store unavailable".to_string()));
    }

    #[test]
    fn cancel_request_round_trips() {
        let encoded = Frame::CancelRequest(CancelRequest { block_id: 55 }).encode();
        let body = Bytes::copy_from_slice(&encoded[4..]);
        assert_eq!(
            Frame::decode_body(body).unwrap(),
            Frame::CancelRequest(CancelRequest { block_id: 55 })
        );
    }
}
