//! Wire codec for the SSH agent protocol.
//!
//! ```text
//! [u32 BE length] [payload: length bytes]
//! ```
//!
//! `payload[0]` is the opcode; the length word is not part of the payload.
//! An incremental decoder: feed bytes in, pull complete frames out, keep the
//! remainder buffered for the next read.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{GubingeError, Result};
use crate::proto::opcode::Opcode;

/// Arbitrary limit taken from `ssh-agent.c` in OpenSSH.
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// One parsed agent-protocol message: an opcode and its full payload
/// (opcode byte included, body kept opaque past it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl AgentMessage {
    /// Build a message from a raw payload, classifying its opcode.
    ///
    /// Fails with [`GubingeError::MessageInvalid`] on a zero-length payload
    /// or an unrecognised opcode.
    pub fn from_payload(payload: Vec<u8>) -> Result<Self> {
        let Some(&first) = payload.first() else {
            return Err(GubingeError::MessageInvalid("empty payload".into()));
        };
        let opcode = Opcode::from_byte(first)
            .ok_or_else(|| GubingeError::MessageInvalid(format!("unrecognised opcode {first}")))?;
        Ok(Self { opcode, payload })
    }

    /// Construct a message directly from an opcode and body bytes (used to
    /// build synthetic responses where the body is computed in Rust rather
    /// than copied off the wire).
    pub fn new(opcode: Opcode, body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(opcode.as_byte());
        payload.extend_from_slice(body);
        Self { opcode, payload }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The full payload, opcode byte included.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The body, with the opcode byte stripped off.
    pub fn body(&self) -> &[u8] {
        &self.payload[1..]
    }
}

/// Decode at most one frame from the front of `buffer`.
///
/// Returns `(remainder, None)` when fewer than 4 length-prefix bytes are
/// buffered, or when the length prefix names a frame that hasn't fully
/// arrived yet — in both cases `buffer` is returned untouched so the caller
/// can append more bytes and retry. Returns `(remainder, Some(message))`
/// once a whole frame is available, with the frame's bytes consumed from
/// the front.
pub fn decode_one(buffer: &[u8]) -> Result<(&[u8], Option<AgentMessage>)> {
    if buffer.len() < 4 {
        return Ok((buffer, None));
    }
    let length = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;

    if length == 0 {
        return Err(GubingeError::MessageInvalid("zero-length frame".into()));
    }
    if length > MAX_MESSAGE_SIZE {
        return Err(GubingeError::StreamException(format!(
            "frame length {length} exceeds max {MAX_MESSAGE_SIZE}"
        )));
    }

    let rest = &buffer[4..];
    if rest.len() < length {
        return Ok((buffer, None));
    }

    let payload = rest[..length].to_vec();
    let remainder = &rest[length..];
    let message = AgentMessage::from_payload(payload)?;
    Ok((remainder, Some(message)))
}

/// Encode a payload as a length-prefixed frame.
pub fn encode_bytes(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write a message's payload to `writer`, framed.
///
/// The two underlying writes (length, then payload) are not interleaved
/// with any other write on `writer` as long as the caller serialises all
/// writes to that writer — the connection pipeline (C4) guarantees this by
/// routing every client-bound and upstream-bound write through a single
/// point per direction.
pub async fn encode<W: AsyncWrite + Unpin>(writer: &mut W, message: &AgentMessage) -> Result<()> {
    writer.write_all(&encode_bytes(message.payload())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(opcode: u8, body: &[u8]) -> Vec<u8> {
        let mut p = vec![opcode];
        p.extend_from_slice(body);
        p
    }

    #[test]
    fn decodes_a_single_whole_frame() {
        let payload = payload_of(1, b"");
        let frame = encode_bytes(&payload);
        let (remainder, msg) = decode_one(&frame).unwrap();
        let msg = msg.expect("frame should decode");
        assert_eq!(msg.payload(), payload.as_slice());
        assert!(remainder.is_empty());
    }

    #[test]
    fn returns_none_on_short_length_prefix() {
        let (remainder, msg) = decode_one(&[0, 0, 1]).unwrap();
        assert!(msg.is_none());
        assert_eq!(remainder, &[0, 0, 1]);
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let payload = payload_of(11, b"hello");
        let mut frame = encode_bytes(&payload);
        frame.truncate(frame.len() - 2);
        let (remainder, msg) = decode_one(&frame).unwrap();
        assert!(msg.is_none());
        assert_eq!(remainder.len(), frame.len());
    }

    #[test]
    fn rejects_zero_length_frame() {
        let frame = 0u32.to_be_bytes();
        let err = decode_one(&frame).unwrap_err();
        assert!(matches!(err, GubingeError::MessageInvalid(_)));
    }

    #[test]
    fn rejects_oversized_frame() {
        let length = (MAX_MESSAGE_SIZE + 1) as u32;
        let frame = length.to_be_bytes();
        let err = decode_one(&frame).unwrap_err();
        assert!(matches!(err, GubingeError::StreamException(_)));
    }

    #[test]
    fn rejects_unrecognised_opcode() {
        let payload = payload_of(127, b"");
        let frame = encode_bytes(&payload);
        let err = decode_one(&frame).unwrap_err();
        assert!(matches!(err, GubingeError::MessageInvalid(_)));
    }

    /// Frame chunking invariance: feeding a multi-message stream
    /// through the decoder one byte at a time yields the same messages, in
    /// the same order, as feeding it whole.
    #[test]
    fn chunking_invariance_byte_at_a_time() {
        let messages = vec![
            payload_of(1, b""),
            payload_of(11, b"abc"),
            payload_of(13, b"xyz123"),
        ];
        let mut stream = Vec::new();
        for m in &messages {
            stream.extend_from_slice(&encode_bytes(m));
        }

        let mut decoded = Vec::new();
        let mut buf: Vec<u8> = Vec::new();
        for byte in stream {
            buf.push(byte);
            loop {
                let (remainder_len, msg) = {
                    let (remainder, msg) = decode_one(&buf).unwrap();
                    (remainder.len(), msg)
                };
                match msg {
                    Some(m) => {
                        let consumed = buf.len() - remainder_len;
                        decoded.push(m.payload().to_vec());
                        buf.drain(..consumed);
                    }
                    None => break,
                }
            }
        }

        assert_eq!(decoded, messages);
    }

    #[test]
    fn multiple_frames_in_one_buffer_decode_in_order() {
        let messages = vec![payload_of(1, b""), payload_of(6, b"")];
        let mut stream = Vec::new();
        for m in &messages {
            stream.extend_from_slice(&encode_bytes(m));
        }

        let mut decoded = Vec::new();
        let mut remaining: &[u8] = &stream;
        loop {
            let (rest, msg) = decode_one(remaining).unwrap();
            remaining = rest;
            match msg {
                Some(m) => decoded.push(m.payload().to_vec()),
                None => break,
            }
        }
        assert_eq!(decoded, messages);
    }
}
