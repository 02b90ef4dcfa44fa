//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Frame Format (requests and responses)
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Tag (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! The tag is the command type for requests and the status for responses.
//! Lengths are big-endian.
//!
//! ### Request payloads
//! - GET:  key_len (4 bytes) + key
//! - PUT:  key_len (4 bytes) + key + value
//! - PING: empty

use std::io::{Read, Write};

use crate::error::{AllyError, Result};

use super::{Command, CommandType, Response, Status};

/// Header size: 1 byte tag + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Frames
// =============================================================================

fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.push(tag);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a complete frame into (tag, payload), checking the declared length
fn split_frame<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(AllyError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = payload_len(&bytes[..HEADER_SIZE], what)?;
    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(AllyError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

fn payload_len(header: &[u8], what: &str) -> Result<usize> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_PAYLOAD_SIZE {
        return Err(AllyError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(len as usize)
}

/// Read one frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let len = payload_len(&header, what)?;
    let mut frame = vec![0u8; HEADER_SIZE + len];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_SIZE..])?;

    Ok(frame)
}

fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
pub fn encode_command(command: &Command) -> Vec<u8> {
    let payload = match command {
        Command::Get { key } => key_payload(key, &[]),
        Command::Put { key, value } => key_payload(key, value),
        Command::Ping => Vec::new(),
    };
    encode_frame(command.command_type() as u8, &payload)
}

/// Decode a command from a complete frame
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (tag, payload) = split_frame(bytes, "command")?;

    match CommandType::try_from(tag)? {
        CommandType::Get => {
            let (key, rest) = split_key(payload, "GET")?;
            if !rest.is_empty() {
                return Err(AllyError::Protocol(format!(
                    "GET command: {} trailing bytes after key",
                    rest.len()
                )));
            }
            Ok(Command::Get { key: key.to_vec() })
        }
        CommandType::Put => {
            let (key, value) = split_key(payload, "PUT")?;
            Ok(Command::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            })
        }
        CommandType::Ping if payload.is_empty() => Ok(Command::Ping),
        CommandType::Ping => Err(AllyError::Protocol(format!(
            "PING command: unexpected payload of {} bytes",
            payload.len()
        ))),
    }
}

/// key_len (4) + key + rest
fn key_payload(key: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + key.len() + rest.len());
    payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
    payload.extend_from_slice(key);
    payload.extend_from_slice(rest);
    payload
}

/// Split a length-prefixed key off the front of a payload
fn split_key<'a>(payload: &'a [u8], command: &str) -> Result<(&'a [u8], &'a [u8])> {
    if payload.len() < 4 {
        return Err(AllyError::Protocol(format!(
            "{} command: missing key length",
            command
        )));
    }

    let key_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let body = &payload[4..];
    if body.len() < key_len {
        return Err(AllyError::Protocol(format!(
            "{} command: incomplete key (expected {}, got {})",
            command,
            key_len,
            body.len()
        )));
    }

    Ok(body.split_at(key_len))
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    encode_frame(response.status as u8, payload)
}

/// Decode a response from a complete frame
///
/// An empty payload decodes as `None`.
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (tag, payload) = split_frame(bytes, "response")?;
    let status = Status::try_from(tag)?;
    let payload = (!payload.is_empty()).then(|| payload.to_vec());

    Ok(Response { status, payload })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    decode_command(&read_frame(reader, "command")?)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    write_frame(writer, &encode_command(command))
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader, "response")?)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, &encode_response(response))
}
