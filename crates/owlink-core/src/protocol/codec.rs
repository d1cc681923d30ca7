//! Blocking encoder/decoder for tunnel requests and responses.
//!
//! Wire primitives (all integers big-endian):
//! ```text
//! bool          [0|1]
//! int           [i32]
//! byte block    [len:i32][bytes:len]
//! error string  [len:u16][utf-8:len]
//! address       [8 raw bytes]
//! family list   [count:i32][bytes:count]
//! ```
//! Requests are `[opcode][payload]`; responses are `[RET_SUCCESS][reply]` or
//! `[RET_FAILURE][error string]`.
//!
//! The functions work on any `Read` / `Write` so they run unchanged over a
//! `TcpStream`, a buffered wrapper or an in-memory cursor in tests.  Callers
//! are expected to flush after writing a complete message.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::domain::address::RomId;
use crate::protocol::messages::{
    Command, Reply, ReplyKind, Request, MAX_BLOCK_LEN, RET_FAILURE, RET_SUCCESS,
};

/// Errors that can occur while encoding or decoding tunnel traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The opcode byte is not a recognized command.
    #[error("unknown command: 0x{0:02X}")]
    UnknownCommand(u8),

    /// A payload field is out of range.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A block length exceeds [`MAX_BLOCK_LEN`] or is negative.
    #[error("invalid block length: {0}")]
    InvalidLength(i64),

    /// The underlying stream failed or closed mid-message.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Decoded response header and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Success(Reply),
    Failure(String),
    /// A status byte that is neither success nor failure.
    Desync(u8),
}

// ── Primitive writers ─────────────────────────────────────────────────────────

pub fn write_bool<W: Write + ?Sized>(w: &mut W, value: bool) -> io::Result<()> {
    w.write_all(&[u8::from(value)])
}

pub fn write_u8<W: Write + ?Sized>(w: &mut W, value: u8) -> io::Result<()> {
    w.write_all(&[value])
}

pub fn write_i32<W: Write + ?Sized>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_be_bytes())
}

pub fn write_block<W: Write + ?Sized>(w: &mut W, block: &[u8]) -> io::Result<()> {
    write_i32(w, block.len() as i32)?;
    w.write_all(block)
}

/// Writes a u16-length-prefixed UTF-8 string, truncating at a char boundary
/// if it does not fit.
pub fn write_string<W: Write + ?Sized>(w: &mut W, value: &str) -> io::Result<()> {
    let mut end = value.len().min(u16::MAX as usize);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    w.write_all(&(end as u16).to_be_bytes())?;
    w.write_all(&value.as_bytes()[..end])
}

pub fn write_address<W: Write + ?Sized>(w: &mut W, address: RomId) -> io::Result<()> {
    w.write_all(address.as_bytes())
}

// ── Primitive readers ─────────────────────────────────────────────────────────

pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_bool<R: Read + ?Sized>(r: &mut R) -> io::Result<bool> {
    Ok(read_u8(r)? != 0)
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_length<R: Read + ?Sized>(r: &mut R) -> Result<usize, ProtocolError> {
    let len = read_i32(r)?;
    if len < 0 || len as usize > MAX_BLOCK_LEN {
        return Err(ProtocolError::InvalidLength(i64::from(len)));
    }
    Ok(len as usize)
}

pub fn read_block<R: Read + ?Sized>(r: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = read_length(r)?;
    let mut block = vec![0u8; len];
    r.read_exact(&mut block)?;
    Ok(block)
}

pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<String, ProtocolError> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut bytes = vec![0u8; usize::from(u16::from_be_bytes(len))];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("error string is not UTF-8: {e}")))
}

pub fn read_address<R: Read + ?Sized>(r: &mut R) -> io::Result<RomId> {
    let mut bytes = [0u8; 8];
    r.read_exact(&mut bytes)?;
    Ok(RomId::new(bytes))
}

fn read_enum<R, T>(r: &mut R, what: &str) -> Result<T, ProtocolError>
where
    R: Read + ?Sized,
    T: TryFrom<u8, Error = ()>,
{
    let code = read_i32(r)?;
    u8::try_from(code)
        .ok()
        .and_then(|c| T::try_from(c).ok())
        .ok_or_else(|| ProtocolError::MalformedPayload(format!("unknown {what} code: {code}")))
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Writes `request` as `[opcode][payload]`.
pub fn write_request<W: Write + ?Sized>(w: &mut W, request: &Request) -> io::Result<()> {
    write_u8(w, request.command() as u8)?;
    match request {
        Request::PutBit(bit) => write_bool(w, *bit),
        Request::PutByte(byte) => write_u8(w, *byte),
        Request::GetBlock(len) => write_i32(w, *len as i32),
        Request::DataBlock(block) => write_block(w, block),
        Request::SetPowerDuration(d) | Request::SetProgramPulseDuration(d) => {
            write_i32(w, *d as i32)
        }
        Request::StartPowerDelivery(c) | Request::StartProgramPulse(c) => write_i32(w, *c as i32),
        Request::SetSpeed(speed) => write_i32(w, *speed as i32),
        Request::BeginExclusive { blocking } => write_bool(w, *blocking),
        Request::TargetFamily(families) | Request::ExcludeFamily(families) => {
            write_block(w, families)
        }
        _ => Ok(()),
    }
}

/// Reads one request.  Fails with [`ProtocolError::UnknownCommand`] on an
/// unrecognized opcode, leaving its payload (if any) unread.
pub fn read_request<R: Read + ?Sized>(r: &mut R) -> Result<Request, ProtocolError> {
    let opcode = read_u8(r)?;
    let command = Command::try_from(opcode).map_err(|_| ProtocolError::UnknownCommand(opcode))?;
    read_request_payload(r, command)
}

/// Reads the payload that follows an already-consumed opcode.
pub fn read_request_payload<R: Read + ?Sized>(
    r: &mut R,
    command: Command,
) -> Result<Request, ProtocolError> {
    if let Some(capability) = command.capability() {
        return Ok(Request::Supports(capability));
    }
    Ok(match command {
        Command::CloseConnection => Request::CloseConnection,
        Command::PingConnection => Request::PingConnection,
        Command::Reset => Request::Reset,
        Command::PutBit => Request::PutBit(read_bool(r)?),
        Command::PutByte => Request::PutByte(read_u8(r)?),
        Command::GetBit => Request::GetBit,
        Command::GetByte => Request::GetByte,
        Command::GetBlock => Request::GetBlock(read_length(r)?),
        Command::DataBlock => Request::DataBlock(read_block(r)?),
        Command::SetPowerDuration => Request::SetPowerDuration(read_enum(r, "power duration")?),
        Command::StartPowerDelivery => {
            Request::StartPowerDelivery(read_enum(r, "power change condition")?)
        }
        Command::SetProgramPulseDuration => {
            Request::SetProgramPulseDuration(read_enum(r, "power duration")?)
        }
        Command::StartProgramPulse => {
            Request::StartProgramPulse(read_enum(r, "power change condition")?)
        }
        Command::StartBreak => Request::StartBreak,
        Command::SetPowerNormal => Request::SetPowerNormal,
        Command::SetSpeed => Request::SetSpeed(read_enum(r, "speed")?),
        Command::GetSpeed => Request::GetSpeed,
        Command::BeginExclusive => Request::BeginExclusive {
            blocking: read_bool(r)?,
        },
        Command::EndExclusive => Request::EndExclusive,
        Command::FindFirstDevice => Request::FindFirstDevice,
        Command::FindNextDevice => Request::FindNextDevice,
        Command::GetAddress => Request::GetAddress,
        Command::SetSearchOnlyAlarmingDevices => Request::SetSearchOnlyAlarmingDevices,
        Command::SetNoResetSearch => Request::SetNoResetSearch,
        Command::SetSearchAllDevices => Request::SetSearchAllDevices,
        Command::TargetAllFamilies => Request::TargetAllFamilies,
        Command::TargetFamily => Request::TargetFamily(read_block(r)?),
        Command::ExcludeFamily => Request::ExcludeFamily(read_block(r)?),
        // Capability queries were handled above.
        Command::CanBreak
        | Command::CanDeliverPower
        | Command::CanDeliverSmartPower
        | Command::CanFlex
        | Command::CanHyperdrive
        | Command::CanOverdrive
        | Command::CanProgram => {
            return Err(ProtocolError::MalformedPayload(format!(
                "capability opcode {command:?} without capability"
            )))
        }
    })
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Writes `[RET_SUCCESS][reply]`.
pub fn write_success<W: Write + ?Sized>(w: &mut W, reply: &Reply) -> io::Result<()> {
    write_u8(w, RET_SUCCESS)?;
    match reply {
        Reply::Empty => Ok(()),
        Reply::Bool(value) => write_bool(w, *value),
        Reply::Int(value) => write_i32(w, *value),
        Reply::Byte(value) => write_u8(w, *value),
        Reply::Block(block) => write_block(w, block),
        Reply::Address(address) => write_address(w, *address),
    }
}

/// Writes `[RET_FAILURE][error string]`.
pub fn write_failure<W: Write + ?Sized>(w: &mut W, message: &str) -> io::Result<()> {
    write_u8(w, RET_FAILURE)?;
    write_string(w, message)
}

/// Reads a status byte and, on success, a reply of the given shape.
///
/// An unexpected status byte is returned as [`Response::Desync`] without
/// consuming anything further.
pub fn read_response<R: Read + ?Sized>(
    r: &mut R,
    kind: ReplyKind,
) -> Result<Response, ProtocolError> {
    match read_u8(r)? {
        RET_SUCCESS => {
            let reply = match kind {
                ReplyKind::Empty => Reply::Empty,
                ReplyKind::Bool => Reply::Bool(read_bool(r)?),
                ReplyKind::Int => Reply::Int(read_i32(r)?),
                ReplyKind::Byte => Reply::Byte(read_u8(r)?),
                ReplyKind::Block => Reply::Block(read_block(r)?),
                ReplyKind::Address => Reply::Address(read_address(r)?),
            };
            Ok(Response::Success(reply))
        }
        RET_FAILURE => Ok(Response::Failure(read_string(r)?)),
        other => Ok(Response::Desync(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::transceiver::{Capability, PowerChangeCondition, Speed};
    use std::io::Cursor;

    fn encode(request: &Request) -> Vec<u8> {
        let mut buf = Vec::new();
        write_request(&mut buf, request).unwrap();
        buf
    }

    #[test]
    fn test_data_block_request_layout() {
        let bytes = encode(&Request::DataBlock(vec![0xAA, 0x55]));
        assert_eq!(bytes, vec![0x16, 0, 0, 0, 2, 0xAA, 0x55]);
    }

    #[test]
    fn test_begin_exclusive_carries_blocking_flag() {
        let bytes = encode(&Request::BeginExclusive { blocking: true });
        assert_eq!(bytes, vec![0x1F, 0x01]);
    }

    #[test]
    fn test_target_family_is_counted_list() {
        let bytes = encode(&Request::TargetFamily(vec![0x28, 0x10]));
        assert_eq!(bytes, vec![0x28, 0, 0, 0, 2, 0x28, 0x10]);
    }

    #[test]
    fn test_set_speed_encodes_code_as_int() {
        let bytes = encode(&Request::SetSpeed(Speed::Overdrive));
        assert_eq!(bytes, vec![0x1D, 0, 0, 0, 2]);
    }

    #[test]
    fn test_capability_query_is_bare_opcode() {
        let bytes = encode(&Request::Supports(Capability::Overdrive));
        assert_eq!(bytes, vec![0x2F]);
        let decoded = read_request(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, Request::Supports(Capability::Overdrive));
    }

    #[test]
    fn test_read_request_decodes_power_delivery() {
        let mut cursor = Cursor::new(vec![0x18, 0, 0, 0, 2]);
        let request = read_request(&mut cursor).unwrap();
        assert_eq!(
            request,
            Request::StartPowerDelivery(PowerChangeCondition::AfterNextByte)
        );
    }

    #[test]
    fn test_read_request_rejects_unknown_opcode() {
        let err = read_request(&mut Cursor::new(vec![0x7E])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(0x7E)));
    }

    #[test]
    fn test_read_request_rejects_bad_enum_code() {
        let err = read_request(&mut Cursor::new(vec![0x1D, 0, 0, 0, 9])).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload(_)));
    }

    #[test]
    fn test_read_block_rejects_negative_length() {
        let err = read_block(&mut Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF])).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength(-1)));
    }

    #[test]
    fn test_truncated_request_is_io_error() {
        let err = read_request(&mut Cursor::new(vec![0x16, 0, 0, 0, 4, 1])).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_success_response_with_address() {
        // Arrange
        let address = RomId::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = Vec::new();
        write_success(&mut buf, &Reply::Address(address)).unwrap();

        // Act
        let response = read_response(&mut Cursor::new(&buf), ReplyKind::Address).unwrap();

        // Assert
        assert_eq!(buf, vec![0xFF, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(response, Response::Success(Reply::Address(address)));
    }

    #[test]
    fn test_failure_response_carries_message() {
        let mut buf = Vec::new();
        write_failure(&mut buf, "bus busy").unwrap();
        assert_eq!(&buf[..3], &[0xF0, 0x00, 0x08]);

        let response = read_response(&mut Cursor::new(&buf), ReplyKind::Bool).unwrap();

        assert_eq!(response, Response::Failure("bus busy".into()));
    }

    #[test]
    fn test_unexpected_status_is_desync() {
        let response = read_response(&mut Cursor::new(vec![0x42, 0x01]), ReplyKind::Bool).unwrap();
        assert_eq!(response, Response::Desync(0x42));
    }

    #[test]
    fn test_write_string_truncates_on_char_boundary() {
        let long = "é".repeat(40_000);
        let mut buf = Vec::new();
        write_string(&mut buf, &long).unwrap();
        let decoded = read_string(&mut Cursor::new(&buf)).unwrap();
        assert!(decoded.len() <= u16::MAX as usize);
        assert!(decoded.chars().all(|c| c == 'é'));
    }
}
