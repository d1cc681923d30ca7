//! Tunnel message definitions.
//!
//! Every request is a one-byte opcode followed by an opcode-specific payload;
//! every response is a status byte followed by either the reply payload
//! ([`RET_SUCCESS`]) or an error string ([`RET_FAILURE`]).  The reply shape is
//! fixed by the opcode, so responses carry no type tag of their own.

use crate::bus::transceiver::{Capability, PowerChangeCondition, PowerDuration, Speed};
use crate::domain::address::RomId;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol version exchanged at the start of the handshake.
pub const VERSION_UID: i32 = 1;

/// Status byte: the request succeeded, the reply payload follows.
pub const RET_SUCCESS: u8 = 0xFF;

/// Status byte: the request failed, an error string follows.
pub const RET_FAILURE: u8 = 0xF0;

/// Default TCP port of a tunnel server.
pub const DEFAULT_PORT: u16 = 6161;

/// Default shared secret.
pub const DEFAULT_SECRET: &str = "Adapter Secret Default";

/// Multicast group used for server discovery.
pub const MULTICAST_GROUP: &str = "228.5.6.7";

/// UDP port used for server discovery.
pub const MULTICAST_PORT: u16 = 6163;

/// Largest byte block accepted in a single request.
pub const MAX_BLOCK_LEN: usize = 64 * 1024;

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// One-byte request opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    CloseConnection = 0x08,
    PingConnection = 0x09,
    Reset = 0x10,
    PutBit = 0x11,
    PutByte = 0x12,
    GetBit = 0x13,
    GetByte = 0x14,
    GetBlock = 0x15,
    DataBlock = 0x16,
    SetPowerDuration = 0x17,
    StartPowerDelivery = 0x18,
    SetProgramPulseDuration = 0x19,
    StartProgramPulse = 0x1A,
    StartBreak = 0x1B,
    SetPowerNormal = 0x1C,
    SetSpeed = 0x1D,
    GetSpeed = 0x1E,
    BeginExclusive = 0x1F,
    EndExclusive = 0x20,
    FindFirstDevice = 0x21,
    FindNextDevice = 0x22,
    GetAddress = 0x23,
    SetSearchOnlyAlarmingDevices = 0x24,
    SetNoResetSearch = 0x25,
    SetSearchAllDevices = 0x26,
    TargetAllFamilies = 0x27,
    TargetFamily = 0x28,
    ExcludeFamily = 0x29,
    CanBreak = 0x2A,
    CanDeliverPower = 0x2B,
    CanDeliverSmartPower = 0x2C,
    CanFlex = 0x2D,
    CanHyperdrive = 0x2E,
    CanOverdrive = 0x2F,
    CanProgram = 0x30,
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        Ok(match value {
            0x08 => Command::CloseConnection,
            0x09 => Command::PingConnection,
            0x10 => Command::Reset,
            0x11 => Command::PutBit,
            0x12 => Command::PutByte,
            0x13 => Command::GetBit,
            0x14 => Command::GetByte,
            0x15 => Command::GetBlock,
            0x16 => Command::DataBlock,
            0x17 => Command::SetPowerDuration,
            0x18 => Command::StartPowerDelivery,
            0x19 => Command::SetProgramPulseDuration,
            0x1A => Command::StartProgramPulse,
            0x1B => Command::StartBreak,
            0x1C => Command::SetPowerNormal,
            0x1D => Command::SetSpeed,
            0x1E => Command::GetSpeed,
            0x1F => Command::BeginExclusive,
            0x20 => Command::EndExclusive,
            0x21 => Command::FindFirstDevice,
            0x22 => Command::FindNextDevice,
            0x23 => Command::GetAddress,
            0x24 => Command::SetSearchOnlyAlarmingDevices,
            0x25 => Command::SetNoResetSearch,
            0x26 => Command::SetSearchAllDevices,
            0x27 => Command::TargetAllFamilies,
            0x28 => Command::TargetFamily,
            0x29 => Command::ExcludeFamily,
            0x2A => Command::CanBreak,
            0x2B => Command::CanDeliverPower,
            0x2C => Command::CanDeliverSmartPower,
            0x2D => Command::CanFlex,
            0x2E => Command::CanHyperdrive,
            0x2F => Command::CanOverdrive,
            0x30 => Command::CanProgram,
            _ => return Err(()),
        })
    }
}

impl Command {
    /// The shape of a successful reply to this opcode.
    pub fn reply_kind(self) -> ReplyKind {
        use Command::*;
        match self {
            Reset | GetSpeed => ReplyKind::Int,
            GetBit | FindFirstDevice | FindNextDevice | StartPowerDelivery | StartProgramPulse
            | BeginExclusive | CanBreak | CanDeliverPower | CanDeliverSmartPower | CanFlex
            | CanHyperdrive | CanOverdrive | CanProgram => ReplyKind::Bool,
            GetByte => ReplyKind::Byte,
            GetBlock | DataBlock => ReplyKind::Block,
            GetAddress => ReplyKind::Address,
            _ => ReplyKind::Empty,
        }
    }

    /// The capability query an opcode stands for, if any.
    pub fn capability(self) -> Option<Capability> {
        Some(match self {
            Command::CanBreak => Capability::Break,
            Command::CanDeliverPower => Capability::PowerDelivery,
            Command::CanDeliverSmartPower => Capability::SmartPowerDelivery,
            Command::CanFlex => Capability::Flex,
            Command::CanHyperdrive => Capability::Hyperdrive,
            Command::CanOverdrive => Capability::Overdrive,
            Command::CanProgram => Capability::ProgramPulse,
            _ => return None,
        })
    }

    /// The opcode that queries `capability`.
    pub fn for_capability(capability: Capability) -> Command {
        match capability {
            Capability::Break => Command::CanBreak,
            Capability::PowerDelivery => Command::CanDeliverPower,
            Capability::SmartPowerDelivery => Command::CanDeliverSmartPower,
            Capability::Flex => Command::CanFlex,
            Capability::Hyperdrive => Command::CanHyperdrive,
            Capability::Overdrive => Command::CanOverdrive,
            Capability::ProgramPulse => Command::CanProgram,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A decoded request with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CloseConnection,
    PingConnection,
    Reset,
    PutBit(bool),
    PutByte(u8),
    GetBit,
    GetByte,
    GetBlock(usize),
    DataBlock(Vec<u8>),
    SetPowerDuration(PowerDuration),
    StartPowerDelivery(PowerChangeCondition),
    SetProgramPulseDuration(PowerDuration),
    StartProgramPulse(PowerChangeCondition),
    StartBreak,
    SetPowerNormal,
    SetSpeed(Speed),
    GetSpeed,
    BeginExclusive { blocking: bool },
    EndExclusive,
    FindFirstDevice,
    FindNextDevice,
    GetAddress,
    SetSearchOnlyAlarmingDevices,
    SetNoResetSearch,
    SetSearchAllDevices,
    TargetAllFamilies,
    TargetFamily(Vec<u8>),
    ExcludeFamily(Vec<u8>),
    Supports(Capability),
}

impl Request {
    /// Opcode of this request.
    pub fn command(&self) -> Command {
        match self {
            Request::CloseConnection => Command::CloseConnection,
            Request::PingConnection => Command::PingConnection,
            Request::Reset => Command::Reset,
            Request::PutBit(_) => Command::PutBit,
            Request::PutByte(_) => Command::PutByte,
            Request::GetBit => Command::GetBit,
            Request::GetByte => Command::GetByte,
            Request::GetBlock(_) => Command::GetBlock,
            Request::DataBlock(_) => Command::DataBlock,
            Request::SetPowerDuration(_) => Command::SetPowerDuration,
            Request::StartPowerDelivery(_) => Command::StartPowerDelivery,
            Request::SetProgramPulseDuration(_) => Command::SetProgramPulseDuration,
            Request::StartProgramPulse(_) => Command::StartProgramPulse,
            Request::StartBreak => Command::StartBreak,
            Request::SetPowerNormal => Command::SetPowerNormal,
            Request::SetSpeed(_) => Command::SetSpeed,
            Request::GetSpeed => Command::GetSpeed,
            Request::BeginExclusive { .. } => Command::BeginExclusive,
            Request::EndExclusive => Command::EndExclusive,
            Request::FindFirstDevice => Command::FindFirstDevice,
            Request::FindNextDevice => Command::FindNextDevice,
            Request::GetAddress => Command::GetAddress,
            Request::SetSearchOnlyAlarmingDevices => Command::SetSearchOnlyAlarmingDevices,
            Request::SetNoResetSearch => Command::SetNoResetSearch,
            Request::SetSearchAllDevices => Command::SetSearchAllDevices,
            Request::TargetAllFamilies => Command::TargetAllFamilies,
            Request::TargetFamily(_) => Command::TargetFamily,
            Request::ExcludeFamily(_) => Command::ExcludeFamily,
            Request::Supports(capability) => Command::for_capability(*capability),
        }
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Payload shape of a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Empty,
    Bool,
    Int,
    Byte,
    Block,
    Address,
}

/// A successful reply payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Empty,
    Bool(bool),
    Int(i32),
    Byte(u8),
    Block(Vec<u8>),
    Address(RomId),
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Empty => ReplyKind::Empty,
            Reply::Bool(_) => ReplyKind::Bool,
            Reply::Int(_) => ReplyKind::Int,
            Reply::Byte(_) => ReplyKind::Byte,
            Reply::Block(_) => ReplyKind::Block,
            Reply::Address(_) => ReplyKind::Address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_decodes_to_itself() {
        let mut decoded = 0;
        for byte in 0u8..=0xFF {
            if let Ok(command) = Command::try_from(byte) {
                assert_eq!(command as u8, byte);
                decoded += 1;
            }
        }
        assert_eq!(decoded, 35);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        assert!(Command::try_from(0x00).is_err());
        assert!(Command::try_from(0x31).is_err());
    }

    #[test]
    fn test_reply_shapes_follow_opcode() {
        assert_eq!(Command::Reset.reply_kind(), ReplyKind::Int);
        assert_eq!(Command::GetSpeed.reply_kind(), ReplyKind::Int);
        assert_eq!(Command::BeginExclusive.reply_kind(), ReplyKind::Bool);
        assert_eq!(Command::CanProgram.reply_kind(), ReplyKind::Bool);
        assert_eq!(Command::GetByte.reply_kind(), ReplyKind::Byte);
        assert_eq!(Command::DataBlock.reply_kind(), ReplyKind::Block);
        assert_eq!(Command::GetAddress.reply_kind(), ReplyKind::Address);
        assert_eq!(Command::EndExclusive.reply_kind(), ReplyKind::Empty);
        assert_eq!(Command::TargetFamily.reply_kind(), ReplyKind::Empty);
    }

    #[test]
    fn test_capability_opcodes_map_both_ways() {
        for byte in 0x2Au8..=0x30 {
            let command = Command::try_from(byte).unwrap();
            let capability = command.capability().unwrap();
            assert_eq!(Command::for_capability(capability), command);
        }
        assert_eq!(Command::Reset.capability(), None);
    }
}
