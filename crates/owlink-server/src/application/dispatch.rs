//! Request dispatch: maps one decoded [`Request`] onto the wrapped adapter.
//!
//! This is the server's only use case.  It knows nothing about sockets; the
//! session layer decodes the request, calls [`handle_request`], and encodes
//! whatever comes back.
//!
//! # Error mapping (for beginners)
//!
//! A failing adapter call is returned as `Err(AdapterError)`.  The session
//! turns non-fatal errors into a `RET_FAILURE` reply carrying the error text
//! and keeps the connection open, so a client can recover from, say, an
//! unsupported speed without reconnecting.

use owlink_core::protocol::messages::{Reply, Request};
use owlink_core::{AdapterError, BusAdapter, OwnerId};

/// What the session should do after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send `RET_SUCCESS` followed by this reply.
    Reply(Reply),
    /// The client asked to close; send nothing and end the session.
    Close,
}

/// Executes `request` against `adapter` on behalf of `owner`.
///
/// `owner` is the connection's exclusivity handle.  Every bus and search
/// call is made for it, so while another connection holds exclusive use the
/// call waits and may fail with [`AdapterError::Busy`].
pub fn handle_request(
    adapter: &dyn BusAdapter,
    owner: OwnerId,
    request: Request,
) -> Result<Dispatch, AdapterError> {
    let reply = match request {
        Request::CloseConnection => return Ok(Dispatch::Close),
        Request::PingConnection => Reply::Empty,

        // ── Raw bus I/O ───────────────────────────────────────────────────────
        Request::Reset => Reply::Int(adapter.reset(owner)? as i32),
        Request::PutBit(bit) => {
            adapter.put_bit(owner, bit)?;
            Reply::Empty
        }
        Request::PutByte(byte) => {
            adapter.put_byte(owner, byte)?;
            Reply::Empty
        }
        Request::GetBit => Reply::Bool(adapter.get_bit(owner)?),
        Request::GetByte => Reply::Byte(adapter.get_byte(owner)?),
        Request::GetBlock(len) => Reply::Block(adapter.get_block(owner, len)?),
        Request::DataBlock(mut block) => {
            adapter.data_block(owner, &mut block)?;
            Reply::Block(block)
        }

        // ── Power and speed ───────────────────────────────────────────────────
        Request::SetPowerDuration(duration) => {
            adapter.set_power_duration(owner, duration)?;
            Reply::Empty
        }
        Request::StartPowerDelivery(condition) => {
            Reply::Bool(adapter.start_power_delivery(owner, condition)?)
        }
        Request::SetProgramPulseDuration(duration) => {
            adapter.set_program_pulse_duration(owner, duration)?;
            Reply::Empty
        }
        Request::StartProgramPulse(condition) => {
            Reply::Bool(adapter.start_program_pulse(owner, condition)?)
        }
        Request::StartBreak => {
            adapter.start_break(owner)?;
            Reply::Empty
        }
        Request::SetPowerNormal => {
            adapter.set_power_normal(owner)?;
            Reply::Empty
        }
        Request::SetSpeed(speed) => {
            adapter.set_speed(owner, speed)?;
            Reply::Empty
        }
        Request::GetSpeed => Reply::Int(adapter.speed(owner)? as i32),
        Request::Supports(capability) => Reply::Bool(adapter.supports(capability)?),

        // ── Exclusivity ───────────────────────────────────────────────────────
        Request::BeginExclusive { blocking } => {
            Reply::Bool(adapter.begin_exclusive(owner, blocking)?)
        }
        Request::EndExclusive => {
            adapter.end_exclusive(owner)?;
            Reply::Empty
        }

        // ── Search ────────────────────────────────────────────────────────────
        Request::FindFirstDevice => Reply::Bool(adapter.find_first_device(owner)?),
        Request::FindNextDevice => Reply::Bool(adapter.find_next_device(owner)?),
        Request::GetAddress => Reply::Address(adapter.address(owner)?),
        Request::SetSearchOnlyAlarmingDevices => {
            adapter.set_search_only_alarming(owner)?;
            Reply::Empty
        }
        Request::SetNoResetSearch => {
            adapter.set_no_reset_search(owner)?;
            Reply::Empty
        }
        Request::SetSearchAllDevices => {
            adapter.set_search_all_devices(owner)?;
            Reply::Empty
        }
        Request::TargetAllFamilies => {
            adapter.target_all_families(owner)?;
            Reply::Empty
        }
        Request::TargetFamily(families) => {
            adapter.target_family(owner, &families)?;
            Reply::Empty
        }
        Request::ExcludeFamily(families) => {
            adapter.exclude_family(owner, &families)?;
            Reply::Empty
        }
    };
    Ok(Dispatch::Reply(reply))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use owlink_core::{
        BusError, Capability, LocalAdapter, RomId, SimulatedBus, SimulatedDevice, Speed,
    };

    fn adapter_with(devices: &[RomId]) -> LocalAdapter<SimulatedBus> {
        LocalAdapter::new("test", SimulatedBus::with_devices(devices.iter().copied()))
    }

    fn reply(adapter: &dyn BusAdapter, owner: OwnerId, request: Request) -> Reply {
        match handle_request(adapter, owner, request).expect("request must succeed") {
            Dispatch::Reply(reply) => reply,
            Dispatch::Close => panic!("unexpected close"),
        }
    }

    #[test]
    fn test_close_connection_requests_close() {
        // Arrange
        let adapter = adapter_with(&[]);

        // Act
        let outcome = handle_request(&adapter, OwnerId::new(), Request::CloseConnection);

        // Assert
        assert_eq!(outcome.unwrap(), Dispatch::Close);
    }

    #[test]
    fn test_ping_replies_empty() {
        let adapter = adapter_with(&[]);
        assert_eq!(reply(&adapter, OwnerId::new(), Request::PingConnection), Reply::Empty);
    }

    #[test]
    fn test_reset_reports_presence_code() {
        // Arrange
        let adapter = adapter_with(&[RomId::with_crc(0x28, [1, 2, 3, 4, 5, 6])]);

        // Act
        let result = reply(&adapter, OwnerId::new(), Request::Reset);

        // Assert: 1 = presence
        assert_eq!(result, Reply::Int(1));
    }

    #[test]
    fn test_reset_on_empty_bus_reports_no_presence() {
        let adapter = adapter_with(&[]);
        assert_eq!(reply(&adapter, OwnerId::new(), Request::Reset), Reply::Int(0));
    }

    #[test]
    fn test_search_sequence_for_single_device() {
        // Arrange
        let address = RomId::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let adapter = adapter_with(&[address]);
        let owner = OwnerId::new();

        // Act / Assert
        assert_eq!(reply(&adapter, owner, Request::FindFirstDevice), Reply::Bool(true));
        assert_eq!(reply(&adapter, owner, Request::GetAddress), Reply::Address(address));
        assert_eq!(reply(&adapter, owner, Request::FindNextDevice), Reply::Bool(false));
    }

    #[test]
    fn test_target_family_restricts_search() {
        // Arrange
        let wanted = RomId::with_crc(0x10, [9, 9, 9, 9, 9, 9]);
        let adapter = adapter_with(&[RomId::with_crc(0x28, [1, 1, 1, 1, 1, 1]), wanted]);
        let owner = OwnerId::new();

        // Act
        reply(&adapter, owner, Request::TargetFamily(vec![0x10]));
        let first = reply(&adapter, owner, Request::FindFirstDevice);
        let address = reply(&adapter, owner, Request::GetAddress);
        let next = reply(&adapter, owner, Request::FindNextDevice);

        // Assert
        assert_eq!(first, Reply::Bool(true));
        assert_eq!(address, Reply::Address(wanted));
        assert_eq!(next, Reply::Bool(false));
    }

    #[test]
    fn test_alarm_only_search_skips_quiet_devices() {
        // Arrange
        let quiet = RomId::with_crc(0x28, [1, 0, 0, 0, 0, 0]);
        let loud = RomId::with_crc(0x28, [2, 0, 0, 0, 0, 0]);
        let mut bus = SimulatedBus::new();
        bus.attach(SimulatedDevice::new(quiet));
        bus.attach(SimulatedDevice::alarming(loud));
        let adapter = LocalAdapter::new("test", bus);
        let owner = OwnerId::new();

        // Act
        reply(&adapter, owner, Request::SetSearchOnlyAlarmingDevices);
        let first = reply(&adapter, owner, Request::FindFirstDevice);
        let address = reply(&adapter, owner, Request::GetAddress);

        // Assert
        assert_eq!(first, Reply::Bool(true));
        assert_eq!(address, Reply::Address(loud));
    }

    #[test]
    fn test_data_block_returns_touched_bytes() {
        // Arrange: with no device driving the line every read slot is 1
        let adapter = adapter_with(&[]);

        // Act
        let result = reply(&adapter, OwnerId::new(), Request::DataBlock(vec![0xFF, 0xFF]));

        // Assert
        assert_eq!(result, Reply::Block(vec![0xFF, 0xFF]));
    }

    #[test]
    fn test_get_block_returns_requested_length() {
        let adapter = adapter_with(&[]);
        assert_eq!(
            reply(&adapter, OwnerId::new(), Request::GetBlock(3)),
            Reply::Block(vec![0xFF; 3])
        );
    }

    #[test]
    fn test_get_speed_reports_regular() {
        let adapter = adapter_with(&[]);
        assert_eq!(reply(&adapter, OwnerId::new(), Request::GetSpeed), Reply::Int(0));
    }

    #[test]
    fn test_unsupported_speed_is_an_adapter_error() {
        // Arrange
        let adapter = adapter_with(&[]);

        // Act
        let result = handle_request(&adapter, OwnerId::new(), Request::SetSpeed(Speed::Overdrive));

        // Assert
        let err = result.expect_err("overdrive is not enabled on the simulated bus");
        assert!(matches!(err, AdapterError::Bus(BusError::Unsupported(_))));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_capability_query_reflects_adapter() {
        // Arrange
        let mut bus = SimulatedBus::new();
        bus.enable(Capability::Overdrive);
        let adapter = LocalAdapter::new("test", bus);
        let owner = OwnerId::new();

        // Act / Assert
        assert_eq!(
            reply(&adapter, owner, Request::Supports(Capability::Overdrive)),
            Reply::Bool(true)
        );
        assert_eq!(
            reply(&adapter, owner, Request::Supports(Capability::Break)),
            Reply::Bool(false)
        );
    }

    #[test]
    fn test_begin_exclusive_uses_connection_owner() {
        // Arrange
        let adapter = adapter_with(&[]);
        let first = OwnerId::new();
        let second = OwnerId::new();

        // Act
        let granted = reply(&adapter, first, Request::BeginExclusive { blocking: false });
        let refused = reply(&adapter, second, Request::BeginExclusive { blocking: false });

        // Assert
        assert_eq!(granted, Reply::Bool(true));
        assert_eq!(refused, Reply::Bool(false));
        assert_eq!(adapter.exclusive_holder(), Some(first));
    }

    #[test]
    fn test_end_exclusive_from_non_holder_keeps_token() {
        // Arrange
        let adapter = adapter_with(&[]);
        let holder = OwnerId::new();
        reply(&adapter, holder, Request::BeginExclusive { blocking: false });

        // Act
        let result = reply(&adapter, OwnerId::new(), Request::EndExclusive);

        // Assert
        assert_eq!(result, Reply::Empty);
        assert_eq!(adapter.exclusive_holder(), Some(holder));
    }

    #[test]
    fn test_bus_request_from_other_connection_is_refused_while_held() {
        // Arrange
        let adapter = adapter_with(&[RomId::with_crc(0x28, [1, 2, 3, 4, 5, 6])])
            .with_exclusive_wait(Duration::from_millis(30));
        let holder = OwnerId::new();
        reply(&adapter, holder, Request::BeginExclusive { blocking: false });

        // Act
        let refused = handle_request(&adapter, OwnerId::new(), Request::FindFirstDevice);
        let allowed = reply(&adapter, holder, Request::FindFirstDevice);

        // Assert
        let err = refused.expect_err("another connection holds the bus");
        assert!(matches!(err, AdapterError::Busy(owner) if owner == holder));
        assert!(!err.is_fatal());
        assert_eq!(allowed, Reply::Bool(true));
    }

    #[test]
    fn test_end_exclusive_from_holder_releases_token() {
        let adapter = adapter_with(&[]);
        let holder = OwnerId::new();
        reply(&adapter, holder, Request::BeginExclusive { blocking: true });

        reply(&adapter, holder, Request::EndExclusive);

        assert_eq!(adapter.exclusive_holder(), None);
    }
}
