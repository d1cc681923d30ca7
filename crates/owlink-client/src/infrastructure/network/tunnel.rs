//! [`TunnelClient`]: a [`BusAdapter`] whose every call is a round trip to an
//! `owlink-server`.
//!
//! # Request/response discipline
//!
//! The connection sits behind a mutex.  Each call writes one request,
//! flushes, and reads exactly one response before the lock is released, so
//! calls from several threads are serialized and never interleave on the
//! wire.
//!
//! # Failure handling
//!
//! | Response                 | Result                     | Connection           |
//! |--------------------------|----------------------------|----------------------|
//! | `RET_SUCCESS` + payload  | `Ok(..)`                   | kept                 |
//! | `RET_FAILURE` + message  | `AdapterError::Remote`     | kept                 |
//! | any other status byte    | `AdapterError::Desync`     | dropped, one reconnect attempt |
//! | I/O or decode failure    | `AdapterError::Transport` / `Protocol` | dropped |
//!
//! Dropping the connection also drops the local exclusivity token, because
//! the server has already released its side.
//!
//! # Exclusivity
//!
//! The server sees every call from one client as the same owner, so the
//! local token is what keeps other owners in this process apart.  A call for
//! an owner that does not hold it waits up to `exclusive_timeout` and then
//! fails with [`AdapterError::Busy`] without anything being sent.

use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use owlink_core::bus::exclusive::DEFAULT_EXCLUSIVE_WAIT;
use owlink_core::protocol::codec::{read_response, write_request, Response};
use owlink_core::protocol::handshake::client_handshake;
use owlink_core::protocol::messages::{Reply, Request, MAX_BLOCK_LEN, VERSION_UID};
use owlink_core::{
    AdapterError, BusAdapter, Capability, ExclusivityToken, OwnerId, PowerChangeCondition,
    PowerDuration, ProtocolError, ResetResult, RomId, Speed,
};
use tracing::{debug, info, warn};

/// Connection settings for a [`TunnelClient`].
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// `host:port` of the server.
    pub server: String,
    pub secret: Vec<u8>,
    /// Read timeout on the socket.  `None` blocks forever.
    pub socket_timeout: Option<Duration>,
    /// Upper bound for a blocking local `begin_exclusive`, and for a call
    /// waiting on another local owner's exclusive use.
    pub exclusive_timeout: Duration,
}

impl TunnelOptions {
    pub fn new(server: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            server: server.into(),
            secret: secret.into(),
            socket_timeout: None,
            exclusive_timeout: DEFAULT_EXCLUSIVE_WAIT,
        }
    }
}

/// One authenticated socket.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn open(options: &TunnelOptions) -> Result<Self, AdapterError> {
        let mut stream = TcpStream::connect(&options.server)?;
        stream.set_read_timeout(options.socket_timeout)?;
        stream.set_nodelay(true)?;

        client_handshake(&mut stream, &options.secret, VERSION_UID)?;

        let write_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer: BufWriter::new(write_half),
        })
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, ProtocolError> {
        write_request(&mut self.writer, request)?;
        self.writer.flush()?;
        read_response(&mut self.reader, request.command().reply_kind())
    }

    /// Sends `CLOSECONNECTION`; the server does not answer it.
    fn close(mut self) {
        let sent = write_request(&mut self.writer, &Request::CloseConnection)
            .and_then(|_| self.writer.flush());
        if let Err(e) = sent {
            debug!("close request not delivered: {e}");
        }
    }
}

/// Remote adapter reached over the tunnel.
pub struct TunnelClient {
    options: TunnelOptions,
    connection: Mutex<Option<Connection>>,
    exclusive: ExclusivityToken,
}

impl TunnelClient {
    /// Connects and authenticates.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Transport`] if the server is unreachable, and
    /// [`AdapterError::Authentication`] if the version or secret is refused.
    pub fn connect(options: TunnelOptions) -> Result<Self, AdapterError> {
        let connection = Connection::open(&options)?;
        info!(server = %options.server, "tunnel connected");
        Ok(Self {
            options,
            connection: Mutex::new(Some(connection)),
            exclusive: ExclusivityToken::new(),
        })
    }

    pub fn server(&self) -> &str {
        &self.options.server
    }

    /// `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Round trip with no effect on the bus.
    pub fn ping(&self) -> Result<(), AdapterError> {
        self.round_trip(self.lock(), &Request::PingConnection).map(|_| ())
    }

    /// Opens a fresh connection, closing the current one first.
    pub fn reconnect(&self) -> Result<(), AdapterError> {
        let mut guard = self.lock();
        self.teardown(&mut guard);
        *guard = Some(Connection::open(&self.options)?);
        info!(server = %self.options.server, "tunnel reconnected");
        Ok(())
    }

    /// Tells the server to close the session and drops the connection.
    /// Later calls fail with [`AdapterError::Closed`].
    pub fn close(&self) {
        let mut guard = self.lock();
        self.teardown(&mut guard);
    }

    /// The owner currently holding the local exclusivity token.
    pub fn exclusive_holder(&self) -> Option<OwnerId> {
        self.exclusive.holder()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the connection and drops the local token with it.
    fn teardown(&self, guard: &mut MutexGuard<'_, Option<Connection>>) {
        if let Some(connection) = guard.take() {
            connection.close();
        }
        if let Some(owner) = self.exclusive.force_release() {
            info!(%owner, "local exclusive use dropped with the connection");
        }
    }

    /// Drops a broken connection without trying to talk to the server.
    fn abandon(&self, guard: &mut MutexGuard<'_, Option<Connection>>) {
        **guard = None;
        if let Some(owner) = self.exclusive.force_release() {
            info!(%owner, "local exclusive use dropped with the connection");
        }
    }

    /// Locks the connection for `owner` once no other local owner holds
    /// exclusive use.
    fn admit(&self, owner: OwnerId) -> Result<MutexGuard<'_, Option<Connection>>, AdapterError> {
        self.exclusive
            .admit(owner, &self.connection, self.options.exclusive_timeout)
            .map_err(|holder| {
                debug!(%owner, %holder, "call held off by local exclusive use");
                AdapterError::Busy(holder)
            })
    }

    fn call(&self, owner: OwnerId, request: &Request) -> Result<Reply, AdapterError> {
        let guard = self.admit(owner)?;
        self.round_trip(guard, request)
    }

    fn round_trip(
        &self,
        mut guard: MutexGuard<'_, Option<Connection>>,
        request: &Request,
    ) -> Result<Reply, AdapterError> {
        let connection = guard.as_mut().ok_or(AdapterError::Closed)?;

        match connection.exchange(request) {
            Ok(Response::Success(reply)) => Ok(reply),
            Ok(Response::Failure(message)) => Err(AdapterError::Remote(message)),
            Ok(Response::Desync(status)) => {
                warn!(
                    server = %self.options.server,
                    command = ?request.command(),
                    "protocol desync, status byte 0x{status:02X}"
                );
                self.abandon(&mut guard);
                match Connection::open(&self.options) {
                    Ok(fresh) => {
                        info!(server = %self.options.server, "reconnected after desync");
                        *guard = Some(fresh);
                    }
                    Err(e) => warn!(server = %self.options.server, "reconnect failed: {e}"),
                }
                Err(AdapterError::Desync(status))
            }
            Err(e) => {
                warn!(server = %self.options.server, "tunnel connection lost: {e}");
                self.abandon(&mut guard);
                Err(e.into())
            }
        }
    }

    fn call_empty(&self, owner: OwnerId, request: Request) -> Result<(), AdapterError> {
        match self.call(owner, &request)? {
            Reply::Empty => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn call_bool(&self, owner: OwnerId, request: Request) -> Result<bool, AdapterError> {
        match self.call(owner, &request)? {
            Reply::Bool(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn call_int(&self, owner: OwnerId, request: Request) -> Result<i32, AdapterError> {
        match self.call(owner, &request)? {
            Reply::Int(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn call_block(&self, owner: OwnerId, request: Request) -> Result<Vec<u8>, AdapterError> {
        match self.call(owner, &request)? {
            Reply::Block(block) => Ok(block),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: Reply) -> AdapterError {
    AdapterError::Protocol(ProtocolError::MalformedPayload(format!(
        "unexpected reply shape {:?}",
        reply.kind()
    )))
}

fn check_len(len: usize) -> Result<(), AdapterError> {
    if len > MAX_BLOCK_LEN {
        return Err(AdapterError::Protocol(ProtocolError::InvalidLength(len as i64)));
    }
    Ok(())
}

fn decode_code<T: TryFrom<u8, Error = ()>>(code: i32, what: &str) -> Result<T, AdapterError> {
    u8::try_from(code)
        .ok()
        .and_then(|c| T::try_from(c).ok())
        .ok_or_else(|| {
            AdapterError::Protocol(ProtocolError::MalformedPayload(format!(
                "unknown {what} code: {code}"
            )))
        })
}

impl Drop for TunnelClient {
    fn drop(&mut self) {
        let mut guard = self.lock();
        if let Some(connection) = guard.take() {
            connection.close();
        }
    }
}

impl BusAdapter for TunnelClient {
    fn adapter_name(&self) -> String {
        format!("tunnel:{}", self.options.server)
    }

    // ── Raw bus I/O ───────────────────────────────────────────────────────────

    fn reset(&self, owner: OwnerId) -> Result<ResetResult, AdapterError> {
        decode_code(self.call_int(owner, Request::Reset)?, "reset result")
    }

    fn put_bit(&self, owner: OwnerId, bit: bool) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::PutBit(bit))
    }

    fn get_bit(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        self.call_bool(owner, Request::GetBit)
    }

    fn put_byte(&self, owner: OwnerId, byte: u8) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::PutByte(byte))
    }

    fn get_byte(&self, owner: OwnerId) -> Result<u8, AdapterError> {
        match self.call(owner, &Request::GetByte)? {
            Reply::Byte(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn get_block(&self, owner: OwnerId, len: usize) -> Result<Vec<u8>, AdapterError> {
        check_len(len)?;
        self.call_block(owner, Request::GetBlock(len))
    }

    fn data_block(&self, owner: OwnerId, block: &mut [u8]) -> Result<(), AdapterError> {
        check_len(block.len())?;
        let touched = self.call_block(owner, Request::DataBlock(block.to_vec()))?;
        if touched.len() != block.len() {
            return Err(AdapterError::Protocol(ProtocolError::MalformedPayload(format!(
                "data block of {} bytes answered with {}",
                block.len(),
                touched.len()
            ))));
        }
        block.copy_from_slice(&touched);
        Ok(())
    }

    // ── Power and speed ───────────────────────────────────────────────────────

    fn set_power_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetPowerDuration(duration))
    }

    fn start_power_delivery(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError> {
        self.call_bool(owner, Request::StartPowerDelivery(condition))
    }

    fn set_program_pulse_duration(
        &self,
        owner: OwnerId,
        duration: PowerDuration,
    ) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetProgramPulseDuration(duration))
    }

    fn start_program_pulse(
        &self,
        owner: OwnerId,
        condition: PowerChangeCondition,
    ) -> Result<bool, AdapterError> {
        self.call_bool(owner, Request::StartProgramPulse(condition))
    }

    fn start_break(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::StartBreak)
    }

    fn set_power_normal(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetPowerNormal)
    }

    fn set_speed(&self, owner: OwnerId, speed: Speed) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetSpeed(speed))
    }

    fn speed(&self, owner: OwnerId) -> Result<Speed, AdapterError> {
        decode_code(self.call_int(owner, Request::GetSpeed)?, "speed")
    }

    fn supports(&self, capability: Capability) -> Result<bool, AdapterError> {
        match self.round_trip(self.lock(), &Request::Supports(capability))? {
            Reply::Bool(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    // ── Exclusivity ───────────────────────────────────────────────────────────

    fn begin_exclusive(&self, owner: OwnerId, blocking: bool) -> Result<bool, AdapterError> {
        let newly_acquired = if self.exclusive.is_held_by(owner) {
            false
        } else {
            let granted = if blocking {
                self.exclusive
                    .acquire_timeout(owner, self.options.exclusive_timeout)
            } else {
                self.exclusive.try_acquire(owner)
            };
            if !granted {
                debug!(%owner, blocking, "local exclusive use refused");
                return Ok(false);
            }
            true
        };

        let remote = self.call_bool(owner, Request::BeginExclusive { blocking });
        if !matches!(remote, Ok(true)) && newly_acquired {
            self.exclusive.release(owner);
        }
        remote
    }

    fn end_exclusive(&self, owner: OwnerId) -> Result<(), AdapterError> {
        if !self.exclusive.is_held_by(owner) {
            return Ok(());
        }
        let result = self.call_empty(owner, Request::EndExclusive);
        self.exclusive.release(owner);
        result
    }

    // ── Search ────────────────────────────────────────────────────────────────

    fn find_first_device(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        self.call_bool(owner, Request::FindFirstDevice)
    }

    fn find_next_device(&self, owner: OwnerId) -> Result<bool, AdapterError> {
        self.call_bool(owner, Request::FindNextDevice)
    }

    fn address(&self, owner: OwnerId) -> Result<RomId, AdapterError> {
        match self.call(owner, &Request::GetAddress)? {
            Reply::Address(address) => Ok(address),
            other => Err(unexpected(other)),
        }
    }

    fn set_search_only_alarming(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetSearchOnlyAlarmingDevices)
    }

    fn set_no_reset_search(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetNoResetSearch)
    }

    fn set_search_all_devices(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::SetSearchAllDevices)
    }

    fn target_all_families(&self, owner: OwnerId) -> Result<(), AdapterError> {
        self.call_empty(owner, Request::TargetAllFamilies)
    }

    fn target_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError> {
        check_len(families.len())?;
        self.call_empty(owner, Request::TargetFamily(families.to_vec()))
    }

    fn exclude_family(&self, owner: OwnerId, families: &[u8]) -> Result<(), AdapterError> {
        check_len(families.len())?;
        self.call_empty(owner, Request::ExcludeFamily(families.to_vec()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
//
// These run against a scripted server on a loopback socket, so they can
// inject desyncs and record exactly which bytes the client sent.
