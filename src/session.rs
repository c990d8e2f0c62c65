//! Command session against one connected beepcon.
//!
//! Sans-IO state machine: callers pass the transport and the current time into
//! every operation, feed transport callbacks back in, and drain the resulting
//! [`ConnectionEvent`]s. At most one command is outstanding at any time and
//! every issued command resolves exactly once, with a response or an error.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::ble::{LinkTransport, TransportError};
use crate::config::{InvalidPasswordPolicy, SessionConfig};
use crate::error::{BeepconError, Result};
use crate::firmware::{self, FirmwareDescriptor, FirmwareTransfer};
use crate::models::DeviceId;
use crate::protocol::{decode, CapabilityLimits, Command, Opcode, Response, VersionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ValidatingPassword,
    Ready,
    Busy,
    Disconnecting,
    UpdatingFirmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Caller asked for the disconnect
    Requested,
    /// Device rebooted after an auto-resetting command or a firmware update
    DeviceReset,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Human-readable status line ("Connecting", "Validating password", ...)
    Progress(String),
    Established {
        device: DeviceId,
    },
    PasswordValidated {
        device: DeviceId,
        ok: bool,
        error: Option<BeepconError>,
    },
    CommandCompleted {
        device: DeviceId,
        opcode: Opcode,
        result: Result<Response>,
    },
    FirmwareProgress {
        device: DeviceId,
        percent: u8,
        completed: bool,
        error: Option<BeepconError>,
    },
    Failure {
        device: DeviceId,
        error: BeepconError,
    },
    Terminated {
        device: DeviceId,
        reason: TerminationReason,
    },
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    opcode: Opcode,
    auto_resetting: bool,
    deadline_ms: u64,
}

#[derive(Debug)]
pub struct ConnectionSession {
    config: SessionConfig,
    state: ConnectionState,
    target: Option<DeviceId>,
    password: Option<String>,
    password_validated: bool,
    limits: CapabilityLimits,
    version: Option<VersionInfo>,
    pending: Option<Pending>,
    connect_deadline_ms: Option<u64>,
    transfer: Option<FirmwareTransfer>,
    expecting_reset: bool,
    disconnect_requested: bool,
    events: VecDeque<ConnectionEvent>,
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::with_config(SessionConfig::default())
    }
}

impl ConnectionSession {
    /// Fails with `InvalidArgument` when `config` does not pass [`SessionConfig::validate`].
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            target: None,
            password: None,
            password_validated: false,
            limits: CapabilityLimits::default(),
            version: None,
            pending: None,
            connect_deadline_ms: None,
            transfer: None,
            expecting_reset: false,
            disconnect_requested: false,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Anything other than fully disconnected.
    pub fn is_in_process(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// A command or firmware chunk is on the wire.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Busy | ConnectionState::UpdatingFirmware
        )
    }

    pub fn limits(&self) -> &CapabilityLimits {
        &self.limits
    }

    /// Last successful `ReadVersion` on this connection.
    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    pub fn password_validated(&self) -> bool {
        self.password_validated
    }

    pub fn target(&self) -> Option<&DeviceId> {
        self.target.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        self.events.drain(..).collect()
    }

    /// Start connecting to `device`, validating `password` once the link is up.
    pub fn connect<T: LinkTransport + ?Sized>(
        &mut self,
        device: DeviceId,
        password: Option<String>,
        transport: &mut T,
        now_ms: u64,
    ) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(BeepconError::AlreadyInProgress);
        }
        if let Some(password) = &password {
            Command::ValidatePassword(password.clone()).validate(&self.limits)?;
        }

        transport.connect(&device)?;

        info!(device = %device, with_password = password.is_some(), "connecting");
        self.reset_link_state();
        self.state = ConnectionState::Connecting;
        self.target = Some(device);
        self.password = password;
        self.connect_deadline_ms = Some(now_ms.saturating_add(self.config.connect_timeout_ms));
        self.progress("Connecting");
        Ok(())
    }

    pub fn on_connection_established<T: LinkTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        now_ms: u64,
    ) {
        if self.state != ConnectionState::Connecting {
            warn!(state = ?self.state, "connection established outside a connect attempt");
            return;
        }
        let Some(device) = self.target.clone() else {
            return;
        };

        self.connect_deadline_ms = None;
        self.state = ConnectionState::Connected;
        info!(device = %device, "connected");
        self.events.push_back(ConnectionEvent::Established {
            device: device.clone(),
        });
        self.progress("Connected");

        let Some(password) = self.password.take() else {
            self.state = ConnectionState::Ready;
            return;
        };

        self.state = ConnectionState::ValidatingPassword;
        self.progress("Validating password");
        let written = Command::ValidatePassword(password)
            .encode()
            .and_then(|frame| transport.write(&frame).map_err(BeepconError::from));
        match written {
            Ok(()) => self.arm(Opcode::ValidatePassword, false, now_ms),
            Err(err) => self.password_rejected(err, transport),
        }
    }

    /// Send `command`. The result arrives later as `CommandCompleted`.
    pub fn issue<T: LinkTransport + ?Sized>(
        &mut self,
        command: Command,
        transport: &mut T,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_ready()?;
        if command.is_session_internal() {
            return Err(BeepconError::invalid(format!(
                "{:?} is driven by the session",
                command.opcode()
            )));
        }
        if command.is_password_gated() && !self.password_validated {
            return Err(BeepconError::PasswordRequired);
        }
        command.validate(&self.limits)?;
        let frame = command.encode()?;

        transport.write(&frame)?;

        debug!(opcode = ?command.opcode(), len = frame.len(), "command issued");
        self.arm(command.opcode(), command.is_auto_resetting(), now_ms);
        self.state = ConnectionState::Busy;
        Ok(())
    }

    /// Start a firmware upload. Requires a validated password and a prior `ReadVersion`.
    pub fn begin_firmware_update<T: LinkTransport + ?Sized>(
        &mut self,
        image: Vec<u8>,
        filename: &str,
        transport: &mut T,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_ready()?;
        if !self.password_validated {
            return Err(BeepconError::PasswordRequired);
        }
        let descriptor = self.check_firmware_compatibility(filename)?;
        let transfer = FirmwareTransfer::new(image, descriptor, self.config.firmware_chunk_size)?;
        let frame = transfer.begin_command().encode()?;

        transport.write(&frame)?;

        info!(filename, bytes = transfer.total_len(), "firmware update started");
        self.transfer = Some(transfer);
        self.arm(Opcode::FirmwareBegin, false, now_ms);
        self.state = ConnectionState::UpdatingFirmware;
        self.progress("Updating firmware");
        Ok(())
    }

    /// Check an image name against the connected device's version.
    pub fn check_firmware_compatibility(&self, filename: &str) -> Result<FirmwareDescriptor> {
        let version = self.version.as_ref().ok_or(BeepconError::VersionUnknown)?;
        firmware::check_firmware_compatibility(filename, version)
    }

    /// Feed one notification frame from the device.
    pub fn on_notification<T: LinkTransport + ?Sized>(
        &mut self,
        frame: &[u8],
        transport: &mut T,
        now_ms: u64,
    ) {
        let Some(pending) = self.pending else {
            warn!(len = frame.len(), state = ?self.state, "unsolicited frame dropped");
            return;
        };
        if frame.first() != Some(&pending.opcode.as_byte()) {
            warn!(
                expected = ?pending.opcode,
                got = ?frame.first(),
                "frame does not answer the pending command, dropped"
            );
            return;
        }

        let decoded = decode(pending.opcode, frame);
        match self.state {
            ConnectionState::ValidatingPassword => self.finish_password(decoded, transport),
            ConnectionState::UpdatingFirmware => self.advance_firmware(decoded, transport, now_ms),
            ConnectionState::Busy => self.finish_command(pending, decoded),
            state => warn!(?state, "frame arrived with nothing to resolve"),
        }
    }

    /// Expire deadlines that passed by `now_ms`.
    pub fn poll<T: LinkTransport + ?Sized>(&mut self, transport: &mut T, now_ms: u64) {
        if self.state == ConnectionState::Connecting {
            if self.connect_deadline_ms.is_some_and(|d| now_ms >= d) {
                warn!("connect attempt timed out");
                if let Err(err) = transport.disconnect() {
                    debug!(%err, "transport disconnect after connect timeout failed");
                }
                let device = self.target.clone();
                self.finish_disconnected();
                if let Some(device) = device {
                    self.events.push_back(ConnectionEvent::Failure {
                        device,
                        error: BeepconError::Timeout,
                    });
                }
            }
            return;
        }

        let Some(pending) = self.pending else {
            return;
        };
        if now_ms < pending.deadline_ms {
            return;
        }

        warn!(opcode = ?pending.opcode, state = ?self.state, "response deadline passed");
        match self.state {
            ConnectionState::ValidatingPassword => {
                self.password_rejected(BeepconError::Timeout, transport)
            }
            ConnectionState::UpdatingFirmware => self.fail_transfer(BeepconError::Timeout),
            ConnectionState::Busy => self.finish_command(pending, Err(BeepconError::Timeout)),
            _ => self.pending = None,
        }
    }

    /// Caller-requested disconnect. Pending work resolves with `Cancelled`.
    pub fn disconnect<T: LinkTransport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => return Err(BeepconError::NotConnected),
            ConnectionState::Disconnecting => return Ok(()),
            _ => {}
        }
        let device = self.target.clone();

        if let Some(device) = device.clone() {
            self.cancel_pending(device, BeepconError::Cancelled);
        }
        self.limits = CapabilityLimits::default();
        self.password_validated = false;
        self.version = None;
        self.transfer = None;
        self.pending = None;
        self.connect_deadline_ms = None;
        self.disconnect_requested = true;
        self.state = ConnectionState::Disconnecting;
        info!(device = ?device, "disconnecting");
        self.progress("Disconnecting");

        if let Err(err) = transport.disconnect() {
            warn!(%err, "transport disconnect failed, treating link as closed");
            self.on_connection_lost(Some(err));
        }
        Ok(())
    }

    /// The link went down, for whatever reason.
    pub fn on_connection_lost(&mut self, reason: Option<TransportError>) {
        if self.state == ConnectionState::Disconnected {
            debug!("link loss reported while already disconnected");
            return;
        }
        let Some(device) = self.target.clone() else {
            self.finish_disconnected();
            return;
        };
        let was = self.state;

        if self.disconnect_requested {
            info!(device = %device, "disconnected on request");
            self.finish_disconnected();
            self.terminated(device, TerminationReason::Requested);
            return;
        }

        if was == ConnectionState::Connecting {
            warn!(device = %device, reason = ?reason, "connect attempt failed");
            self.finish_disconnected();
            self.events.push_back(ConnectionEvent::Failure {
                device,
                error: BeepconError::LinkLost,
            });
            return;
        }

        let transfer_done = self.transfer.as_ref().is_some_and(|t| t.is_complete());
        if was == ConnectionState::UpdatingFirmware && transfer_done {
            info!(device = %device, "device rebooted into new firmware");
            self.events.push_back(ConnectionEvent::FirmwareProgress {
                device: device.clone(),
                percent: 100,
                completed: true,
                error: None,
            });
            self.finish_disconnected();
            self.terminated(device, TerminationReason::DeviceReset);
            return;
        }

        if let Some(pending) = self.pending.filter(|p| p.auto_resetting && was == ConnectionState::Busy) {
            info!(device = %device, opcode = ?pending.opcode, "device reset before acknowledging");
            self.events.push_back(ConnectionEvent::CommandCompleted {
                device: device.clone(),
                opcode: pending.opcode,
                result: Ok(Response::Ack),
            });
            self.pending = None;
            self.finish_disconnected();
            self.terminated(device, TerminationReason::DeviceReset);
            return;
        }

        if self.expecting_reset {
            info!(device = %device, "device reset after configuration write");
            self.cancel_pending(device.clone(), BeepconError::LinkLost);
            self.finish_disconnected();
            self.terminated(device, TerminationReason::DeviceReset);
            return;
        }

        warn!(device = %device, state = ?was, reason = ?reason, "link lost");
        self.cancel_pending(device.clone(), BeepconError::LinkLost);
        self.finish_disconnected();
        self.events.push_back(ConnectionEvent::Failure {
            device: device.clone(),
            error: BeepconError::LinkLost,
        });
        self.terminated(device, TerminationReason::Unexpected);
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Busy | ConnectionState::UpdatingFirmware => {
                Err(BeepconError::CommandInProgress)
            }
            ConnectionState::Disconnected => Err(BeepconError::NotConnected),
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::ValidatingPassword
            | ConnectionState::Disconnecting => Err(BeepconError::AlreadyInProgress),
        }
    }

    fn arm(&mut self, opcode: Opcode, auto_resetting: bool, now_ms: u64) {
        self.pending = Some(Pending {
            opcode,
            auto_resetting,
            deadline_ms: now_ms.saturating_add(self.config.command_timeout_ms),
        });
    }

    fn finish_command(&mut self, pending: Pending, result: Result<Response>) {
        let Some(device) = self.target.clone() else {
            return;
        };
        self.pending = None;
        self.state = ConnectionState::Ready;

        if let Ok(Response::Version(version)) = &result {
            self.version = Some(*version);
        }
        if result.is_ok() && pending.auto_resetting {
            self.expecting_reset = true;
        }
        debug!(opcode = ?pending.opcode, ok = result.is_ok(), "command resolved");
        self.events.push_back(ConnectionEvent::CommandCompleted {
            device,
            opcode: pending.opcode,
            result,
        });
    }

    fn finish_password<T: LinkTransport + ?Sized>(
        &mut self,
        decoded: Result<Response>,
        transport: &mut T,
    ) {
        match decoded {
            Ok(Response::PasswordAccepted(limits)) => {
                let Some(device) = self.target.clone() else {
                    return;
                };
                self.pending = None;
                self.limits = limits;
                self.password_validated = true;
                self.state = ConnectionState::Ready;
                info!(device = %device, "password validated");
                self.events.push_back(ConnectionEvent::PasswordValidated {
                    device,
                    ok: true,
                    error: None,
                });
                self.progress("Password validated");
            }
            Ok(other) => self.password_rejected(
                BeepconError::protocol(format!("unexpected password response {other:?}")),
                transport,
            ),
            Err(err) => self.password_rejected(err, transport),
        }
    }

    fn password_rejected<T: LinkTransport + ?Sized>(&mut self, error: BeepconError, transport: &mut T) {
        let Some(device) = self.target.clone() else {
            return;
        };
        self.pending = None;
        warn!(device = %device, %error, "password validation failed");
        self.events.push_back(ConnectionEvent::PasswordValidated {
            device,
            ok: false,
            error: Some(error),
        });

        match self.config.invalid_password_policy {
            InvalidPasswordPolicy::StayConnected => self.state = ConnectionState::Ready,
            InvalidPasswordPolicy::Disconnect => {
                if let Err(err) = self.disconnect(transport) {
                    debug!(%err, "disconnect after password failure");
                }
            }
        }
    }

    fn advance_firmware<T: LinkTransport + ?Sized>(
        &mut self,
        decoded: Result<Response>,
        transport: &mut T,
        now_ms: u64,
    ) {
        let acked = match decoded {
            Ok(Response::Ack) => None,
            Ok(Response::FirmwareChunkAck { seq }) => Some(seq),
            Ok(other) => {
                self.fail_transfer(BeepconError::protocol(format!(
                    "unexpected firmware response {other:?}"
                )));
                return;
            }
            Err(err) => {
                self.fail_transfer(err);
                return;
            }
        };
        let Some(device) = self.target.clone() else {
            return;
        };
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };

        if let Some(seq) = acked {
            match transfer.acknowledge(seq) {
                Ok(percent) => {
                    debug!(seq, percent, "firmware chunk acknowledged");
                    self.events.push_back(ConnectionEvent::FirmwareProgress {
                        device,
                        percent,
                        completed: false,
                        error: None,
                    });
                }
                Err(err) => {
                    self.fail_transfer(err);
                    return;
                }
            }
        }

        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        if transfer.is_complete() {
            info!("firmware image delivered, waiting for device reset");
            self.expecting_reset = true;
            self.arm(Opcode::FirmwareChunk, false, now_ms);
            return;
        }

        let written = match transfer.next_chunk() {
            Some(chunk) => chunk
                .encode()
                .and_then(|frame| transport.write(&frame).map_err(BeepconError::from)),
            None => Err(BeepconError::protocol("firmware cursor stalled")),
        };
        match written {
            Ok(()) => self.arm(Opcode::FirmwareChunk, false, now_ms),
            Err(err) => self.fail_transfer(err),
        }
    }

    fn fail_transfer(&mut self, error: BeepconError) {
        let percent = self.transfer.as_ref().map_or(0, |t| t.percent());
        warn!(%error, percent, "firmware update failed");
        self.transfer = None;
        self.pending = None;
        self.expecting_reset = false;
        self.state = ConnectionState::Ready;
        if let Some(device) = self.target.clone() {
            self.events.push_back(ConnectionEvent::FirmwareProgress {
                device,
                percent,
                completed: false,
                error: Some(error),
            });
        }
    }

    /// Resolve whatever is outstanding with `error`.
    fn cancel_pending(&mut self, device: DeviceId, error: BeepconError) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let event = match self.state {
            ConnectionState::ValidatingPassword => ConnectionEvent::PasswordValidated {
                device,
                ok: false,
                error: Some(error),
            },
            ConnectionState::UpdatingFirmware => ConnectionEvent::FirmwareProgress {
                device,
                percent: self.transfer.as_ref().map_or(0, |t| t.percent()),
                completed: false,
                error: Some(error),
            },
            _ => ConnectionEvent::CommandCompleted {
                device,
                opcode: pending.opcode,
                result: Err(error),
            },
        };
        self.events.push_back(event);
    }

    fn reset_link_state(&mut self) {
        self.target = None;
        self.password = None;
        self.password_validated = false;
        self.limits = CapabilityLimits::default();
        self.version = None;
        self.pending = None;
        self.connect_deadline_ms = None;
        self.transfer = None;
        self.expecting_reset = false;
        self.disconnect_requested = false;
    }

    fn finish_disconnected(&mut self) {
        self.reset_link_state();
        self.state = ConnectionState::Disconnected;
    }

    fn terminated(&mut self, device: DeviceId, reason: TerminationReason) {
        self.events
            .push_back(ConnectionEvent::Terminated { device, reason });
    }

    fn progress(&mut self, message: &str) {
        self.events
            .push_back(ConnectionEvent::Progress(message.to_string()));
    }
}
