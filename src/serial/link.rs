//! Actuator link driver: finds the actuator's port, keeps the connection
//! alive and moves readings in and commands out.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use super::codec::{Frame, FrameError, Payload, SendBuffer};
use super::protocol::{handshake, HandshakePolicy, LinkError, Protocol};
use super::transport::PortProvider;
use crate::config::SerialConfig;
use crate::queue::{RecentReceiver, RecentSender};
use crate::shutdown::Shutdown;
use crate::state::{ActuatorCommand, ActuatorReading};

/// Inbound variable carrying the button state (1 = pressed).
pub const BUTTON_VAR_ID: u8 = 0;
/// Inbound variable carrying the actual window angle.
pub const WINDOW_POSITION_VAR_ID: u8 = 1;

/// Outbound variable ids, in frame order.
pub const CMD_TEMPERATURE_ID: u8 = 0;
pub const CMD_OPERATIVE_MODE_ID: u8 = 1;
pub const CMD_WINDOW_ACTION_ID: u8 = 2;
pub const CMD_SYSTEM_STATUS_ID: u8 = 3;
pub const CMD_WINDOW_ANGLE_ID: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Searching,
    Handshaking,
    Connected,
}

/// Rising-edge detector for the actuator button.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    /// True only on a released -> pressed transition.
    pub fn rising(&mut self, pressed: bool) -> bool {
        let edge = pressed && !self.previous;
        self.previous = pressed;
        edge
    }
}

/// Extract the button state and window position from a frame's variables.
pub fn extract_reading(frame: &Frame) -> Option<(bool, i16)> {
    let button = frame.variable(BUTTON_VAR_ID)?.as_int16()?;
    let position = frame.variable(WINDOW_POSITION_VAR_ID)?.as_int16()?;
    Some((button == 1, position))
}

/// Serialise a command into `buffer`.
pub fn encode_command(buffer: &mut SendBuffer, command: &ActuatorCommand) {
    buffer.push_int16(CMD_TEMPERATURE_ID, command.temperature);
    buffer.push_int16(CMD_OPERATIVE_MODE_ID, command.operative_mode);
    buffer.push_int16(CMD_WINDOW_ACTION_ID, command.window_action);
    buffer.push_int16(CMD_SYSTEM_STATUS_ID, command.system_status);
    buffer.push_int16(CMD_WINDOW_ANGLE_ID, command.window_angle);
}

/// Timing knobs of the driver.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud: u32,
    pub read_timeout: Duration,
    pub handshake: HandshakePolicy,
    pub search_retry: Duration,
    pub reconnect_delay: Duration,
}

impl From<&SerialConfig> for LinkSettings {
    fn from(config: &SerialConfig) -> Self {
        let read_timeout = Duration::from_millis(config.read_timeout_ms);
        Self {
            baud: config.baud,
            read_timeout,
            handshake: HandshakePolicy {
                attempts: config.handshake_attempts,
                spacing: Duration::from_millis(config.handshake_spacing_ms),
                reply_timeout: read_timeout,
            },
            search_retry: Duration::from_millis(config.search_retry_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(FrameError),
}

pub struct ActuatorLink {
    provider: Arc<dyn PortProvider>,
    settings: LinkSettings,
    state_tx: watch::Sender<LinkState>,
}

impl ActuatorLink {
    pub fn new(provider: Arc<dyn PortProvider>, settings: LinkSettings) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            provider,
            settings,
            state_tx,
        }
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!("Actuator link {:?} -> {:?}", *current, state);
                *current = state;
                true
            }
        });
    }

    /// Run until shutdown: connect, serve the connection, reconnect on loss.
    pub async fn run(
        self,
        shutdown: Shutdown,
        readings: RecentSender<ActuatorReading>,
        mut commands: RecentReceiver<ActuatorCommand>,
    ) {
        // Survives reconnects: a button still held across a reconnect is
        // not a new press.
        let mut button = EdgeDetector::default();
        loop {
            let Some((port, protocol)) = self.connect(&shutdown).await else {
                break;
            };
            tracing::info!("Connected to actuator on {}", port);
            self.set_state(LinkState::Connected);

            match self.serve(&protocol, &shutdown, &readings, &mut commands, &mut button).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(e) => {
                    tracing::error!("Lost actuator connection on {}: {}", port, e);
                    self.set_state(LinkState::Disconnected);
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = sleep(self.settings.reconnect_delay) => {}
                    }
                }
            }
        }
        self.set_state(LinkState::Disconnected);
        tracing::info!("Actuator link stopped");
    }

    /// Search ports until one completes the handshake. `None` on shutdown.
    async fn connect(&self, shutdown: &Shutdown) -> Option<(String, Protocol)> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            self.set_state(LinkState::Searching);
            tracing::debug!("Searching for actuator port");
            match self.candidate_ports() {
                Ok(ports) => {
                    for port in ports {
                        self.set_state(LinkState::Handshaking);
                        tokio::select! {
                            _ = shutdown.wait() => return None,
                            result = self.try_port(&port) => match result {
                                Ok(protocol) => return Some((port, protocol)),
                                Err(e) => tracing::debug!("Port {} rejected: {}", port, e),
                            }
                        }
                    }
                }
                Err(e) => tracing::debug!("{}", e),
            }
            self.set_state(LinkState::Searching);
            tokio::select! {
                _ = shutdown.wait() => return None,
                _ = sleep(self.settings.search_retry) => {}
            }
        }
    }

    fn candidate_ports(&self) -> Result<Vec<String>, LinkError> {
        let ports = self.provider.available_ports().map_err(LinkError::Enumerate)?;
        if ports.is_empty() {
            return Err(LinkError::NoPorts);
        }
        Ok(ports)
    }

    async fn try_port(&self, port: &str) -> Result<Protocol, LinkError> {
        let transport = self
            .provider
            .open(port, self.settings.baud)
            .map_err(|source| LinkError::Open {
                port: port.to_string(),
                source,
            })?;
        handshake(transport.as_ref(), self.settings.handshake).await?;
        Ok(Protocol::new(transport, self.settings.read_timeout))
    }

    /// Drive the read and write paths concurrently until one of them fails
    /// hard or shutdown is requested.
    async fn serve(
        &self,
        protocol: &Protocol,
        shutdown: &Shutdown,
        readings: &RecentSender<ActuatorReading>,
        commands: &mut RecentReceiver<ActuatorCommand>,
        button: &mut EdgeDetector,
    ) -> SessionEnd {
        tokio::select! {
            _ = shutdown.wait() => SessionEnd::Shutdown,
            end = read_path(protocol, readings, button) => end,
            end = write_path(protocol, commands) => end,
        }
    }
}

async fn read_path(
    protocol: &Protocol,
    readings: &RecentSender<ActuatorReading>,
    button: &mut EdgeDetector,
) -> SessionEnd {
    loop {
        let frame = match protocol.read_frame().await {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                tracing::warn!("Actuator read: {}", e);
                continue;
            }
            Err(e) => return SessionEnd::Lost(e),
        };

        for message in &frame.debugs {
            if let Payload::Text(text) = &message.payload {
                tracing::debug!("Actuator debug: {}", text);
            }
        }
        for message in &frame.events {
            if let Payload::Text(text) = &message.payload {
                tracing::info!("Actuator event: {}", text);
            }
        }

        if frame.variables.is_empty() {
            continue;
        }
        let Some((pressed, position)) = extract_reading(&frame) else {
            tracing::warn!("Incomplete variable set from actuator ({} variables)", frame.variables.len());
            continue;
        };
        let reading = ActuatorReading {
            window_position: position,
            button_pressed: button.rising(pressed),
        };
        if readings.push(reading) {
            tracing::warn!("Actuator reading queue full, dropped the oldest reading");
        }
    }
}

async fn write_path(protocol: &Protocol, commands: &mut RecentReceiver<ActuatorCommand>) -> SessionEnd {
    let mut buffer = SendBuffer::new();
    loop {
        let Some(command) = commands.recv().await else {
            tracing::info!("Command queue closed, stopping actuator writes");
            return SessionEnd::Shutdown;
        };
        encode_command(&mut buffer, &command);
        let Some(frame) = buffer.take_frame() else {
            continue;
        };
        tracing::trace!("Sending command frame {:?}", command);
        match protocol.write_frame(&frame).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => tracing::error!("Failed to send command to actuator: {}", e),
            Err(e) => return SessionEnd::Lost(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::codec::{Message, MessageType, VarType};

    fn int16(id: u8, value: i16) -> Message {
        Message {
            message_type: MessageType::Variable,
            var_type: VarType::Int16,
            id,
            size: 2,
            payload: Payload::Int16(value),
        }
    }

    #[test]
    fn test_button_edges() {
        let mut edge = EdgeDetector::default();
        let presses = [false, false, true, true, false, true];
        let toggles: Vec<usize> = presses
            .iter()
            .enumerate()
            .filter_map(|(i, p)| edge.rising(*p).then_some(i))
            .collect();
        assert_eq!(toggles, vec![2, 5]);
    }

    #[test]
    fn test_extract_reading_by_id() {
        let mut frame = Frame::default();
        frame.push(int16(WINDOW_POSITION_VAR_ID, 60));
        frame.push(int16(BUTTON_VAR_ID, 1));
        assert_eq!(extract_reading(&frame), Some((true, 60)));

        let mut partial = Frame::default();
        partial.push(int16(BUTTON_VAR_ID, 0));
        assert_eq!(extract_reading(&partial), None);
    }

    #[test]
    fn test_encode_command_layout() {
        let mut buffer = SendBuffer::new();
        let command = ActuatorCommand {
            temperature: 31,
            operative_mode: 1,
            window_action: 0,
            system_status: 1,
            window_angle: 1,
        };
        encode_command(&mut buffer, &command);
        assert_eq!(buffer.len(), 5);
        let frame = buffer.take_frame().unwrap();
        assert_eq!(&frame[..3], &[0xFF, 0x00, 5]);
        assert_eq!(&frame[3..7], &[0, 2, 31, 0]);
        assert_eq!(&frame[19..23], &[4, 2, 1, 0]);
    }
}
