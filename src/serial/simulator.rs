//! Simulated window actuator behind a memory port, for running the unit
//! without hardware (`serial.simulate` or `--simulate-actuator`).
//!
//! Each step drains what the controller wrote, answers the handshake,
//! applies command frames, moves the window a few degrees towards its target
//! and reports a reading frame.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use super::codec::{MessageType, VarType, HANDSHAKE_ACK, HANDSHAKE_PROBE, INT16_SIZE, SYNC};
use super::link::{
    BUTTON_VAR_ID, CMD_OPERATIVE_MODE_ID, CMD_WINDOW_ACTION_ID, CMD_WINDOW_ANGLE_ID, WINDOW_POSITION_VAR_ID,
};
use super::memory::{MemoryPort, MemoryPorts};
use crate::shutdown::Shutdown;
use crate::state::{Degree, OperativeMode, WindowAction, WINDOW_CLOSED, WINDOW_FULLY_OPEN};

pub const SIMULATED_PORT: &str = "/dev/sim-actuator";
/// Degrees the simulated motor travels per step.
const STEP_DEGREES: Degree = 5;
/// Outbound variables are `id size value_lo value_hi`.
const OUTBOUND_VAR_LEN: usize = 4;

pub struct SimulatedActuator {
    port: Arc<MemoryPort>,
    period: Duration,
    pending: Vec<u8>,
    acked: bool,
    position: Degree,
    target: Degree,
}

impl SimulatedActuator {
    pub fn new(port: Arc<MemoryPort>, period: Duration) -> Self {
        Self {
            port,
            period,
            pending: Vec::new(),
            acked: false,
            position: WINDOW_CLOSED,
            target: WINDOW_CLOSED,
        }
    }

    /// A port provider listing one simulated port, and the actuator behind it.
    pub fn attach(period: Duration) -> (MemoryPorts, Self) {
        let port = MemoryPort::new();
        let ports = MemoryPorts::new();
        ports.insert(SIMULATED_PORT, port.clone());
        (ports, Self::new(port, period))
    }

    pub fn position(&self) -> Degree {
        self.position
    }

    pub fn target(&self) -> Degree {
        self.target
    }

    pub async fn run(mut self, shutdown: Shutdown) {
        tracing::info!("Simulated actuator on {}", SIMULATED_PORT);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.step(),
            }
        }
        self.port.close();
        tracing::info!("Simulated actuator stopped");
    }

    /// One cycle of the simulated firmware.
    pub fn step(&mut self) {
        self.pending.extend(self.port.take_written());
        self.consume_written();
        if !self.acked {
            return;
        }
        let delta = (self.target - self.position).clamp(-STEP_DEGREES, STEP_DEGREES);
        self.position += delta;
        self.port.feed(&reading_frame(false, self.position));
    }

    fn consume_written(&mut self) {
        loop {
            match self.pending.as_slice() {
                [] => return,
                [first, second, count, rest @ ..] if [*first, *second] == SYNC => {
                    let len = *count as usize * OUTBOUND_VAR_LEN;
                    if rest.len() < len {
                        return;
                    }
                    let vars = rest[..len].to_vec();
                    self.apply_command(&vars);
                    self.pending.drain(..3 + len);
                }
                // Start of a frame whose count has not arrived yet.
                [first, second] if [*first, *second] == SYNC => return,
                [HANDSHAKE_PROBE, ..] => {
                    tracing::debug!("Simulated actuator acknowledging handshake");
                    self.acked = true;
                    self.port.feed(&[HANDSHAKE_ACK]);
                    self.pending.drain(..1);
                }
                [byte, ..] => {
                    tracing::debug!("Simulated actuator skipping byte {:02x}", byte);
                    self.pending.drain(..1);
                }
            }
        }
    }

    fn apply_command(&mut self, vars: &[u8]) {
        let mut mode = None;
        let mut action = None;
        let mut angle = None;
        for var in vars.chunks_exact(OUTBOUND_VAR_LEN) {
            let value = i16::from_le_bytes([var[2], var[3]]);
            match var[0] {
                CMD_OPERATIVE_MODE_ID => mode = Some(value),
                CMD_WINDOW_ACTION_ID => action = Some(value),
                CMD_WINDOW_ANGLE_ID => angle = Some(value),
                _ => {}
            }
        }
        if mode == Some(OperativeMode::Manual.code()) {
            match action {
                Some(code) if code == WindowAction::Open.code() => self.target = WINDOW_FULLY_OPEN,
                Some(code) if code == WindowAction::Close.code() => self.target = WINDOW_CLOSED,
                _ => {}
            }
        } else if let Some(angle) = angle {
            self.target = angle.clamp(WINDOW_CLOSED, WINDOW_FULLY_OPEN);
        }
    }
}

/// Inbound variable frame carrying the button state and window position.
pub fn reading_frame(pressed: bool, position: Degree) -> Vec<u8> {
    let mut frame = SYNC.to_vec();
    frame.push(2);
    for (id, value) in [(BUTTON_VAR_ID, i16::from(pressed)), (WINDOW_POSITION_VAR_ID, position)] {
        frame.extend_from_slice(&[
            u8::from(MessageType::Variable),
            u8::from(VarType::Int16),
            id,
            INT16_SIZE,
        ]);
        frame.extend_from_slice(&value.to_le_bytes());
    }
    frame
}
