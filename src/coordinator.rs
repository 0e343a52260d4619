//! The state coordinator: a single task that owns [`SystemState`] and reacts
//! to temperature samples, control requests, actuator readings and timers.
//! Nothing else mutates the state; readers get copies over a oneshot reply.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::queue::{RecentReceiver, RecentSender};
use crate::shutdown::Shutdown;
use crate::state::{
    ActuatorCommand, ActuatorReading, Command, Device, OperativeMode, Status, SystemState,
    WindowAction,
};
use crate::thermal::ThermalPolicy;

/// Represents a request sent from the control surface to the coordinator.
#[derive(Debug)]
pub enum CoordinatorRequest {
    /// Apply a command. Accepted once queued; no reply.
    Command(Command),
    /// A request for a snapshot of the current state.
    GetState {
        /// The channel to send the snapshot back on.
        respond_to: oneshot::Sender<SystemState>,
    },
}

/// Coordinator timers.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub bus_peer_timeout: Duration,
    pub actuator_timeout: Duration,
    pub command_period: Duration,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            bus_peer_timeout: Duration::from_millis(config.devices.bus_peer_timeout_ms),
            actuator_timeout: Duration::from_millis(config.devices.actuator_timeout_ms),
            command_period: Duration::from_millis(config.serial.command_period_ms),
        }
    }
}

/// Input channels consumed by [`Coordinator::run`].
pub struct CoordinatorInputs {
    pub temperatures: mpsc::Receiver<f64>,
    pub requests: mpsc::Receiver<CoordinatorRequest>,
    pub readings: RecentReceiver<ActuatorReading>,
}

pub struct Coordinator {
    state: SystemState,
    policy: ThermalPolicy,
    settings: CoordinatorSettings,
    pending_action: WindowAction,
    reset_pending: bool,
    interval_tx: mpsc::UnboundedSender<Duration>,
    commands_out: RecentSender<ActuatorCommand>,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        interval_tx: mpsc::UnboundedSender<Duration>,
        commands_out: RecentSender<ActuatorCommand>,
    ) -> Self {
        let policy = ThermalPolicy::new(&config.thermal);
        Self {
            state: SystemState::new(policy.normal_interval()),
            policy,
            settings: CoordinatorSettings::from(config),
            pending_action: WindowAction::None,
            reset_pending: false,
            interval_tx,
            commands_out,
        }
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn pending_action(&self) -> WindowAction {
        self.pending_action
    }

    fn publish_interval(&self, interval: Duration) {
        if self.interval_tx.send(interval).is_err() {
            tracing::debug!("Interval publisher is gone, dropping update {:?}", interval);
        }
    }

    fn mark_online(&mut self, device: Device) {
        if self.state.set_online(device, true) {
            tracing::info!("{:?} is now online", device);
        }
    }

    /// Fold a temperature sample into the state and refresh bus-peer liveness.
    pub fn handle_temperature(&mut self, temp: f64, now: Instant) {
        self.mark_online(Device::BusPeer);

        let before = self.state.sampling_interval;
        if self.state.status == Status::Alarm
            && self.reset_pending
            && temp < self.policy.thresholds().too_hot
        {
            self.reset_pending = false;
            self.policy.clear_alarm(&mut self.state);
        }

        self.policy.ingest(&mut self.state, temp, now);
        // Compared across the clear and the sample: the peer only hears the net change.
        if self.state.sampling_interval != before {
            self.publish_interval(self.state.sampling_interval);
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        tracing::debug!("Command {:?}", command);
        match command {
            Command::ToggleMode => self.state.toggle_mode(),
            Command::OpenWindow => self.set_manual_action(WindowAction::Open),
            Command::CloseWindow => self.set_manual_action(WindowAction::Close),
            Command::ResetAlarm => self.reset_alarm(),
        }
    }

    fn set_manual_action(&mut self, action: WindowAction) {
        if self.state.operative_mode == OperativeMode::Manual {
            self.pending_action = action;
        } else {
            tracing::info!("Ignoring {:?} in {} mode", action, self.state.operative_mode);
            self.pending_action = WindowAction::None;
        }
    }

    fn reset_alarm(&mut self) {
        if self.state.status != Status::Alarm {
            return;
        }
        if self.state.current_temp < self.policy.thresholds().too_hot {
            self.reset_pending = false;
            if let Some(interval) = self.policy.clear_alarm(&mut self.state) {
                self.publish_interval(interval);
            }
        } else {
            tracing::info!(
                "Alarm reset deferred until temperature drops below {:.1}°C",
                self.policy.thresholds().too_hot
            );
            self.reset_pending = true;
        }
    }

    fn handle_request(&mut self, request: CoordinatorRequest) {
        match request {
            CoordinatorRequest::Command(command) => self.handle_command(command),
            CoordinatorRequest::GetState { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
        }
    }

    pub fn handle_reading(&mut self, reading: ActuatorReading) {
        self.state.window_position = reading.window_position;
        if reading.button_pressed {
            tracing::info!("Actuator button pressed");
            self.state.toggle_mode();
        }
        self.mark_online(Device::Actuator);
    }

    /// Build the next actuator command and consume the pending manual action.
    /// `None` while the actuator is offline.
    pub fn next_command(&mut self) -> Option<ActuatorCommand> {
        if !self.state.is_online(Device::Actuator) {
            return None;
        }
        let action = std::mem::take(&mut self.pending_action);
        Some(ActuatorCommand::from_state(&self.state, action))
    }

    fn on_command_tick(&mut self) {
        if let Some(command) = self.next_command() {
            if self.commands_out.push(command) {
                tracing::warn!("Actuator has not drained the previous command, replaced it");
            }
        }
    }

    pub fn handle_bus_peer_timeout(&mut self) {
        if self.state.is_online(Device::BusPeer) {
            tracing::warn!("Bus peer went offline (timeout)");
            self.state.set_online(Device::BusPeer, false);
        } else {
            // Nudge the peer so it picks the interval up when it reconnects.
            self.publish_interval(self.state.sampling_interval);
        }
    }

    pub fn handle_actuator_timeout(&mut self) {
        if self.state.set_online(Device::Actuator, false) {
            tracing::warn!("Actuator went offline (timeout)");
        }
    }

    /// Event loop. Runs until shutdown is triggered.
    pub async fn run(mut self, mut inputs: CoordinatorInputs, shutdown: Shutdown) {
        let peer_deadline = sleep(self.settings.bus_peer_timeout);
        let actuator_deadline = sleep(self.settings.actuator_timeout);
        tokio::pin!(peer_deadline, actuator_deadline);
        let mut command_tick = interval(self.settings.command_period);
        command_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("State coordinator started");
        self.publish_interval(self.state.sampling_interval);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(temp) = inputs.temperatures.recv() => {
                    let now = Instant::now();
                    peer_deadline.as_mut().reset(now + self.settings.bus_peer_timeout);
                    self.handle_temperature(temp, now);
                }
                Some(request) = inputs.requests.recv() => self.handle_request(request),
                Some(reading) = inputs.readings.recv() => {
                    actuator_deadline.as_mut().reset(Instant::now() + self.settings.actuator_timeout);
                    self.handle_reading(reading);
                }
                _ = command_tick.tick() => self.on_command_tick(),
                () = &mut peer_deadline => {
                    peer_deadline.as_mut().reset(Instant::now() + self.settings.bus_peer_timeout);
                    self.handle_bus_peer_timeout();
                }
                () = &mut actuator_deadline => {
                    actuator_deadline.as_mut().reset(Instant::now() + self.settings.actuator_timeout);
                    self.handle_actuator_timeout();
                }
            }
        }
        tracing::info!("State coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::recent_channel;

    fn coordinator() -> (
        Coordinator,
        mpsc::UnboundedReceiver<Duration>,
        RecentReceiver<ActuatorCommand>,
    ) {
        let (interval_tx, interval_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = recent_channel(1);
        let coordinator = Coordinator::new(&Config::default(), interval_tx, commands_tx);
        (coordinator, interval_rx, commands_rx)
    }

    fn online_actuator(c: &mut Coordinator) {
        c.handle_reading(ActuatorReading {
            window_position: 0,
            button_pressed: false,
        });
    }

    #[test]
    fn test_manual_actions_only_in_manual_mode() {
        let (mut c, _, _) = coordinator();
        online_actuator(&mut c);
        c.handle_command(Command::OpenWindow);
        assert_eq!(c.pending_action(), WindowAction::None);

        c.handle_command(Command::ToggleMode);
        assert_eq!(c.state().operative_mode, OperativeMode::Manual);
        c.handle_command(Command::OpenWindow);
        assert_eq!(c.pending_action(), WindowAction::Open);

        let cmd = c.next_command().unwrap();
        assert_eq!(cmd.window_action, WindowAction::Open.code());
        assert_eq!(c.pending_action(), WindowAction::None);
        assert_eq!(c.next_command().unwrap().window_action, 0);
    }

    #[test]
    fn test_no_command_while_actuator_offline() {
        let (mut c, _, _) = coordinator();
        assert!(c.next_command().is_none());
        online_actuator(&mut c);
        assert!(c.next_command().is_some());
        c.handle_actuator_timeout();
        assert!(c.next_command().is_none());
    }

    #[test]
    fn test_button_edge_toggles_mode() {
        let (mut c, _, _) = coordinator();
        c.handle_reading(ActuatorReading {
            window_position: 45,
            button_pressed: true,
        });
        assert_eq!(c.state().operative_mode, OperativeMode::Manual);
        assert_eq!(c.state().window_position, 45);
        assert!(c.state().is_online(Device::Actuator));
    }

    #[test]
    fn test_interval_published_on_change_only() {
        let (mut c, mut intervals, _) = coordinator();
        let now = Instant::now();
        c.handle_temperature(20.0, now);
        c.handle_temperature(21.0, now);
        assert!(intervals.try_recv().is_err());
        c.handle_temperature(40.0, now);
        c.handle_temperature(41.0, now);
        assert_eq!(intervals.try_recv().unwrap(), Duration::from_millis(100));
        assert!(intervals.try_recv().is_err());
    }

    #[test]
    fn test_bus_peer_timeout_then_nudge() {
        let (mut c, mut intervals, _) = coordinator();
        c.handle_temperature(20.0, Instant::now());
        assert!(c.state().is_online(Device::BusPeer));
        c.handle_bus_peer_timeout();
        assert!(!c.state().is_online(Device::BusPeer));
        assert!(intervals.try_recv().is_err());
        c.handle_bus_peer_timeout();
        assert_eq!(intervals.try_recv().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_reset_alarm_requires_cool_sample() {
        let (mut c, _, _) = coordinator();
        let start = Instant::now();
        c.handle_temperature(80.0, start);
        c.handle_temperature(80.0, start + Duration::from_secs(10));
        assert_eq!(c.state().status, Status::Alarm);

        // Still too hot: the reset waits for a cooler sample.
        c.handle_command(Command::ResetAlarm);
        assert_eq!(c.state().status, Status::Alarm);
        c.handle_temperature(75.0, start + Duration::from_secs(11));
        assert_eq!(c.state().status, Status::Alarm);
        c.handle_temperature(50.0, start + Duration::from_secs(12));
        assert_eq!(c.state().status, Status::Hot);
        assert_eq!(c.state().command_window_position, 35);
    }

    #[test]
    fn test_reset_alarm_immediate_when_cool() {
        let (mut c, _, _) = coordinator();
        let start = Instant::now();
        c.handle_temperature(80.0, start);
        c.handle_temperature(80.0, start + Duration::from_secs(10));
        c.handle_temperature(20.0, start + Duration::from_secs(11));
        assert_eq!(c.state().status, Status::Alarm);
        c.handle_command(Command::ResetAlarm);
        assert_eq!(c.state().status, Status::Normal);
        assert_eq!(c.state().command_window_position, 0);
    }

    #[test]
    fn test_reset_alarm_publishes_normal_interval() {
        let (mut c, mut intervals, _) = coordinator();
        let start = Instant::now();
        c.handle_temperature(80.0, start);
        assert_eq!(intervals.try_recv().unwrap(), Duration::from_millis(100));
        c.handle_temperature(80.0, start + Duration::from_secs(10));
        c.handle_temperature(20.0, start + Duration::from_secs(11));
        assert!(intervals.try_recv().is_err());

        c.handle_command(Command::ResetAlarm);
        assert_eq!(c.state().sampling_interval, Duration::from_millis(500));
        assert_eq!(intervals.try_recv().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_deferred_reset_publishes_net_interval_once() {
        let (mut c, mut intervals, _) = coordinator();
        let start = Instant::now();
        c.handle_temperature(80.0, start);
        c.handle_temperature(80.0, start + Duration::from_secs(10));
        let _ = intervals.try_recv();
        c.handle_command(Command::ResetAlarm);

        c.handle_temperature(25.0, start + Duration::from_secs(11));
        assert_eq!(c.state().status, Status::Normal);
        assert_eq!(intervals.try_recv().unwrap(), Duration::from_millis(500));
        assert!(intervals.try_recv().is_err());
    }

    #[test]
    fn test_reset_outside_alarm_is_noop() {
        let (mut c, _, _) = coordinator();
        c.handle_temperature(50.0, Instant::now());
        c.handle_command(Command::ResetAlarm);
        assert_eq!(c.state().status, Status::Hot);
    }
}
