//! Integration tests for the state coordinator running over real channels.

use climate_unit::config::Config;
use climate_unit::coordinator::{Coordinator, CoordinatorInputs};
use climate_unit::queue::{recent_channel, RecentReceiver, RecentSender};
use climate_unit::shutdown::Shutdown;
use climate_unit::state::{ActuatorCommand, ActuatorReading, Command, Device, OperativeMode, Status};
use climate_unit::web::{ControlSurface, CoordinatorHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

struct Harness {
    temps: mpsc::Sender<f64>,
    control: CoordinatorHandle,
    readings: RecentSender<ActuatorReading>,
    commands: RecentReceiver<ActuatorCommand>,
    intervals: mpsc::UnboundedReceiver<Duration>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

fn start() -> Harness {
    let config = Config::default();
    let (temps, temp_rx) = mpsc::channel(8);
    let (request_tx, request_rx) = mpsc::channel(8);
    let (interval_tx, intervals) = mpsc::unbounded_channel();
    let (readings, readings_rx) = recent_channel(config.serial.inbound_capacity);
    let (commands_tx, commands) = recent_channel(1);
    let shutdown = Shutdown::new();

    let coordinator = Coordinator::new(&config, interval_tx, commands_tx);
    let inputs = CoordinatorInputs {
        temperatures: temp_rx,
        requests: request_rx,
        readings: readings_rx,
    };
    let task = tokio::spawn(coordinator.run(inputs, shutdown.clone()));
    Harness {
        temps,
        control: CoordinatorHandle::new(request_tx, Duration::from_secs(1)),
        readings,
        commands,
        intervals,
        shutdown,
        task,
    }
}

impl Harness {
    async fn sample(&self, temp: f64) {
        self.temps.send(temp).await.unwrap();
        sleep(Duration::from_millis(1)).await;
    }

    async fn actuator_reading(&self, position: i16, pressed: bool) {
        self.readings.push(ActuatorReading {
            window_position: position,
            button_pressed: pressed,
        });
        sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_alarm_latches_until_reset() {
    let h = start();
    h.sample(80.0).await;
    assert_eq!(h.control.snapshot().await.unwrap().status, Status::TooHot);

    sleep(Duration::from_secs(11)).await;
    h.sample(80.0).await;
    assert_eq!(h.control.snapshot().await.unwrap().status, Status::Alarm);

    // Cooling down alone does not clear the latch.
    h.sample(20.0).await;
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.status, Status::Alarm);
    assert_eq!(state.command_window_position, 90);

    h.control.submit(Command::ResetAlarm).await.unwrap();
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.status, Status::Normal);
    assert_eq!(state.status_string, "NORMAL");
    assert_eq!(state.command_window_position, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_too_hot_waits_for_cooler_sample() {
    let h = start();
    h.sample(80.0).await;
    sleep(Duration::from_secs(10)).await;
    h.sample(80.0).await;
    h.control.submit(Command::ResetAlarm).await.unwrap();
    assert_eq!(h.control.snapshot().await.unwrap().status, Status::Alarm);

    h.sample(50.0).await;
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.status, Status::Hot);
    assert_eq!(state.command_window_position, 35);
}

#[tokio::test(start_paused = true)]
async fn test_statistics_follow_samples() {
    let h = start();
    for temp in [20.0, 24.0, 28.0] {
        h.sample(temp).await;
    }
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.current_temp, 28.0);
    assert_eq!(state.min_temp, 20.0);
    assert_eq!(state.max_temp, 28.0);
    assert_eq!(state.average_temp, 24.0);
    assert!(state.is_online(Device::BusPeer));
}

#[tokio::test(start_paused = true)]
async fn test_manual_open_reaches_actuator_once() {
    let mut h = start();
    h.actuator_reading(0, false).await;
    h.control.submit(Command::ToggleMode).await.unwrap();
    h.control.submit(Command::OpenWindow).await.unwrap();
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.operative_mode, OperativeMode::Manual);
    assert!(state.is_online(Device::Actuator));

    sleep(Duration::from_millis(300)).await;
    let command = h.commands.try_recv().expect("command after tick");
    assert_eq!(command.window_action, 1);
    assert_eq!(command.operative_mode, OperativeMode::Manual.code());

    sleep(Duration::from_millis(250)).await;
    let command = h.commands.try_recv().expect("command after next tick");
    assert_eq!(command.window_action, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_ignored_in_automatic_mode() {
    let mut h = start();
    h.actuator_reading(0, false).await;
    h.control.submit(Command::OpenWindow).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    let command = h.commands.try_recv().expect("command after tick");
    assert_eq!(command.window_action, 0);
    assert_eq!(command.operative_mode, OperativeMode::Automatic.code());
}

#[tokio::test(start_paused = true)]
async fn test_button_press_toggles_mode() {
    let h = start();
    h.actuator_reading(30, true).await;
    let state = h.control.snapshot().await.unwrap();
    assert_eq!(state.operative_mode, OperativeMode::Manual);
    assert_eq!(state.window_position, 30);

    h.actuator_reading(30, false).await;
    assert_eq!(h.control.snapshot().await.unwrap().operative_mode, OperativeMode::Manual);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_overflow_keeps_latest_readings() {
    let h = start();
    // Fill past capacity before the coordinator gets to run.
    for position in 0..25 {
        h.readings.push(ActuatorReading {
            window_position: position,
            button_pressed: false,
        });
    }
    sleep(Duration::from_millis(1)).await;
    assert_eq!(h.control.snapshot().await.unwrap().window_position, 24);
}

#[tokio::test(start_paused = true)]
async fn test_bus_peer_goes_offline_and_gets_nudged() {
    let mut h = start();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(h.intervals.try_recv().unwrap(), Duration::from_millis(500));

    h.sample(20.0).await;
    assert!(h.control.snapshot().await.unwrap().is_online(Device::BusPeer));

    sleep(Duration::from_millis(2100)).await;
    assert!(!h.control.snapshot().await.unwrap().is_online(Device::BusPeer));
    assert!(h.intervals.try_recv().is_err());

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.intervals.try_recv().unwrap(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_hot_sample_switches_interval() {
    let mut h = start();
    sleep(Duration::from_millis(1)).await;
    let _startup = h.intervals.try_recv();
    h.sample(45.0).await;
    assert_eq!(h.intervals.try_recv().unwrap(), Duration::from_millis(100));
    assert_eq!(
        h.control.snapshot().await.unwrap().sampling_interval,
        Duration::from_millis(100)
    );
}

#[tokio::test(start_paused = true)]
async fn test_actuator_timeout_stops_commands() {
    let mut h = start();
    h.actuator_reading(0, false).await;
    sleep(Duration::from_millis(5100)).await;
    assert!(!h.control.snapshot().await.unwrap().is_online(Device::Actuator));

    while h.commands.try_recv().is_some() {}
    sleep(Duration::from_secs(1)).await;
    assert!(h.commands.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_coordinator() {
    let h = start();
    h.shutdown.trigger();
    h.task.await.unwrap();
    assert!(h.control.snapshot().await.is_err());
}
