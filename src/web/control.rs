//! The capability the HTTP handlers depend on, with the coordinator-backed
//! implementation and a canned one for running without devices.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::coordinator::CoordinatorRequest;
use crate::state::{Command, Device, OperativeMode, Status, SystemState};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("State coordinator is not running")]
    Unavailable,
    #[error("State coordinator did not answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ControlSurface: Send + Sync {
    /// Queue a command. Returns once the coordinator has accepted it.
    async fn submit(&self, command: Command) -> Result<(), ControlError>;
    async fn snapshot(&self) -> Result<SystemState, ControlError>;
}

/// Talks to the coordinator task over its request channel.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorRequest>,
    reply_timeout: Duration,
}

impl CoordinatorHandle {
    pub fn new(tx: mpsc::Sender<CoordinatorRequest>, reply_timeout: Duration) -> Self {
        Self { tx, reply_timeout }
    }

    async fn send(&self, request: CoordinatorRequest) -> Result<(), ControlError> {
        match timeout(self.reply_timeout, self.tx.send(request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ControlError::Unavailable),
            Err(_) => Err(ControlError::Timeout(self.reply_timeout)),
        }
    }
}

#[async_trait]
impl ControlSurface for CoordinatorHandle {
    async fn submit(&self, command: Command) -> Result<(), ControlError> {
        self.send(CoordinatorRequest::Command(command)).await
    }

    async fn snapshot(&self) -> Result<SystemState, ControlError> {
        let (respond_to, response) = oneshot::channel();
        self.send(CoordinatorRequest::GetState { respond_to }).await?;
        match timeout(self.reply_timeout, response).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(ControlError::Unavailable),
            Err(_) => Err(ControlError::Timeout(self.reply_timeout)),
        }
    }
}

/// Accepts every command and always reports the same state.
#[derive(Debug, Clone)]
pub struct MockControl {
    state: SystemState,
}

impl MockControl {
    pub fn new() -> Self {
        let mut state = SystemState::new(Duration::from_millis(100));
        state.current_temp = 25.0;
        state.average_temp = 32.0;
        state.min_temp = 12.0;
        state.max_temp = 47.0;
        state.set_status(Status::Normal);
        state.operative_mode = OperativeMode::Automatic;
        state.devices_online = BTreeMap::from([
            (Device::Server, true),
            (Device::BusPeer, false),
            (Device::Actuator, false),
        ]);
        Self { state }
    }
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlSurface for MockControl {
    async fn submit(&self, command: Command) -> Result<(), ControlError> {
        tracing::info!("Mock control accepted {:?}", command);
        Ok(())
    }

    async fn snapshot(&self) -> Result<SystemState, ControlError> {
        Ok(self.state.clone())
    }
}
