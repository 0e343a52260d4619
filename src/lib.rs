//! Climate control unit: reads temperature samples from the message bus,
//! classifies them, drives the window actuator over serial and exposes an
//! HTTP control surface.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod queue;
pub mod serial;
pub mod shutdown;
pub mod state;
pub mod thermal;
pub mod web;
