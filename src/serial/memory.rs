//! In-memory serial ports. Back the simulated actuator and the link tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::transport::{PortProvider, SerialTransport};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A port whose inbound bytes are fed by the caller and whose outbound bytes
/// are recorded. Reads wait until bytes arrive or the port is closed.
#[derive(Debug, Default)]
pub struct MemoryPort {
    inbound: Mutex<VecDeque<u8>>,
    written: Mutex<Vec<u8>>,
    readable: Notify,
    written_notify: Notify,
    closed: AtomicBool,
}

impl MemoryPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue bytes for the reader.
    pub fn feed(&self, bytes: &[u8]) {
        locked(&self.inbound).extend(bytes.iter().copied());
        self.readable.notify_one();
    }

    /// Bytes not yet consumed by the reader.
    pub fn pending_input(&self) -> Vec<u8> {
        locked(&self.inbound).iter().copied().collect()
    }

    pub fn written(&self) -> Vec<u8> {
        locked(&self.written).clone()
    }

    /// Drain everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *locked(&self.written))
    }

    /// Wait until at least `len` bytes have been written.
    pub async fn wait_written(&self, len: usize) -> Vec<u8> {
        loop {
            let notified = self.written_notify.notified();
            {
                let written = locked(&self.written);
                if written.len() >= len {
                    return written.clone();
                }
            }
            notified.await;
        }
    }

    /// Simulate unplugging: pending and future reads report end of stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_one();
    }
}

#[async_trait]
impl SerialTransport for MemoryPort {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut inbound = locked(&self.inbound);
                if !inbound.is_empty() {
                    let n = buf.len().min(inbound.len());
                    for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            self.readable.notified().await;
        }
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory port closed"));
        }
        locked(&self.written).extend_from_slice(buf);
        self.written_notify.notify_waiters();
        Ok(buf.len())
    }
}

/// A fixed set of named memory ports.
#[derive(Debug, Default, Clone)]
pub struct MemoryPorts {
    ports: Arc<Mutex<Vec<(String, Arc<MemoryPort>)>>>,
}

impl MemoryPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, port: Arc<MemoryPort>) {
        locked(&self.ports).push((name.to_string(), port));
    }

    pub fn remove(&self, name: &str) {
        locked(&self.ports).retain(|(n, _)| n != name);
    }
}

impl PortProvider for MemoryPorts {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        Ok(locked(&self.ports).iter().map(|(name, _)| name.clone()).collect())
    }

    fn open(&self, name: &str, _baud: u32) -> io::Result<Arc<dyn SerialTransport>> {
        locked(&self.ports)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, port)| port.clone() as Arc<dyn SerialTransport>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no port {}", name)))
    }
}
