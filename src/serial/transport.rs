use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Byte-level access to an open serial connection. Reads and writes take
/// `&self` so the read and write paths can run concurrently on one port.
#[async_trait]
pub trait SerialTransport: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf).await? {
                0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "serial write returned 0")),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// Port discovery and opening.
pub trait PortProvider: Send + Sync {
    fn available_ports(&self) -> io::Result<Vec<String>>;
    fn open(&self, name: &str, baud: u32) -> io::Result<Arc<dyn SerialTransport>>;
}

#[async_trait]
impl SerialTransport for serial2_tokio::SerialPort {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        serial2_tokio::SerialPort::read(self, buf).await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        serial2_tokio::SerialPort::write(self, buf).await
    }
}

/// Serial ports of the host, through `serial2-tokio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        let paths = serial2_tokio::SerialPort::available_ports()?;
        Ok(paths.iter().map(|p| p.display().to_string()).collect())
    }

    fn open(&self, name: &str, baud: u32) -> io::Result<Arc<dyn SerialTransport>> {
        // 8N1 is the serial2 default for a bare baud rate.
        let port = serial2_tokio::SerialPort::open(name, baud)?;
        Ok(Arc::new(port))
    }
}
