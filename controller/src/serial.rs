//! Line-oriented transport to the microcontroller.

use std::io;

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use solar_common::Actuators;

/// Longer lines are handed over in pieces, which the frame decoder rejects as malformed.
const MAX_LINE_BYTES: usize = 1024;

#[async_trait]
pub trait FrameTransport: Send {
    /// Next complete line without its terminator; `None` once the device closes.
    async fn next_line(&mut self) -> io::Result<Option<String>>;

    /// Writes the command frame and flushes it before returning.
    async fn send_command(&mut self, actuators: Actuators) -> io::Result<()>;
}

/// Newline-delimited frames over any byte stream.
pub struct LineTransport<S> {
    stream: BufReader<S>,
}

pub type SerialTransport = LineTransport<SerialPort>;

impl SerialTransport {
    pub fn open(device: &str, baud_rate: u32) -> io::Result<Self> {
        let port = SerialPort::open(device, baud_rate)?;
        info!(device, baud_rate, "opened serial device");
        Ok(Self::new(port))
    }
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }
}

#[async_trait]
impl<S> FrameTransport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        // Line noise on the wire is replaced, not fatal.
        Ok(Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        ))
    }

    async fn send_command(&mut self, actuators: Actuators) -> io::Result<()> {
        let port = self.stream.get_mut();
        port.write_all(format!("{}\n", actuators.frame()).as_bytes())
            .await?;
        port.flush().await
    }
}

impl<S> std::fmt::Debug for LineTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport").finish_non_exhaustive()
    }
}
