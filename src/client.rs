//! One-shot client for a running bridge daemon
//!
//! Connects to the daemon's config listener, sends a single update frame
//! and prints the reply. Also carries the raw `send` bring-up command
//! that pushes a duty frame straight to the actuator.

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::channel::{ActuatorLink, IO_TIMEOUT};
use crate::config::{ConfigReply, ConfigUpdate};
use crate::errors::{FanBridgeError, Result};

/// Client for the daemon's inbound config channel
pub struct BridgeClient {
    addr: String,
}

impl BridgeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Send one config frame and wait for the synchronous reply
    pub async fn send_update(&self, update: &ConfigUpdate) -> Result<ConfigReply> {
        if update.is_empty() {
            return Err(FanBridgeError::Config(
                "update carries no fields".to_string(),
            ));
        }

        debug!("sending config update to {}: {:?}", self.addr, update);

        let stream = timeout(IO_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))??;
        let (reader, mut writer) = stream.into_split();

        let mut frame = serde_json::to_vec(update)?;
        frame.push(b'\n');
        timeout(IO_TIMEOUT, writer.write_all(&frame))
            .await
            .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))??;

        let mut lines = BufReader::new(reader).lines();
        let line = timeout(IO_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))??
            .ok_or_else(|| {
                FanBridgeError::Config("daemon closed the connection without a reply".to_string())
            })?;

        Ok(serde_json::from_str(&line)?)
    }
}

/// Push one raw duty frame to the actuator, bypassing the daemon
pub async fn send_test_command(addr: &str, pwm: u8) -> Result<()> {
    ActuatorLink::new(addr).send(pwm).await
}
