//! The command channel: outbound duty frames and inbound config frames
//!
//! Both directions speak newline-delimited UTF-8 JSON over TCP. Outbound
//! the bridge sends `{"pwm": <0-100>}` to the actuator, reusing one
//! connection and reconnecting transparently when it goes stale. Inbound
//! a listener accepts `ConfigUpdate` frames and answers each one with a
//! `ConfigReply`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::{ConfigReply, ConfigUpdate};
use crate::controller::FanController;
use crate::errors::{FanBridgeError, Result};

/// Bound on connects and writes so a hung endpoint cannot stall the
/// control loop past one tick
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound command frame applied by the actuator as a PWM duty cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub pwm: u8,
}

/// Outbound connection to the actuator
pub struct ActuatorLink {
    addr: String,
    stream: Option<TcpStream>,
}

impl ActuatorLink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one duty command, reconnecting once if the cached connection
    /// turned stale since the last send
    pub async fn send(&mut self, duty: u8) -> Result<()> {
        let mut frame = serde_json::to_vec(&Command { pwm: duty })?;
        frame.push(b'\n');

        if let Some(stream) = self.stream.as_mut() {
            match write_frame(stream, &frame).await {
                Ok(()) => {
                    debug!("sent pwm={} to {}", duty, self.addr);
                    return Ok(());
                }
                Err(e) => {
                    debug!("cached connection to {} went stale: {}", self.addr, e);
                    self.stream = None;
                }
            }
        }

        let mut stream = self.connect().await?;
        write_frame(&mut stream, &frame).await?;
        self.stream = Some(stream);
        debug!("sent pwm={} to {}", duty, self.addr);
        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))?
            .map_err(|e| FanBridgeError::SendFailure(format!("connect {}: {}", self.addr, e)))?;
        info!("connected to actuator at {}", self.addr);
        Ok(stream)
    }
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<()> {
    timeout(IO_TIMEOUT, stream.write_all(frame))
        .await
        .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))?
        .map_err(|e| FanBridgeError::SendFailure(e.to_string()))?;
    Ok(())
}

/// Listener for inbound configuration frames
///
/// Each connection gets its own task; frames are applied to the shared
/// controller under its mutex, one whole frame at a time.
pub struct ConfigListener {
    listener: TcpListener,
    controller: Arc<Mutex<FanController>>,
}

impl ConfigListener {
    pub async fn bind(addr: &str, controller: Arc<Mutex<FanController>>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("config listener bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            controller,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; runs until the surrounding task is dropped
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("config client connected: {}", peer);
            let controller = Arc::clone(&self.controller);
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, controller).await {
                    warn!("config client {} failed: {}", peer, e);
                }
                info!("config client disconnected: {}", peer);
            });
        }
    }
}

async fn handle_client(stream: TcpStream, controller: Arc<Mutex<FanController>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = apply_frame(line, &controller);
        write_reply(&mut writer, &reply).await?;
    }

    Ok(())
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &ConfigReply) -> Result<()> {
    let mut frame = serde_json::to_vec(reply)?;
    frame.push(b'\n');
    timeout(IO_TIMEOUT, writer.write_all(&frame))
        .await
        .map_err(|_| FanBridgeError::Timeout(IO_TIMEOUT))??;
    Ok(())
}

/// Parse and apply one inbound frame; a rejected frame never touches the
/// configuration
fn apply_frame(line: &str, controller: &Arc<Mutex<FanController>>) -> ConfigReply {
    let update: ConfigUpdate = match serde_json::from_str(line) {
        Ok(update) => update,
        Err(e) => {
            warn!("rejected config frame: {}", e);
            return ConfigReply::error(format!("invalid frame: {}", e));
        }
    };

    let mut ctl = controller.lock().unwrap();
    match ctl.update_config(&update) {
        Ok(()) => {
            info!("config updated: {:?}", ctl.config());
            ConfigReply::ok(ctl.mode(), ctl.last_pwm())
        }
        Err(e) => {
            warn!("rejected config update: {}", e);
            ConfigReply::error(e.to_string())
        }
    }
}
