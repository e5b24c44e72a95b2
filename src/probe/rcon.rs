use super::{ActivityProbe, ProbeReading};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Smallest legal packet body length field: id + type + two terminators
const MIN_PACKET_SIZE: i32 = 10;
const MAX_PACKET_SIZE: i32 = 64 * 1024;

/// Packet types of the Source RCON protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconPacketKind {
    Auth,
    /// Shares its wire value with `AuthResponse`; direction disambiguates
    ExecCommand,
    AuthResponse,
    ResponseValue,
}

impl RconPacketKind {
    fn wire_value(self) -> i32 {
        match self {
            RconPacketKind::Auth => 3,
            RconPacketKind::ExecCommand | RconPacketKind::AuthResponse => 2,
            RconPacketKind::ResponseValue => 0,
        }
    }

    /// Interpret a type value received from the server
    fn from_server(value: i32) -> Result<Self, ProbeError> {
        match value {
            2 => Ok(RconPacketKind::AuthResponse),
            0 => Ok(RconPacketKind::ResponseValue),
            other => Err(ProbeError::Protocol {
                details: format!("unexpected packet type {}", other),
            }),
        }
    }
}

/// One RCON frame: `size | id | type | body | 0 | 0`, integers little-endian
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: RconPacketKind,
    pub body: String,
}

impl RconPacket {
    pub fn new(id: i32, kind: RconPacketKind, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = (body.len() + 10) as i32;

        let mut buf = Vec::with_capacity(body.len() + 14);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.wire_value().to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    /// Read one server-to-client packet
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProbeError> {
        let size = read_i32(reader).await?;
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(ProbeError::Protocol {
                details: format!("invalid packet size {}", size),
            });
        }

        let mut payload = vec![0u8; size as usize];
        reader.read_exact(&mut payload).await.map_err(io_err)?;

        let id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let kind_value = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let kind = RconPacketKind::from_server(kind_value)?;

        // Body runs up to the first terminator; some servers pad differently
        let body_bytes = &payload[8..payload.len() - 2];
        let end = body_bytes.iter().position(|b| *b == 0).unwrap_or(body_bytes.len());
        let body = String::from_utf8_lossy(&body_bytes[..end]).into_owned();

        trace!(id, ?kind, len = body.len(), "rcon packet received");
        Ok(Self { id, kind, body })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), ProbeError> {
        writer.write_all(&self.encode()).await.map_err(io_err)?;
        writer.flush().await.map_err(io_err)
    }
}

async fn read_i32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProbeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await.map_err(io_err)?;
    Ok(i32::from_le_bytes(buf))
}

fn io_err(e: std::io::Error) -> ProbeError {
    ProbeError::Unavailable {
        details: e.to_string(),
    }
}

/// Count players in a `ShowPlayers` reply.
///
/// The reply is CSV with a `name,playeruid,steamid` header row; every
/// other non-blank row is one connected player.
pub fn parse_player_list(body: &str) -> u32 {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.to_ascii_lowercase().starts_with("name,"))
        .count() as u32
}

/// Activity probe speaking RCON to the game server
pub struct RconProbe {
    address: String,
    password: String,
    command: String,
    timeout: Duration,
    next_id: AtomicI32,
}

impl RconProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            address: format!("{}:{}", config.host, config.port),
            password: config.password.clone(),
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            next_id: AtomicI32::new(1),
        }
    }

    fn next_id(&self) -> i32 {
        // Wrap before reaching the -1 used for auth failures
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id >= i32::MAX - 1 {
            self.next_id.store(1, Ordering::Relaxed);
        }
        id.max(1)
    }

    async fn session(&self) -> Result<ProbeReading, ProbeError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProbeError::Connect {
                address: self.address.clone(),
                details: e.to_string(),
            })?;

        let auth_id = self.next_id();
        RconPacket::new(auth_id, RconPacketKind::Auth, self.password.clone())
            .write_to(&mut stream)
            .await?;

        // Some servers send an empty response value ahead of the auth response
        loop {
            let packet = RconPacket::read_from(&mut stream).await?;
            if packet.kind != RconPacketKind::AuthResponse {
                continue;
            }
            if packet.id == -1 || packet.id != auth_id {
                return Err(ProbeError::AuthRejected {
                    address: self.address.clone(),
                });
            }
            break;
        }

        let command_id = self.next_id();
        RconPacket::new(command_id, RconPacketKind::ExecCommand, self.command.clone())
            .write_to(&mut stream)
            .await?;

        loop {
            let packet = RconPacket::read_from(&mut stream).await?;
            if packet.kind == RconPacketKind::ResponseValue && packet.id == command_id {
                let active_count = parse_player_list(&packet.body);
                debug!(active_count, address = %self.address, "rcon probe answered");
                return Ok(ProbeReading { active_count });
            }
        }
    }
}

#[async_trait]
impl ActivityProbe for RconProbe {
    async fn query(&self) -> Result<ProbeReading, ProbeError> {
        timeout(self.timeout, self.session())
            .await
            .map_err(|_| ProbeError::Timeout {
                timeout: self.timeout,
            })?
    }

    fn describe(&self) -> String {
        format!("rcon:{}", self.address)
    }
}
