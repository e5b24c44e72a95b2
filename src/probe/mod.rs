//! Liveness and occupancy checks against the running workload.

pub mod mock;
mod rcon;

pub use mock::MockActivityProbe;
pub use rcon::{parse_player_list, RconPacket, RconPacketKind, RconProbe};

use crate::error::ProbeError;
use async_trait::async_trait;

/// A successful probe: the workload answered and reported its occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReading {
    pub active_count: u32,
}

/// Workload-specific activity check
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    /// Query the workload. An `Err` means no liveness evidence was obtained.
    async fn query(&self) -> Result<ProbeReading, ProbeError>;

    fn describe(&self) -> String;
}
