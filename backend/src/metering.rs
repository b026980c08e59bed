//! Usage metering.
//!
//! The gateway reports billable usage to a [`UsageMeter`]: a one-off charge
//! at startup sized by the memory the host granted, and a per-session charge
//! when live sessions are drained on shutdown. Metering failures are logged
//! by the caller and never interrupt serving or shutdown.

use async_trait::async_trait;
use tracing::info;

use crate::mcp::SessionSummary;

/// Event name charged once at startup, per started gigabyte of memory.
pub const START_EVENT: &str = "actor-start-gb";

/// Receiver of usage events.
#[async_trait]
pub trait UsageMeter: Send + Sync {
    /// Charge `count` units of `event_name`.
    async fn charge(&self, event_name: &str, count: u64) -> anyhow::Result<()>;

    /// Account for sessions that are still open when the server stops.
    async fn charge_sessions(&self, sessions: &[SessionSummary]) -> anyhow::Result<()>;
}

/// Meter that only logs what it would charge.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMeter;

#[async_trait]
impl UsageMeter for LogMeter {
    async fn charge(&self, event_name: &str, count: u64) -> anyhow::Result<()> {
        info!("Charged {} x {}", count, event_name);
        Ok(())
    }

    async fn charge_sessions(&self, sessions: &[SessionSummary]) -> anyhow::Result<()> {
        let total_secs: u64 = sessions.iter().map(|s| s.age_secs).sum();
        info!(
            "Charged {} open session(s), {}s in total",
            sessions.len(),
            total_secs
        );
        Ok(())
    }
}

/// Units charged at startup: started gigabytes, at least one.
pub fn start_units(memory_mbytes: u64) -> u64 {
    memory_mbytes.div_ceil(1024).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_units_rounds_up() {
        assert_eq!(start_units(0), 1);
        assert_eq!(start_units(512), 1);
        assert_eq!(start_units(1024), 1);
        assert_eq!(start_units(1025), 2);
        assert_eq!(start_units(4096), 4);
    }

    #[tokio::test]
    async fn test_log_meter_accepts_everything() {
        let meter = LogMeter;
        meter.charge(START_EVENT, 2).await.unwrap();
        meter
            .charge_sessions(&[SessionSummary {
                id: "a".to_string(),
                age_secs: 3,
            }])
            .await
            .unwrap();
    }
}
