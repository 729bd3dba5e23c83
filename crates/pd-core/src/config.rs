use pd_timing::Nanos;
use serde::{Deserialize, Serialize};

/// Default UDP port for PD telegrams.
pub const DEFAULT_PD_PORT: u16 = 17224;

/// Only the major half of `protocolVersion` is checked on ingress.
pub const DEFAULT_PROTOCOL_VERSION: u16 = 0x0100;

/// Fixed capacity of a subscription's per-source sequence table (§4.S).
/// Compile-time only: `ArrayVec`'s capacity is a const generic, so this
/// can't be a runtime `SessionConfig` field.
pub const DEFAULT_SEQUENCE_TABLE_CAPACITY: usize = 64;

/// `comId` reserved for the statistics PULL handler (§9).
pub const STATISTICS_PULL_COMID: u32 = 0;

/// Session-wide configuration. Deserializable from JSON/TOML/etc, with
/// interval-like fields accepting either a bare integer (nanoseconds) or a
/// humantime string (`"100ms"`) via [`pd_timing::Nanos`]'s visitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Local UDP port to bind. Defaults to [`DEFAULT_PD_PORT`].
    #[serde(default = "default_port")]
    pub port: u16,
    /// This session's own IP address, in host byte order.
    pub own_ip: u32,
    /// Whether `checkListenSocks` drains each ready socket (non-blocking) or
    /// reads a single datagram per tick (blocking semantics, §4.P).
    #[serde(default = "default_true")]
    pub non_blocking: bool,
    /// Protocol major byte this session enforces on ingress.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
    /// This session's consist (vehicle-bus) topology counter.
    #[serde(default)]
    pub etb_topo_cnt: u32,
    /// This session's operational train topology counter.
    #[serde(default)]
    pub op_trn_topo_cnt: u32,
    /// How often the distributor is allowed to re-stagger send times.
    #[serde(default = "default_distribute_interval")]
    pub distribute_interval: Nanos,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            own_ip: 0,
            non_blocking: default_true(),
            protocol_version: default_protocol_version(),
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            distribute_interval: default_distribute_interval(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PD_PORT
}

fn default_true() -> bool {
    true
}

fn default_protocol_version() -> u16 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_distribute_interval() -> Nanos {
    Nanos::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_object() {
        let config: SessionConfig = serde_json::from_str("{\"own_ip\": 167772161}").unwrap();
        assert_eq!(config.port, DEFAULT_PD_PORT);
        assert_eq!(config.own_ip, 167_772_161);
    }

    #[test]
    fn distribute_interval_accepts_humantime_string() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"own_ip": 1, "distribute_interval": "250ms"}"#).unwrap();
        assert_eq!(config.distribute_interval, Nanos::from_millis(250));
    }
}
