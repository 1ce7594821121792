//! Dial result (spec §3: "always-non-null object").

use serde::{Deserialize, Serialize};

/// Why a dial attempt failed to reach data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialFailureReason {
    Busy,
    NoCarrier,
    NoDialtone,
    NoAnswer,
    Error,
    Timeout,
    IoError,
}

impl DialFailureReason {
    /// Parse a modem result-code line into a failure reason, if it is one.
    #[must_use]
    pub fn from_result_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        match trimmed {
            "BUSY" => Some(Self::Busy),
            "NO CARRIER" => Some(Self::NoCarrier),
            "NO DIALTONE" => Some(Self::NoDialtone),
            "NO ANSWER" => Some(Self::NoAnswer),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for DialFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Busy => "BUSY",
            Self::NoCarrier => "NO CARRIER",
            Self::NoDialtone => "NO DIALTONE",
            Self::NoAnswer => "NO ANSWER",
            Self::Error => "ERROR",
            Self::Timeout => "timeout",
            Self::IoError => "io-error",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a dial attempt. Always constructed fully — there is no
/// "null" dial result anywhere in this codebase, matching spec §3/§4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialResult {
    pub success: bool,
    /// Negotiated connect speed in bps, 0 if never connected.
    pub connect_speed: u32,
    /// Protocol modifier from the CONNECT line (e.g. "V.34", "LAP-M").
    pub protocol: Option<String>,
    pub ring_count: u32,
    pub dial_duration_ms: u64,
    /// 0 if carrier was never established.
    pub carrier_duration_ms: u64,
    pub failure_reason: Option<DialFailureReason>,
}

impl DialResult {
    #[must_use]
    pub fn success(connect_speed: u32, protocol: Option<String>, ring_count: u32, dial_duration_ms: u64) -> Self {
        Self {
            success: true,
            connect_speed,
            protocol,
            ring_count,
            dial_duration_ms,
            carrier_duration_ms: 0,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn failure(reason: DialFailureReason, dial_duration_ms: u64) -> Self {
        Self {
            success: false,
            connect_speed: 0,
            protocol: None,
            ring_count: 0,
            dial_duration_ms,
            carrier_duration_ms: 0,
            failure_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_result_lines() {
        assert_eq!(DialFailureReason::from_result_line("BUSY"), Some(DialFailureReason::Busy));
        assert_eq!(
            DialFailureReason::from_result_line("NO CARRIER\r"),
            Some(DialFailureReason::NoCarrier)
        );
        assert_eq!(DialFailureReason::from_result_line("CONNECT 9600"), None);
    }

    #[test]
    fn failure_result_has_no_speed() {
        let r = DialResult::failure(DialFailureReason::Busy, 2500);
        assert!(!r.success);
        assert_eq!(r.connect_speed, 0);
        assert_eq!(r.failure_reason, Some(DialFailureReason::Busy));
    }
}
