//! Tagged per-protocol test-result details (spec §9: replaces the source's
//! `interface{}` Details maps with a typed variant per protocol).

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Identity/capability details captured from a single protocol test,
/// carried in the result's typed field rather than an untyped map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolDetails {
    Binkp {
        system_name: Option<String>,
        sysop: Option<String>,
        location: Option<String>,
        mailer_version: Option<String>,
        addresses: Vec<Address>,
        capabilities: Vec<String>,
    },
    Ifcico {
        system_name: Option<String>,
        sysop: Option<String>,
        location: Option<String>,
        mailer_version: Option<String>,
        addresses: Vec<Address>,
        capabilities: Vec<String>,
    },
    Telnet {
        banner: Option<String>,
    },
    Ftp {
        banner: Option<String>,
    },
    Modem {
        connect_speed: u32,
        protocol: Option<String>,
    },
}

impl ProtocolDetails {
    /// Addresses reported by the remote, if this variant carries any
    /// (EMSI-based protocols do; Telnet/FTP/Modem don't).
    #[must_use]
    pub fn addresses(&self) -> &[Address] {
        match self {
            Self::Binkp { addresses, .. } | Self::Ifcico { addresses, .. } => addresses,
            Self::Telnet { .. } | Self::Ftp { .. } | Self::Modem { .. } => &[],
        }
    }
}
