use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Facts about a receiver learned from its discovery answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Model name, e.g. `TX-NR616`.
    pub model: String,
    /// TCP control port.
    pub port: u16,
    /// Address the answer came from.
    pub ip: IpAddr,
    /// Destination region code (`DX`, `XX`, `JJ`, ...).
    pub region: String,
    /// Hardware address, upper case. Identity key.
    pub mac: String,
}

impl DeviceInfo {
    /// Parse the `model/port/region/mac` part of an `!1ECN` answer.
    ///
    /// Fields past the fourth are ignored.
    pub fn from_discovery(payload: &str, ip: IpAddr) -> Result<Self> {
        let mut fields = payload.split('/');
        let (Some(model), Some(port), Some(region), Some(mac)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(DeviceError::InvalidResponse(format!(
                "expected model/port/region/mac, got {payload:?}"
            )));
        };

        let port = port.trim().parse::<u16>().map_err(|_| {
            DeviceError::InvalidResponse(format!("non-numeric port {port:?} in {payload:?}"))
        })?;
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Err(DeviceError::InvalidResponse(format!(
                "empty hardware address in {payload:?}"
            )));
        }

        Ok(Self {
            model: model.trim().to_string(),
            port,
            ip,
            region: region.trim().to_string(),
            mac,
        })
    }

    /// Address of the receiver's control port.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.model, self.mac, self.control_addr())
    }
}

/// Canonical form of a hardware address: trimmed, upper case.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim_matches(|c: char| c.is_ascii_whitespace() || c.is_ascii_control())
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "192.168.1.40".parse().unwrap()
    }

    #[test]
    fn parses_discovery_payload() {
        let info = DeviceInfo::from_discovery("TX-NR616/60128/DX/0009b0aabbcc", ip()).unwrap();

        assert_eq!(info.model, "TX-NR616");
        assert_eq!(info.port, 60128);
        assert_eq!(info.region, "DX");
        assert_eq!(info.mac, "0009B0AABBCC");
        assert_eq!(info.control_addr(), "192.168.1.40:60128".parse().unwrap());
    }

    #[test]
    fn strips_trailing_control_bytes_from_mac() {
        let info = DeviceInfo::from_discovery("TX-NR616/60128/DX/0009B0AABBCC\x19", ip()).unwrap();
        assert_eq!(info.mac, "0009B0AABBCC");
    }

    #[test]
    fn ignores_extra_fields() {
        let info = DeviceInfo::from_discovery("TX-RZ50/60128/XX/0009B0112233/extra", ip()).unwrap();
        assert_eq!(info.mac, "0009B0112233");
    }

    #[test]
    fn rejects_short_payload() {
        let err = DeviceInfo::from_discovery("TX-NR616/60128/DX", ip()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResponse(_)));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = DeviceInfo::from_discovery("TX-NR616/port/DX/0009B0AABBCC", ip()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResponse(_)));
    }

    #[test]
    fn rejects_empty_mac() {
        let err = DeviceInfo::from_discovery("TX-NR616/60128/DX/ ", ip()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResponse(_)));
    }

    #[test]
    fn serializes_to_json() {
        let info = DeviceInfo::from_discovery("TX-NR616/60128/DX/0009B0AABBCC", ip()).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["model"], "TX-NR616");
        assert_eq!(json["ip"], "192.168.1.40");
        assert_eq!(json["port"], 60128);
    }
}
