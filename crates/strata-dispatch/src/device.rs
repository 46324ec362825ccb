//! Device identifiers: a UUID or a PCI transport address.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

static PCI_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{4}|[0-9a-f]{6}):([0-9a-f]{2}):([0-9a-f]{2})\.([0-7])$")
        .expect("static regex")
});

/// PCI address, normalised to lower case: `dddd[dd]:bb:dd.f`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PciAddress {
    domain: String,
    bus: u8,
    device: u8,
    function: u8,
}

impl PciAddress {
    /// Backing devices behind a VMD controller carry a six-digit domain.
    pub fn is_vmd_backing(&self) -> bool {
        self.domain.len() == 6
    }
}

impl FromStr for PciAddress {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let caps = PCI_ADDR
            .captures(&lower)
            .ok_or_else(|| DispatchError::InvalidDeviceId(s.to_string()))?;
        let hex = |i: usize| u8::from_str_radix(&caps[i], 16);
        Ok(Self {
            domain: caps[1].to_string(),
            bus: hex(2).map_err(|_| DispatchError::InvalidDeviceId(s.to_string()))?,
            device: hex(3).map_err(|_| DispatchError::InvalidDeviceId(s.to_string()))?,
            function: hex(4).map_err(|_| DispatchError::InvalidDeviceId(s.to_string()))?,
        })
    }
}

impl TryFrom<String> for PciAddress {
    type Error = DispatchError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PciAddress> for String {
    fn from(addr: PciAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Administrator-supplied device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceId {
    Uuid(Uuid),
    Addr(PciAddress),
}

impl DeviceId {
    /// Classify one token. Addresses are only accepted for VMD backing
    /// devices.
    pub fn classify(token: &str) -> Result<Self, DispatchError> {
        let token = token.trim();
        if let Ok(addr) = token.parse::<PciAddress>() {
            if addr.is_vmd_backing() {
                return Ok(DeviceId::Addr(addr));
            }
            return Err(DispatchError::InvalidDeviceId(token.to_string()));
        }
        Uuid::parse_str(token)
            .map(DeviceId::Uuid)
            .map_err(|_| DispatchError::InvalidDeviceId(token.to_string()))
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            DeviceId::Uuid(u) => Some(*u),
            DeviceId::Addr(_) => None,
        }
    }

    pub fn as_addr(&self) -> Option<&PciAddress> {
        match self {
            DeviceId::Addr(a) => Some(a),
            DeviceId::Uuid(_) => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Uuid(u) => write!(f, "{u}"),
            DeviceId::Addr(a) => write!(f, "{a}"),
        }
    }
}

/// Split a comma-separated identifier list, rejecting the first bad token.
pub fn parse_id_list(ids: &str) -> Result<Vec<DeviceId>, DispatchError> {
    let ids: Vec<DeviceId> = ids
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(DeviceId::classify)
        .collect::<Result<_, _>>()?;
    if ids.is_empty() {
        return Err(DispatchError::InvalidRequest(
            "empty device identifier list".to_string(),
        ));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmd_backing_address_classified() {
        let id = DeviceId::classify("5D0505:01:00.0").unwrap();
        assert_eq!(id.as_addr().unwrap().to_string(), "5d0505:01:00.0");
    }

    #[test]
    fn plain_pci_address_rejected() {
        let err = DeviceId::classify("0000:81:00.0").unwrap_err();
        assert!(err.to_string().contains("0000:81:00.0"));
    }

    #[test]
    fn uuid_classified() {
        let u = Uuid::from_u128(42);
        assert_eq!(DeviceId::classify(&u.to_string()).unwrap(), DeviceId::Uuid(u));
    }

    #[test]
    fn garbage_names_token() {
        let err = parse_id_list("5d0505:01:00.0, bogus").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidDeviceId(t) if t == "bogus"));
    }

    #[test]
    fn empty_list_rejected() {
        assert!(parse_id_list(" , ").is_err());
    }
}
