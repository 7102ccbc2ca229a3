use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// mDNS service type the companion app advertises
pub const SERVICE_TYPE: &str = "_hassmic._tcp.local.";

/// A resolved zeroconf record for a satellite
///
/// The instance name is `<device uuid>._hassmic._tcp.local.`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroconfServiceInfo {
    pub name: String,
    pub ip_address: IpAddr,
    pub port: u16,
    pub hostname: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ZeroconfServiceInfo {
    pub fn new(name: impl Into<String>, ip_address: IpAddr, port: u16) -> Self {
        let name = name.into();
        let hostname = format!("{}.local.", device_uuid(&name));
        Self {
            name,
            ip_address,
            port,
            hostname,
            properties: BTreeMap::new(),
        }
    }

    /// Record for a device uuid, as the app would advertise it
    pub fn for_device(uuid: &str, ip_address: IpAddr, port: u16) -> Self {
        Self::new(format!("{}.{}", uuid, SERVICE_TYPE), ip_address, port)
    }

    pub fn device_uuid(&self) -> &str {
        device_uuid(&self.name)
    }

    pub fn is_hassmic_service(&self) -> bool {
        self.name.ends_with(SERVICE_TYPE)
    }
}

fn device_uuid(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
