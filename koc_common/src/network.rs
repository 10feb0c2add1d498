use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// IPv4 address of every interface, plus the one considered active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub interfaces: BTreeMap<String, String>,
    pub default: Option<String>,
}

impl NetworkInfo {
    pub fn collect() -> Self {
        match if_addrs::get_if_addrs() {
            Ok(interfaces) => Self::from_addrs(
                interfaces
                    .into_iter()
                    .map(|iface| {
                        let ip = iface.ip();
                        let loopback = iface.is_loopback();
                        (iface.name, ip, loopback)
                    }),
            ),
            Err(e) => {
                warn!("Failed to list network interfaces: {e}");
                Self::default()
            }
        }
    }

    fn from_addrs(addrs: impl IntoIterator<Item = (String, IpAddr, bool)>) -> Self {
        let mut info = Self::default();
        for (name, ip, loopback) in addrs {
            if !ip.is_ipv4() {
                continue;
            }
            if info.default.is_none() && !loopback {
                info.default = Some(name.clone());
            }
            info.interfaces.entry(name).or_insert_with(|| ip.to_string());
        }
        info
    }

    /// Address of the default interface, if any.
    pub fn default_address(&self) -> Option<&str> {
        let name = self.default.as_ref()?;
        self.interfaces.get(name).map(String::as_str)
    }
}
