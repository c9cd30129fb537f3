use std::collections::BTreeMap;
use std::net::IpAddr;

/// TXT key holding the directory path.
pub const PATH_TXT_KEY: &str = "path";

/// DNS-SD service type for a service name, e.g. `_idprov._tcp`.
pub fn service_type(service_name: &str) -> String {
    format!("_{service_name}._tcp")
}

/// An advertised service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Instance name, the hub's instance ID.
    pub instance_name: String,
    /// Service type such as `_idprov._tcp`.
    pub service_type: String,
    pub address: IpAddr,
    pub port: u16,
    pub txt: BTreeMap<String, String>,
}

impl ServiceRecord {
    pub fn new(
        instance_name: impl Into<String>,
        service_type: impl Into<String>,
        address: IpAddr,
        port: u16,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            service_type: service_type.into(),
            address,
            port,
            txt: BTreeMap::new(),
        }
    }

    pub fn with_txt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.txt.insert(key.into(), value.into());
        self
    }

    /// Directory path from the TXT record, if advertised.
    pub fn path(&self) -> Option<&str> {
        self.txt.get(PATH_TXT_KEY).map(String::as_str)
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn authority(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => format!("{v4}:{}", self.port),
            IpAddr::V6(v6) => format!("[{v6}]:{}", self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type() {
        assert_eq!(service_type("idprov"), "_idprov._tcp");
    }

    #[test]
    fn test_record_authority_and_path() {
        let record = ServiceRecord::new("hub", "_idprov._tcp", "10.0.0.1".parse().unwrap(), 8880)
            .with_txt(PATH_TXT_KEY, "/idprov/directory");
        assert_eq!(record.authority(), "10.0.0.1:8880");
        assert_eq!(record.path(), Some("/idprov/directory"));

        let v6 = ServiceRecord::new("hub", "_idprov._tcp", "::1".parse().unwrap(), 8880);
        assert_eq!(v6.authority(), "[::1]:8880");
        assert_eq!(v6.path(), None);
    }
}
