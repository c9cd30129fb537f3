//! Roles carried in the OU field of certificates issued by the hub CA.

use std::fmt;

/// Certificate role. Serialized as the organizational unit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// No recognised OU.
    #[default]
    None,
    /// End-user client.
    Client,
    /// Provisioned device. Its CN is the device ID.
    IoTDevice,
    /// Hub administrator. May post OOB secrets.
    Admin,
    /// Trusted hub service. May post OOB secrets.
    Plugin,
    /// Hub server certificate.
    Service,
}

impl Role {
    /// The OU string written into certificates.
    pub fn as_ou(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Client => "client",
            Self::IoTDevice => "iotdevice",
            Self::Admin => "admin",
            Self::Plugin => "plugin",
            Self::Service => "service",
        }
    }

    /// Map an OU string to a role. Unknown values map to [`Role::None`].
    pub fn from_ou(ou: &str) -> Self {
        match ou {
            "client" => Self::Client,
            "iotdevice" => Self::IoTDevice,
            "admin" => Self::Admin,
            "plugin" => Self::Plugin,
            "service" => Self::Service,
            _ => Self::None,
        }
    }

    /// Role of a certificate subject with the given OUs.
    ///
    /// Admin or plugin wins when present. Otherwise iotdevice, then client,
    /// then service.
    pub fn from_ous<'a>(ous: impl IntoIterator<Item = &'a str>) -> Self {
        let mut role = Self::None;
        for ou in ous {
            let candidate = Self::from_ou(ou);
            if candidate.rank() > role.rank() {
                role = candidate;
            }
        }
        role
    }

    fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Service => 1,
            Self::Client => 2,
            Self::IoTDevice => 3,
            Self::Admin | Self::Plugin => 4,
        }
    }

    /// Whether the holder may register OOB secrets and provision on behalf of
    /// any device.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin | Self::Plugin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            other => f.write_str(other.as_ou()),
        }
    }
}
