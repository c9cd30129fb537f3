//! IDProv Protocol - JSON messages exchanged between the provisioning server,
//! devices and administrators.
//!
//! Every message is a plain serde struct. Field order is significant: the
//! canonical form used for signing is the compact JSON encoding of the struct
//! in declaration order with the `signature` field set to the empty string.

mod messages;

pub use messages::*;

/// Well-known directory path. Clients fetch this before anything else.
pub const DIRECTORY_PATH: &str = "/idprov/directory";

/// Status path template; the `{deviceID}` segment is replaced by the
/// percent-encoded device ID.
pub const STATUS_PATH: &str = "/idprov/status/{deviceID}";

/// Path for administrators and plugins to post OOB secrets.
pub const POST_OOB_SECRET_PATH: &str = "/idprov/oobsecret";

/// Path for devices to post provisioning requests.
pub const POST_PROVISION_REQUEST_PATH: &str = "/idprov/provreq";

/// Placeholder in [`STATUS_PATH`].
pub const DEVICE_ID_PLACEHOLDER: &str = "{deviceID}";

/// Directory format version.
pub const DIRECTORY_VERSION: &str = "1";

/// Default DNS-SD service name; advertised as `_idprov._tcp`.
pub const DEFAULT_SERVICE_NAME: &str = "idprov";

/// Default listening port of the provisioning server.
pub const DEFAULT_PORT: u16 = 8880;
