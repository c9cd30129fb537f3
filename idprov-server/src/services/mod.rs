//! Request handling behind the HTTP routes.

mod provisioning;

pub use provisioning::{
    ProvisionService, ServiceSettings, CLOCK_SKEW, DEFAULT_RETRY_SEC, DEFAULT_VALIDITY_DAYS,
};
