//! TLS configuration for connections to the provisioning server.

mod client;

pub use client::{build_client_config, ClientIdentity, LeapOfFaithVerifier};
