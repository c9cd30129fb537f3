//! Single-use out-of-band secret store.
//!
//! An administrator registers a secret for a device ID. The first provisioning
//! request that is checked against it consumes it, whether or not the
//! signature matched. A device that guesses wrong has to wait for a new secret.
//!
//! A consumed entry is emptied rather than removed. An empty entry and a
//! missing one both read as "no secret".

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use zeroize::Zeroizing;

use crate::signer;

/// Result of [`OobStore::verify_and_consume`].
#[derive(Debug, PartialEq, Eq)]
pub enum OobVerdict {
    /// No secret is on file. Nothing was changed.
    Missing,
    /// The signature matched. The secret is returned so the caller can sign
    /// its reply with it; the store no longer holds it.
    Verified(Zeroizing<String>),
    /// The signature did not match. The secret has been discarded.
    Rejected,
}

/// In-memory map of device ID to pending OOB secret.
///
/// All operations take one mutex, so a put and a verify on the same device
/// are strictly ordered.
#[derive(Debug, Default)]
pub struct OobStore {
    secrets: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl OobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Zeroizing<String>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.secrets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) the pending secret for a device.
    ///
    /// An empty secret clears the entry.
    pub fn put(&self, device_id: &str, secret: &str) {
        self.lock()
            .insert(device_id.to_string(), Zeroizing::new(secret.to_string()));
    }

    /// Whether a secret is pending for the device.
    pub fn peek(&self, device_id: &str) -> bool {
        self.lock()
            .get(device_id)
            .is_some_and(|secret| !secret.is_empty())
    }

    /// Number of devices with a pending secret.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|secret| !secret.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check `signature` over `message` against the pending secret and consume
    /// the secret in the same critical section.
    pub fn verify_and_consume(&self, device_id: &str, message: &[u8], signature: &str) -> OobVerdict {
        let mut secrets = self.lock();
        let Some(slot) = secrets.get_mut(device_id).filter(|secret| !secret.is_empty()) else {
            return OobVerdict::Missing;
        };
        let secret = std::mem::replace(slot, Zeroizing::new(String::new()));

        match signer::verify(message, &secret, signature) {
            Ok(()) => OobVerdict::Verified(secret),
            Err(_) => OobVerdict::Rejected,
        }
    }
}
