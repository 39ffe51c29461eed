/// Credential store and passphrase authentication
///
/// A user authenticates with a single generated multi-word secret,
/// optionally combined with a user-chosen factor. Only an Argon2id digest
/// and a truncated lookup prefix are persisted.

mod manager;

pub use manager::CredentialService;

use serde::{Deserialize, Serialize};

/// Raw credential material, returned exactly once at issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub passphrase: String,
    pub recovery_code: String,
}
