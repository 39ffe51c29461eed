/// Account lifecycle
///
/// Accounts are anonymous by default: a user row needs no email, and
/// identity rests entirely on the issued credential. Lifecycle changes
/// (lock, close, delete) cascade into token revocation and device
/// authorization so a status flip takes effect immediately.

mod manager;

pub use manager::AccountManager;

use crate::{credential::IssuedCredential, db::models::User};
use serde::{Deserialize, Serialize};

/// Account creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub email: Option<String>,
    /// Optional second factor folded into the stored login identifier
    pub factor: Option<String>,
}

/// A freshly created account with its one-time-visible credential
#[derive(Debug)]
pub struct CreatedAccount {
    pub user: User,
    pub credential: IssuedCredential,
}
