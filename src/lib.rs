/// Tunnelward - VPN access control plane
///
/// Issues anonymous passphrase credentials, EdDSA access tokens and
/// rotating refresh tokens, assigns deterministic virtual addresses to
/// devices, and projects device authorization into a Redis registry for
/// the data plane.

pub mod account;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod credential;
pub mod db;
pub mod device;
pub mod error;
pub mod jobs;
pub mod registry;
pub mod server;
pub mod subscription;
pub mod token;
pub mod words;
