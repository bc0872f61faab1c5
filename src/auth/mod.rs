pub mod config;
pub mod credential_store;
pub mod types;

pub use credential_store::{CredentialStore, CredsConfig};
pub use types::{AuthError, AuthMethod};
