//! Encrypted custody of OAuth refresh tokens.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenVault                         │
//! │  - upsert per (user, external identity)  │
//! │  - Active -> NeedsReauth lifecycle       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryptor                          │
//! │  - AES-256-GCM, fresh nonce per call     │
//! │  - v1: envelope                          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite (store::Database)           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use adsync::credentials::{Encryptor, TokenVault};
//! use adsync::store::Database;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryptor = Encryptor::new(&std::env::var("ADSYNC_ENCRYPTION_KEY")?)?;
//! let db = Arc::new(Database::open("adsync.db")?);
//! let vault = TokenVault::new(db, encryptor);
//!
//! vault.save_refresh_token(42, "google-sub", "1//refresh", "adwords")?;
//! let entry = vault.load_refresh_token(42)?;
//! let refresh_token = vault.reveal(&entry)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Encryption key: 32 bytes, loaded once from `ADSYNC_ENCRYPTION_KEY`
//! - Tokens are never logged
//! - Each encryption uses a unique random nonce

pub mod encryption;
pub mod vault;

pub use encryption::{CryptoError, Encryptor};
pub use vault::{CredentialStatus, StoredCredential, TokenVault, VaultError};
