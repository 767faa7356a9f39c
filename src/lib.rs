//! SealDB - an encrypted local secrets store over a single SQLite file.
//!
//! Every user-visible table, key, and attribute map is kept confidential
//! at rest by layering stream ciphers over per-row random IVs:
//! - AES-256-CTR, ChaCha20, and Camellia-256-CTR primitives chained by a `Mixer`
//! - scrypt-based password expansion (`KeyHasher`)
//! - keyed, salted hashes for point lookup without decryption
//! - a tagged-tree codec that persists algorithm choices inside the database

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod padding;
pub mod serial;
pub mod session;
pub mod store;

pub use error::{Error, Result};
