//! Cryptographic primitives and their composition layer.

pub mod cipher;
pub mod hash;
pub mod mixer;

pub use self::cipher::{Cipher, CipherKind};
pub use self::hash::Hash;
pub use self::mixer::{HashElement, Hasher, KeyHasher, Mixer};
