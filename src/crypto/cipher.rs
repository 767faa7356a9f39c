//! Stream cipher primitives wrapping the RustCrypto implementations.
//!
//! There is no separate "mode" concept: for the CTR ciphers the 16-byte IV
//! is the full big-endian counter block, and for ChaCha20 it is the full
//! 8-byte little-endian block counter followed by the 8-byte nonce (the
//! layout OpenSSL expects). Encryptor and decryptor are distinct instances
//! sharing an algorithm ID.

use aes::Aes256;
use camellia::Camellia256;
use chacha20::ChaCha20Legacy;
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

use crate::encoding::random_bytes;
use crate::error::Result;

/// Key size shared by all supported ciphers, in bytes.
pub const KEY_SIZE: usize = 32;

/// IV size shared by all supported ciphers, in bytes.
pub const IV_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Camellia256Ctr = ctr::Ctr128BE<Camellia256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes256Ctr,
    ChaCha20,
    Camellia256Ctr,
}

impl CipherKind {
    /// Stable identifier persisted in serialized algorithm trees.
    /// Shared by the encryptor/decryptor pair.
    pub fn algorithm_id(self) -> i64 {
        match self {
            CipherKind::Aes256Ctr => 1000,
            CipherKind::ChaCha20 => 1010,
            CipherKind::Camellia256Ctr => 1020,
        }
    }

    pub const fn key_size(self) -> usize {
        KEY_SIZE
    }

    pub const fn iv_size(self) -> usize {
        IV_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// A cipher instance: algorithm, direction, and its key/IV parameters.
///
/// Parameters are optional until set; processing before both are set is a
/// programmer fault. The key is never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cipher {
    kind: CipherKind,
    direction: Direction,
    key: Option<Vec<u8>>,
    iv: Option<Vec<u8>>,
}

impl Cipher {
    pub fn encryptor(kind: CipherKind) -> Self {
        Self { kind, direction: Direction::Encrypt, key: None, iv: None }
    }

    pub fn decryptor(kind: CipherKind) -> Self {
        Self { kind, direction: Direction::Decrypt, key: None, iv: None }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn is_encryptor(&self) -> bool {
        self.direction == Direction::Encrypt
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn iv(&self) -> Option<&[u8]> {
        self.iv.as_deref()
    }

    pub fn set_key(&mut self, key: Vec<u8>) {
        assert_eq!(key.len(), self.kind.key_size(), "cipher key size mismatch");
        self.key = Some(key);
    }

    pub fn set_iv(&mut self, iv: Vec<u8>) {
        assert_eq!(iv.len(), self.kind.iv_size(), "cipher iv size mismatch");
        self.iv = Some(iv);
    }

    /// Draws a fresh random IV, installs it, and returns it for persistence.
    pub fn iv_set_random(&mut self) -> Vec<u8> {
        let iv = random_bytes(self.kind.iv_size());
        self.iv = Some(iv.clone());
        iv
    }

    /// Returns the paired opposite-direction instance preloaded with the
    /// same key and IV parameters.
    pub fn opposite_instance(&self) -> Self {
        let direction = match self.direction {
            Direction::Encrypt => Direction::Decrypt,
            Direction::Decrypt => Direction::Encrypt,
        };
        Self { kind: self.kind, direction, key: self.key.clone(), iv: self.iv.clone() }
    }

    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_deref().expect("cipher key not set");
        let iv = self.iv.as_deref().expect("cipher iv not set");
        let mut buf = data.to_vec();
        match self.kind {
            CipherKind::Aes256Ctr => {
                let mut cipher = Aes256Ctr::new_from_slices(key, iv).expect("valid key and iv sizes");
                cipher.apply_keystream(&mut buf);
            }
            CipherKind::Camellia256Ctr => {
                let mut cipher = Camellia256Ctr::new_from_slices(key, iv).expect("valid key and iv sizes");
                cipher.apply_keystream(&mut buf);
            }
            CipherKind::ChaCha20 => {
                let counter = u64::from_le_bytes(iv[..8].try_into().expect("iv size checked"));
                let mut cipher = ChaCha20Legacy::new_from_slices(key, &iv[8..]).expect("valid key and nonce sizes");
                cipher
                    .try_seek(u128::from(counter) * 64)
                    .expect("64-bit block counter in range");
                cipher.apply_keystream(&mut buf);
            }
        }
        Ok(buf)
    }
}
