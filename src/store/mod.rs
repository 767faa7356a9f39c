//! Encrypted storage engine over a single relational file.

pub mod content;
pub mod description;
pub mod impexp;
pub mod manifest;
pub mod raw;

use std::collections::HashMap;

use rusqlite::Connection;

use crate::crypto::mixer::{Hasher, Mixer};
use self::description::TableDescription;

/// Bundles the open row store, the layered cipher, and the hash-search
/// hasher. Passed to every engine call; exactly one context is open per
/// database file at a time.
///
/// The mixer is owned and mutated by every operation (its element IVs are
/// overwritten), so the context is not shareable across threads.
pub struct StoreContext {
    pub conn: Connection,
    pub mixer: Mixer,
    pub hs_hasher: Hasher,
    pub(crate) desc_cache: HashMap<String, TableDescription>,
}

impl StoreContext {
    /// Builds a context from an unlocked connection. The mixer must carry
    /// keys and its opposite-direction instance.
    pub fn new(conn: Connection, mixer: Mixer, hs_hasher: Hasher) -> Self {
        assert!(mixer.is_keys_set(), "mixer keys not set");
        assert!(mixer.opp().is_some(), "opposite mixer not prepared");
        Self { conn, mixer, hs_hasher, desc_cache: HashMap::new() }
    }

    pub fn clear_description_cache(&mut self) {
        self.desc_cache.clear();
    }

    /// Releases the row store handle.
    pub fn close(self) {
        drop(self.conn);
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::Path;

    use crate::crypto::cipher::{Cipher, CipherKind};
    use crate::crypto::hash::Hash;
    use crate::crypto::mixer::{Hasher, KeyHasher, Mixer};
    use crate::session;
    use crate::store::StoreContext;

    pub fn test_mixer() -> Mixer {
        Mixer::new(vec![
            Cipher::encryptor(CipherKind::Aes256Ctr),
            Cipher::encryptor(CipherKind::ChaCha20),
        ])
    }

    /// Fast stand-in for the production scrypt expansion; both stages emit
    /// 32-byte keys like the real recipe.
    pub fn test_key_hasher() -> KeyHasher {
        KeyHasher::new(vec![Hash::Sha3_256.into(), Hash::Sha3_256.into()])
    }

    pub fn test_hs_hasher() -> Hasher {
        let big_hasher = Hasher::new(vec![Hash::Sha3_512.into(), Hash::Blake2b512.into()], 2);
        Hasher::new(vec![big_hasher.into(), Hash::shake128(16).unwrap().into()], 1)
    }

    pub fn create_test_database(path: &Path, password: &str) {
        session::create_database_with(path, password, test_mixer(), test_key_hasher(), test_hs_hasher())
            .unwrap();
    }

    /// A context over a fresh database in a temp directory. Keeps the
    /// directory alive for the test's duration.
    pub struct TestDb {
        pub dir: tempfile::TempDir,
        pub ctx: StoreContext,
    }

    pub fn fresh_context(password: &str) -> TestDb {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        create_test_database(&path, password);
        let ctx = session::open_database(&path, password).unwrap();
        TestDb { dir, ctx }
    }
}
