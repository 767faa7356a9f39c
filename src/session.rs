//! Connection lifecycle: creating databases and unlocking them.
//!
//! Opening runs the full chain: probe the file, verify the DBID marker,
//! load the serialized cipher stack, expand the password into per-element
//! keys, prepare the opposite-direction mixer, and prove the password
//! against the key-check triple. Any failure releases the file handle
//! before the error propagates.

use std::path::Path;

use tracing::{debug, info};

use crate::config::{
    HS_HASHER_ITERATIONS, HS_HASH_DIGEST_SIZE, KDF_SALT_SIZE, KDF_STAGE1_N, KDF_STAGE1_R,
    KDF_STAGE2_N, KDF_STAGE2_R,
};
use crate::crypto::cipher::{Cipher, CipherKind};
use crate::crypto::hash::Hash;
use crate::crypto::mixer::{Hasher, KeyHasher, Mixer};
use crate::encoding::random_bytes;
use crate::error::{Error, Result};
use crate::store::{StoreContext, content, manifest, raw};

/// The default cipher stack: AES-256-CTR chained with ChaCha20.
pub fn default_mixer() -> Mixer {
    Mixer::new(vec![
        Cipher::encryptor(CipherKind::Aes256Ctr),
        Cipher::encryptor(CipherKind::ChaCha20),
    ])
}

/// The default password expansion: two scrypt stages with fresh random
/// salts, one memory-heavy and one bandwidth-heavy.
pub fn default_key_hasher() -> Result<KeyHasher> {
    let stage1 = Hash::scrypt256(random_bytes(KDF_SALT_SIZE), KDF_STAGE1_N, KDF_STAGE1_R)?;
    let stage2 = Hash::scrypt256(random_bytes(KDF_SALT_SIZE), KDF_STAGE2_N, KDF_STAGE2_R)?;
    Ok(KeyHasher::new(vec![stage1.into(), stage2.into()]))
}

/// The default hash-search hasher: several passes of a SHA3-512/BLAKE2b
/// composition, narrowed by SHAKE-128.
pub fn default_hs_hasher() -> Result<Hasher> {
    let big_hasher = Hasher::new(
        vec![Hash::Sha3_512.into(), Hash::Blake2b512.into()],
        HS_HASHER_ITERATIONS,
    );
    let shake = Hash::shake128(HS_HASH_DIGEST_SIZE)?;
    Ok(Hasher::new(vec![big_hasher.into(), shake.into()], 1))
}

/// Creates and initializes a new database with the default algorithm
/// recipes, protected by `password`.
pub fn create_database(path: &Path, password: &str) -> Result<()> {
    create_database_with(path, password, default_mixer(), default_key_hasher()?, default_hs_hasher()?)
}

/// Creates a new database with an explicit cipher stack and hashers.
pub fn create_database_with(
    path: &Path,
    password: &str,
    mut mixer: Mixer,
    key_hasher: KeyHasher,
    hs_hasher: Hasher,
) -> Result<()> {
    apply_password(&mut mixer, &key_hasher, password)?;
    let conn = raw::db_create_new(path, false)?;
    content::init_empty_database(&conn, &mut mixer, &hs_hasher, &key_hasher)?;
    info!(path = %path.display(), "created database");
    Ok(())
}

/// Unlocks an existing database and returns the connection context.
pub fn open_database(path: &Path, password: &str) -> Result<StoreContext> {
    let conn = raw::db_connect(path)?;
    if !manifest::is_db_created_by_app(&conn) {
        return Err(Error::storage("database is not created by application"));
    }
    let hs_hasher = manifest::get_hs_hasher(&conn)?;
    let mut mixer = manifest::get_mixer(&conn)?;
    let key_hasher = manifest::get_key_hasher(&conn)?;
    apply_password(&mut mixer, &key_hasher, password)?;
    manifest::check_key(&conn, &mut mixer)?;
    debug!(path = %path.display(), "database unlocked");
    Ok(StoreContext::new(conn, mixer, hs_hasher))
}

/// Expands the password into one key per mixer element, installs the keys,
/// and prepares the opposite-direction mixer for decryption.
fn apply_password(mixer: &mut Mixer, key_hasher: &KeyHasher, password: &str) -> Result<()> {
    let keys = key_hasher.process(password.as_bytes())?;
    mixer.set_keys(keys);
    mixer.make_opposite();
    Ok(())
}
