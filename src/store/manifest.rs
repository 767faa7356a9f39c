//! Per-database manifest: the plaintext header table.
//!
//! Holds the application version, the random DBID, the serialized cipher
//! stack, key-deriver and hash-search hasher, and the key-check triple used
//! to verify that a password unlocks the database without exposing any
//! user content.

use rusqlite::Connection;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::{APP_VERSION, DBID_SIZE, KEY_CHECK_DIGEST_SIZE, KEY_CHECK_SIZE};
use crate::crypto::hash::Hash;
use crate::crypto::mixer::{Hasher, KeyHasher, Mixer};
use crate::encoding::{decode_base64, decode_json_base64, encode_base64, encode_json_base64, random_bytes};
use crate::error::{Error, Result};
use crate::serial::{deserialize, serialize_hasher, serialize_key_hasher, serialize_mixer};
use crate::store::raw;

pub const MANIFEST_TABLE: &str = "manifest";

const KEY_COL: &str = "key";
const DATA_COL: &str = "data";

/// Creates the manifest table and writes every header row.
///
/// The key-check ciphertext consumes a fresh IV from the mixer, so the
/// mixer must carry keys.
pub fn init_manifest_table(
    conn: &Connection,
    mixer: &mut Mixer,
    key_hasher: &KeyHasher,
    hs_hasher: &Hasher,
) -> Result<()> {
    raw::create_table(
        conn,
        MANIFEST_TABLE,
        &[(KEY_COL, "TEXT"), (DATA_COL, "TEXT")],
        Some(KEY_COL),
        None,
        &[],
    )?;
    insert_entry(conn, "app_version", APP_VERSION)?;
    insert_dbid(conn)?;
    insert_entry(conn, "mixer", &encode_json_base64(&serialize_mixer(mixer)))?;
    insert_entry(conn, "key_hasher", &encode_json_base64(&serialize_key_hasher(key_hasher)))?;
    insert_entry(conn, "hs_hasher", &encode_json_base64(&serialize_hasher(hs_hasher)))?;
    insert_key_check(conn, mixer)?;
    Ok(())
}

/// Verifies a candidate password: decrypts the stored check bytes with the
/// opposite mixer under the stored IV and compares their SHAKE-128 digest
/// against the stored one in constant time.
pub fn check_key(conn: &Connection, mixer: &mut Mixer) -> Result<()> {
    let (crypted_check_bytes, iv, check_bytes_hash) = get_key_check_data(conn)?;
    let opp = mixer.opp_mut();
    opp.iv_set(&iv)?;
    let check_bytes = opp.process(&crypted_check_bytes)?;
    let calculated = Hash::shake128(KEY_CHECK_DIGEST_SIZE)?.process(&check_bytes)?;
    if !bool::from(calculated.ct_eq(&check_bytes_hash)) {
        return Err(Error::KeyCheck);
    }
    Ok(())
}

fn get_key_check_data(conn: &Connection) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let crypted_check_bytes = decode_base64(&get_entry(conn, "key_check")?)?;
    let iv = decode_base64(&get_entry(conn, "iv_key_check")?)?;
    let check_bytes_hash = decode_base64(&get_entry(conn, "shake128_key_check")?)?;
    Ok((crypted_check_bytes, iv, check_bytes_hash))
}

/// True iff the file carries a well-formed DBID row: present, hexadecimal,
/// and exactly three bytes.
pub fn is_db_created_by_app(conn: &Connection) -> bool {
    let Ok(dbid) = get_dbid(conn) else {
        return false;
    };
    match hex::decode(&dbid) {
        Ok(bytes) => bytes.len() == DBID_SIZE,
        Err(_) => false,
    }
}

pub fn get_mixer(conn: &Connection) -> Result<Mixer> {
    deserialize(&decode_json_base64(&get_entry(conn, "mixer")?)?)?.into_mixer()
}

pub fn get_key_hasher(conn: &Connection) -> Result<KeyHasher> {
    deserialize(&decode_json_base64(&get_entry(conn, "key_hasher")?)?)?.into_key_hasher()
}

pub fn get_hs_hasher(conn: &Connection) -> Result<Hasher> {
    deserialize(&decode_json_base64(&get_entry(conn, "hs_hasher")?)?)?.into_hasher()
}

pub fn get_app_version(conn: &Connection) -> Result<(u32, u32, u32)> {
    let version = get_entry(conn, "app_version")?;
    let mut numbers = version.split('.').map(str::parse::<u32>);
    match (numbers.next(), numbers.next(), numbers.next(), numbers.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Ok((major, minor, patch)),
        _ => Err(Error::storage(format!("malformed app version '{version}'"))),
    }
}

pub fn get_dbid(conn: &Connection) -> Result<String> {
    get_entry(conn, "dbid")
}

/// Writes a new DBID. The value must be a hex string decoding to exactly
/// three bytes; it is normalized to uppercase.
pub fn set_dbid(conn: &Connection, new_dbid: &str) -> Result<()> {
    let bytes = hex::decode(new_dbid)
        .map_err(|_| Error::storage(format!("expected hexadecimal string, having '{new_dbid}'")))?;
    if bytes.len() != DBID_SIZE {
        return Err(Error::storage("size of dbid should be 3 bytes"));
    }
    raw::update_record(
        conn,
        MANIFEST_TABLE,
        KEY_COL,
        &"dbid",
        &[(DATA_COL, &new_dbid.to_uppercase())],
    )
}

fn get_entry(conn: &Connection, key: &str) -> Result<String> {
    let sql = format!("SELECT {DATA_COL} FROM {MANIFEST_TABLE} WHERE {KEY_COL} = ?1");
    raw::query_row_opt(conn, &sql, [key], |row| row.get(0))?
        .ok_or_else(|| Error::storage(format!("manifest entry '{key}' not found")))
}

fn insert_entry(conn: &Connection, key: &str, data: &str) -> Result<()> {
    raw::insert_record(conn, MANIFEST_TABLE, &[KEY_COL, DATA_COL], &[&key, &data])?;
    Ok(())
}

fn insert_dbid(conn: &Connection) -> Result<()> {
    let dbid = hex::encode_upper(random_bytes(DBID_SIZE));
    debug!(%dbid, "assigned database id");
    insert_entry(conn, "dbid", &dbid)
}

fn insert_key_check(conn: &Connection, mixer: &mut Mixer) -> Result<()> {
    let check_bytes = random_bytes(KEY_CHECK_SIZE);
    let check_bytes_hash = Hash::shake128(KEY_CHECK_DIGEST_SIZE)?.process(&check_bytes)?;
    let iv = mixer.iv_set_random();
    let crypted_check_bytes = mixer.process(&check_bytes)?;
    insert_entry(conn, "key_check", &encode_base64(&crypted_check_bytes))?;
    insert_entry(conn, "iv_key_check", &encode_base64(&iv))?;
    insert_entry(conn, "shake128_key_check", &encode_base64(&check_bytes_hash))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::raw;
    use crate::store::testutil::{fresh_context, test_hs_hasher, test_key_hasher, test_mixer};

    #[test]
    fn test_dbid_shape() {
        let db = fresh_context("hello");
        let dbid = get_dbid(&db.ctx.conn).unwrap();
        assert_eq!(dbid.len(), 6);
        assert!(dbid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert!(is_db_created_by_app(&db.ctx.conn));
    }

    #[test]
    fn test_set_dbid() {
        let db = fresh_context("hello");
        set_dbid(&db.ctx.conn, "FFFFFF").unwrap();
        assert_eq!(get_dbid(&db.ctx.conn).unwrap(), "FFFFFF");
        // lowercase input is normalized
        set_dbid(&db.ctx.conn, "ab01ff").unwrap();
        assert_eq!(get_dbid(&db.ctx.conn).unwrap(), "AB01FF");
    }

    #[test]
    fn test_set_dbid_validation() {
        let db = fresh_context("hello");
        assert!(set_dbid(&db.ctx.conn, "XYZXYZ").is_err());
        assert!(set_dbid(&db.ctx.conn, "FFFF").is_err());
        assert!(set_dbid(&db.ctx.conn, "FFFFFFFF").is_err());
    }

    #[test]
    fn test_malformed_dbid_detected() {
        let db = fresh_context("hello");
        raw::update_record(&db.ctx.conn, MANIFEST_TABLE, KEY_COL, &"dbid", &[(DATA_COL, &"ZZZZZZ")])
            .unwrap();
        assert!(!is_db_created_by_app(&db.ctx.conn));
        raw::update_record(&db.ctx.conn, MANIFEST_TABLE, KEY_COL, &"dbid", &[(DATA_COL, &"FFFF")])
            .unwrap();
        assert!(!is_db_created_by_app(&db.ctx.conn));
    }

    #[test]
    fn test_app_version_stored() {
        let db = fresh_context("hello");
        let mut numbers = APP_VERSION.split('.').map(|part| part.parse::<u32>().unwrap());
        let expected =
            (numbers.next().unwrap(), numbers.next().unwrap(), numbers.next().unwrap());
        assert_eq!(get_app_version(&db.ctx.conn).unwrap(), expected);
    }

    #[test]
    fn test_algorithms_roundtrip_through_manifest() {
        let db = fresh_context("hello");
        assert_eq!(get_mixer(&db.ctx.conn).unwrap(), test_mixer());
        assert_eq!(get_key_hasher(&db.ctx.conn).unwrap(), test_key_hasher());
        assert_eq!(get_hs_hasher(&db.ctx.conn).unwrap(), test_hs_hasher());
    }

    #[test]
    fn test_check_key_accepts_original_and_rejects_other() {
        let mut db = fresh_context("hello");
        check_key(&db.ctx.conn, &mut db.ctx.mixer).unwrap();

        let mut wrong_mixer = test_mixer();
        let keys = test_key_hasher().process(b"other password").unwrap();
        wrong_mixer.set_keys(keys);
        wrong_mixer.make_opposite();
        match check_key(&db.ctx.conn, &mut wrong_mixer) {
            Err(Error::KeyCheck) => {}
            other => panic!("expected key check failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_is_storage_error() {
        let db = fresh_context("hello");
        raw::delete_record(&db.ctx.conn, MANIFEST_TABLE, KEY_COL, &"mixer").unwrap();
        assert!(matches!(get_mixer(&db.ctx.conn), Err(Error::Storage(_))));
    }
}
