//! Encrypted catalog mapping user-visible table names to raw table names.
//!
//! Table identity is data too: descriptions are serialized, padded, and
//! encrypted with the database mixer, keyed by the meaningless raw name.
//! Lookups go through a per-connection memo cache that is invalidated on
//! every create/delete and on connection open.

use crate::config::{
    HS_TABLE_PREFIX, IV_TABLE_PREFIX, MAX_DESC_PAD_RND_SIZE, MIN_DESC_PAD_SIZE,
};
use crate::encoding::{decode_base64, decode_json, decode_utf8, encode_base64, encode_json};
use crate::error::{Error, Result};
use crate::crypto::mixer::Mixer;
use crate::padding::{decode_add_padding, encode_add_padding};
use crate::serial::{Value, deserialize, serialize};
use crate::store::raw::{self, ForeignKey};
use crate::store::StoreContext;
use rusqlite::Connection;

pub const DESCRIPTION_TABLE: &str = "description";
pub const IV_DESCRIPTION_TABLE: &str = "iv_description";

const KEY_COL: &str = "key";
const DATA_COL: &str = "data";
const IV_DATA_COL: &str = "iv_data";

/// Catalog record of one user table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    /// Physical data table name, `table_NNN`.
    pub raw_name: String,
    /// User-visible table name.
    pub name: String,
    pub hash_search_enabled: bool,
    /// Physical IV table name, `iv_table_NNN`.
    pub iv_name: String,
    /// Physical hash-search table name when enabled.
    pub hs_name: Option<String>,
    /// Per-table random salt for the hash-search keyed hash.
    pub hs_data: Option<Vec<u8>>,
}

impl TableDescription {
    pub fn new(raw_name: String, name: String, hash_search_enabled: bool) -> Self {
        let iv_name = format!("{IV_TABLE_PREFIX}{raw_name}");
        Self { raw_name, name, hash_search_enabled, iv_name, hs_name: None, hs_data: None }
    }

    /// Enables the hash-search side index with the given per-table salt.
    pub fn enable_hash_search(&mut self, hs_data: Vec<u8>) {
        self.hs_name = Some(format!("{HS_TABLE_PREFIX}{}", self.raw_name));
        self.hs_data = Some(hs_data);
        self.hash_search_enabled = true;
    }
}

pub fn init_description_table(conn: &Connection) -> Result<()> {
    raw::create_table(
        conn,
        DESCRIPTION_TABLE,
        &[(KEY_COL, "TEXT"), (DATA_COL, "TEXT")],
        Some(KEY_COL),
        None,
        &[],
    )?;
    let fk = ForeignKey { column: KEY_COL, ref_column: KEY_COL, ref_table: DESCRIPTION_TABLE };
    raw::create_table(
        conn,
        IV_DESCRIPTION_TABLE,
        &[(KEY_COL, "TEXT"), (IV_DATA_COL, "TEXT")],
        Some(KEY_COL),
        Some(&fk),
        &[],
    )?;
    Ok(())
}

pub fn insert(ctx: &mut StoreContext, desc: &TableDescription) -> Result<()> {
    let (iv, crypted_desc) = encrypt_desc(&mut ctx.mixer, desc)?;
    raw::insert_record(
        &ctx.conn,
        DESCRIPTION_TABLE,
        &[KEY_COL, DATA_COL],
        &[&desc.raw_name, &crypted_desc],
    )?;
    raw::insert_record(
        &ctx.conn,
        IV_DESCRIPTION_TABLE,
        &[KEY_COL, IV_DATA_COL],
        &[&desc.raw_name, &iv],
    )?;
    Ok(())
}

/// Removes the catalog rows for `table_name` and returns the removed
/// description so callers can drop the physical tables.
pub fn delete(ctx: &mut StoreContext, table_name: &str) -> Result<TableDescription> {
    let desc = get(ctx, table_name)?;
    ctx.desc_cache.clear();
    raw::delete_record(&ctx.conn, IV_DESCRIPTION_TABLE, KEY_COL, &desc.raw_name)?;
    raw::delete_record(&ctx.conn, DESCRIPTION_TABLE, KEY_COL, &desc.raw_name)?;
    Ok(desc)
}

pub fn get(ctx: &mut StoreContext, table_name: &str) -> Result<TableDescription> {
    get_opt(ctx, table_name)?
        .ok_or_else(|| Error::storage(format!("no such table '{table_name}'")))
}

pub fn get_opt(ctx: &mut StoreContext, table_name: &str) -> Result<Option<TableDescription>> {
    if let Some(desc) = ctx.desc_cache.get(table_name) {
        return Ok(Some(desc.clone()));
    }
    let found = iterate_with_decryption(ctx)?
        .into_iter()
        .find(|desc| desc.name == table_name);
    if let Some(desc) = &found {
        ctx.desc_cache.insert(table_name.to_owned(), desc.clone());
    }
    Ok(found)
}

pub fn is_table_exist(ctx: &mut StoreContext, table_name: &str) -> Result<bool> {
    Ok(get_opt(ctx, table_name)?.is_some())
}

/// Decrypts every catalog row.
pub fn iterate_with_decryption(ctx: &mut StoreContext) -> Result<Vec<TableDescription>> {
    let sql = format!(
        "SELECT d.{DATA_COL}, iv.{IV_DATA_COL} \
         FROM {DESCRIPTION_TABLE} d \
         INNER JOIN {IV_DESCRIPTION_TABLE} iv ON d.{KEY_COL} = iv.{KEY_COL}"
    );
    let rows: Vec<(String, String)> =
        raw::query_rows(&ctx.conn, &sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.iter()
        .map(|(data, iv_data)| decrypt_desc(&mut ctx.mixer, data, iv_data))
        .collect()
}

fn encrypt_desc(mixer: &mut Mixer, desc: &TableDescription) -> Result<(String, String)> {
    let iv = encode_base64(&mixer.iv_set_random());
    let plain = encode_json(&serialize(&desc_to_value(desc)));
    let padded = encode_add_padding(plain.as_bytes(), MIN_DESC_PAD_SIZE, MAX_DESC_PAD_RND_SIZE);
    let crypted_desc = encode_base64(&mixer.process(&padded)?);
    Ok((iv, crypted_desc))
}

fn decrypt_desc(mixer: &mut Mixer, data: &str, iv_data: &str) -> Result<TableDescription> {
    let opp = mixer.opp_mut();
    opp.iv_set(&decode_base64(iv_data)?)?;
    let padded = opp.process(&decode_base64(data)?)?;
    let plain = decode_utf8(decode_add_padding(&padded)?)?;
    desc_from_value(deserialize(&decode_json(&plain)?)?)
}

fn desc_to_value(desc: &TableDescription) -> Value {
    Value::Tuple(vec![
        Value::Str(desc.raw_name.clone()),
        Value::Str(desc.name.clone()),
        Value::Bool(desc.hash_search_enabled),
        Value::Str(desc.iv_name.clone()),
        desc.hs_name.clone().map_or(Value::Null, Value::Str),
        desc.hs_data.clone().map_or(Value::Null, Value::Bytes),
    ])
}

fn desc_from_value(value: Value) -> Result<TableDescription> {
    let malformed = || Error::storage("malformed table description");
    let Value::Tuple(fields) = value else {
        return Err(malformed());
    };
    let mut fields = fields.into_iter();
    let mut next = || fields.next().ok_or_else(malformed);
    let raw_name = match next()? {
        Value::Str(s) => s,
        _ => return Err(malformed()),
    };
    let name = match next()? {
        Value::Str(s) => s,
        _ => return Err(malformed()),
    };
    let hash_search_enabled = match next()? {
        Value::Bool(b) => b,
        _ => return Err(malformed()),
    };
    let iv_name = match next()? {
        Value::Str(s) => s,
        _ => return Err(malformed()),
    };
    let hs_name = match next()? {
        Value::Str(s) => Some(s),
        Value::Null => None,
        _ => return Err(malformed()),
    };
    let hs_data = match next()? {
        Value::Bytes(b) => Some(b),
        Value::Null => None,
        _ => return Err(malformed()),
    };
    Ok(TableDescription { raw_name, name, hash_search_enabled, iv_name, hs_name, hs_data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::random_bytes;

    #[test]
    fn test_description_value_roundtrip() {
        let mut desc = TableDescription::new("table_007".into(), "passwords".into(), false);
        desc.enable_hash_search(random_bytes(40));
        assert_eq!(desc_from_value(desc_to_value(&desc)).unwrap(), desc);

        let plain = TableDescription::new("table_000".into(), "notes".into(), false);
        assert_eq!(desc_from_value(desc_to_value(&plain)).unwrap(), plain);
    }

    #[test]
    fn test_malformed_description_rejected() {
        assert!(desc_from_value(Value::Null).is_err());
        assert!(desc_from_value(Value::Tuple(vec![Value::Str("x".into())])).is_err());
    }
}
