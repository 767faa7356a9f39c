//! The content engine: encrypted user tables and their operations.
//!
//! Each user table is backed by three physical tables sharing a rowid:
//! data (`table_NNN`), IVs (`iv_table_NNN`), and an optional hash-search
//! index (`hs_table_NNN`). A row stores the mixer-encrypted key and
//! attribute map in base64, with the IVs used for each column beside them.
//! All multi-row writes run inside one exclusive transaction; a failure
//! anywhere rolls the whole operation back.

use std::collections::BTreeMap;

use rusqlite::Connection;
use tracing::debug;

use crate::config::{
    DUMP_TABLE_PREFIX, MAX_DATA_PAD_RND_SIZE, MAX_HS_DATA_SIZE, MAX_KEY_PAD_RND_SIZE,
    MAX_TABLE_COUNT, MIN_HS_DATA_SIZE, MIN_KEY_PAD_SIZE, RAW_TABLE_PREFIX,
};
use crate::crypto::hash::Hash;
use crate::crypto::mixer::{Hasher, KeyHasher, Mixer};
use crate::encoding::{decode_base64, decode_json, decode_utf8, encode_base64, encode_json, random_bytes};
use crate::error::{Error, Result};
use crate::padding::{decode_add_padding, encode_add_padding};
use crate::store::description::{self, TableDescription};
use crate::store::manifest;
use crate::store::raw::{self, ForeignKey};
use crate::store::StoreContext;

const ID_COL: &str = "id";
const KEY_COL: &str = "key";
const DATA_COL: &str = "data";
const IV_KEY_COL: &str = "iv_key";
const IV_DATA_COL: &str = "iv_data";
const HS_HASH_COL: &str = "hs_hash";

/// User-visible attribute map of one record. Values are strings by
/// construction.
pub type AttributeMap = BTreeMap<String, String>;

/// One decrypted row.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRow {
    pub id: i64,
    pub key: String,
    pub attribs: AttributeMap,
}

struct KeyEncryption {
    iv_key: String,
    crypted_key: String,
    key_hash: Option<String>,
}

struct DataEncryption {
    iv_data: String,
    crypted_data: String,
}

/// Initializes a fresh database: manifest and description tables plus the
/// key-check triple. Requires the file to contain no tables, and fails
/// closed if the freshly written key check does not verify.
pub fn init_empty_database(
    conn: &Connection,
    mixer: &mut Mixer,
    hs_hasher: &Hasher,
    key_hasher: &KeyHasher,
) -> Result<()> {
    if !raw::db_tables(conn)?.is_empty() {
        return Err(Error::storage("database is not empty for initializing"));
    }
    let owns = raw::begin_write(conn)?;
    let result = (|| {
        manifest::init_manifest_table(conn, mixer, key_hasher, hs_hasher)?;
        description::init_description_table(conn)
    })();
    raw::finish_write(conn, owns, result)?;
    manifest::check_key(conn, mixer)
        .map_err(|_| Error::storage("cannot verify key after database initialization, encryption error"))?;
    Ok(())
}

/// Creates a user table: data and IV tables, optionally the hash-search
/// index, and the encrypted catalog entry.
pub fn create_table(ctx: &mut StoreContext, name: &str, enable_hash_search: bool) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = create_table_inner(ctx, name, enable_hash_search);
    raw::finish_write(&ctx.conn, owns, result)
}

fn create_table_inner(ctx: &mut StoreContext, name: &str, enable_hash_search: bool) -> Result<()> {
    if description::is_table_exist(ctx, name)? {
        return Err(Error::storage(format!("table '{name}' already exists")));
    }
    let counter = free_table_counter(ctx)?;
    let mut desc = TableDescription::new(format!("{RAW_TABLE_PREFIX}{counter}"), name.to_owned(), false);
    create_content_table(&ctx.conn, &desc)?;
    create_iv_table(&ctx.conn, &desc)?;
    if enable_hash_search {
        let hs_size = MIN_HS_DATA_SIZE + rand_below(MAX_HS_DATA_SIZE - MIN_HS_DATA_SIZE);
        desc.enable_hash_search(random_bytes(hs_size));
        create_hs_table(&ctx.conn, &desc)?;
    }
    description::insert(ctx, &desc)?;
    ctx.desc_cache.clear();
    debug!(table = name, raw = %desc.raw_name, hash_search = enable_hash_search, "created user table");
    Ok(())
}

fn rand_below(bound: usize) -> usize {
    use rand::Rng;
    rand::rng().random_range(0..bound)
}

/// Picks the smallest free raw-table counter in [0, 1000), zero-padded to
/// three digits.
fn free_table_counter(ctx: &mut StoreContext) -> Result<String> {
    let mut used = [false; MAX_TABLE_COUNT];
    for desc in description::iterate_with_decryption(ctx)? {
        if let Some(numeric) = desc.raw_name.strip_prefix(RAW_TABLE_PREFIX)
            && let Ok(counter) = numeric.parse::<usize>()
            && counter < MAX_TABLE_COUNT
        {
            used[counter] = true;
        }
    }
    used.iter()
        .position(|taken| !taken)
        .map(|counter| format!("{counter:03}"))
        .ok_or_else(|| Error::storage("tables limit exceeded (1000)"))
}

fn create_content_table(conn: &Connection, desc: &TableDescription) -> Result<()> {
    raw::create_table(
        conn,
        &desc.raw_name,
        &[(KEY_COL, "TEXT"), (DATA_COL, "TEXT"), (ID_COL, "INTEGER")],
        Some(ID_COL),
        None,
        &[],
    )
}

fn create_iv_table(conn: &Connection, desc: &TableDescription) -> Result<()> {
    let fk = ForeignKey { column: ID_COL, ref_column: ID_COL, ref_table: &desc.raw_name };
    raw::create_table(
        conn,
        &desc.iv_name,
        &[(IV_KEY_COL, "TEXT"), (IV_DATA_COL, "TEXT"), (ID_COL, "INTEGER")],
        Some(ID_COL),
        Some(&fk),
        &[],
    )
}

fn create_hs_table(conn: &Connection, desc: &TableDescription) -> Result<()> {
    let hs_name = desc.hs_name.as_deref().expect("hash search enabled");
    let fk = ForeignKey { column: ID_COL, ref_column: ID_COL, ref_table: &desc.raw_name };
    raw::create_table(
        conn,
        hs_name,
        &[(HS_HASH_COL, "TEXT"), (ID_COL, "INTEGER")],
        Some(ID_COL),
        Some(&fk),
        &[HS_HASH_COL],
    )?;
    raw::create_index(conn, hs_name, HS_HASH_COL)
}

/// Removes the catalog entry, then drops the hash-search, IV, and data
/// tables in that order.
pub fn delete_table(ctx: &mut StoreContext, table: &str) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = delete_table_inner(ctx, table);
    raw::finish_write(&ctx.conn, owns, result)
}

fn delete_table_inner(ctx: &mut StoreContext, table: &str) -> Result<()> {
    let desc = description::delete(ctx, table)?;
    if let Some(hs_name) = &desc.hs_name {
        raw::drop_table(&ctx.conn, hs_name)?;
    }
    raw::drop_table(&ctx.conn, &desc.iv_name)?;
    raw::drop_table(&ctx.conn, &desc.raw_name)?;
    debug!(table, raw = %desc.raw_name, "deleted user table");
    Ok(())
}

/// Copies every record of `src_table` into `dst_table`, which must exist
/// and be empty.
pub fn copy_data(ctx: &mut StoreContext, src_table: &str, dst_table: &str) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = copy_data_inner(ctx, src_table, dst_table);
    raw::finish_write(&ctx.conn, owns, result)
}

fn copy_data_inner(ctx: &mut StoreContext, src_table: &str, dst_table: &str) -> Result<()> {
    if !description::is_table_exist(ctx, src_table)? {
        return Err(Error::storage(format!("table '{src_table}' not exist")));
    }
    if !description::is_table_exist(ctx, dst_table)? {
        return Err(Error::storage(format!("table '{dst_table}' not exist")));
    }
    if count_records(ctx, dst_table)? > 0 {
        return Err(Error::storage("copy not allowed to non-empty tables"));
    }
    for row in iterate_with_decryption(ctx, src_table)? {
        insert_record_inner(ctx, dst_table, &row.key, &row.attribs)?;
    }
    Ok(())
}

/// Inserts a record. Fails if the key already exists.
pub fn insert_record(
    ctx: &mut StoreContext,
    table: &str,
    key: &str,
    attribs: &AttributeMap,
) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = insert_record_inner(ctx, table, key, attribs);
    raw::finish_write(&ctx.conn, owns, result)
}

fn insert_record_inner(
    ctx: &mut StoreContext,
    table: &str,
    key: &str,
    attribs: &AttributeMap,
) -> Result<()> {
    let desc = description::get(ctx, table)?;
    if rowid_by_key(ctx, &desc, key)?.is_some() {
        return Err(Error::storage(format!("key '{key}' already exists")));
    }
    // key and data steps share the mixer IV state; keep them in sequence
    let key_enc = encrypt_key(&mut ctx.mixer, &ctx.hs_hasher, &desc, key)?;
    let data_enc = encrypt_data(&mut ctx.mixer, attribs)?;
    let rowid = raw::insert_record(
        &ctx.conn,
        &desc.raw_name,
        &[KEY_COL, DATA_COL],
        &[&key_enc.crypted_key, &data_enc.crypted_data],
    )?;
    raw::insert_record(
        &ctx.conn,
        &desc.iv_name,
        &[IV_KEY_COL, IV_DATA_COL, ID_COL],
        &[&key_enc.iv_key, &data_enc.iv_data, &rowid],
    )?;
    if let Some(key_hash) = &key_enc.key_hash {
        let hs_name = desc.hs_name.as_deref().expect("hash search enabled");
        raw::insert_record(&ctx.conn, hs_name, &[HS_HASH_COL, ID_COL], &[key_hash, &rowid])?;
    }
    Ok(())
}

/// Updates a record. With `replace` the stored attribute map is replaced
/// wholesale; otherwise new values are merged over it. `new_key` renames
/// the record and defaults to the old key. Both columns are re-encrypted
/// with fresh IVs every time.
pub fn update_record(
    ctx: &mut StoreContext,
    table: &str,
    key: &str,
    attribs: &AttributeMap,
    new_key: Option<&str>,
    replace: bool,
) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = update_record_inner(ctx, table, key, attribs, new_key, replace);
    raw::finish_write(&ctx.conn, owns, result)
}

fn update_record_inner(
    ctx: &mut StoreContext,
    table: &str,
    key: &str,
    attribs: &AttributeMap,
    new_key: Option<&str>,
    replace: bool,
) -> Result<()> {
    let desc = description::get(ctx, table)?;
    let Some(rowid) = rowid_by_key(ctx, &desc, key)? else {
        return Err(Error::storage(format!("key '{key}' not exist")));
    };
    if let Some(new_key) = new_key
        && rowid_by_key(ctx, &desc, new_key)?.is_some()
    {
        return Err(Error::storage(format!("key '{new_key}' already exist")));
    }
    let new_key = new_key.unwrap_or(key);
    let mut new_data = if replace { AttributeMap::new() } else { record_by_id(ctx, &desc, rowid)? };
    new_data.extend(attribs.iter().map(|(k, v)| (k.clone(), v.clone())));
    let key_enc = encrypt_key(&mut ctx.mixer, &ctx.hs_hasher, &desc, new_key)?;
    let data_enc = encrypt_data(&mut ctx.mixer, &new_data)?;
    raw::update_record(
        &ctx.conn,
        &desc.raw_name,
        ID_COL,
        &rowid,
        &[(KEY_COL, &key_enc.crypted_key), (DATA_COL, &data_enc.crypted_data)],
    )?;
    raw::update_record(
        &ctx.conn,
        &desc.iv_name,
        ID_COL,
        &rowid,
        &[(IV_KEY_COL, &key_enc.iv_key), (IV_DATA_COL, &data_enc.iv_data)],
    )?;
    if let Some(key_hash) = &key_enc.key_hash {
        let hs_name = desc.hs_name.as_deref().expect("hash search enabled");
        raw::update_record(&ctx.conn, hs_name, ID_COL, &rowid, &[(HS_HASH_COL, key_hash)])?;
    }
    Ok(())
}

/// Returns the decrypted attribute map, or `None` if the key is absent.
pub fn get_record(ctx: &mut StoreContext, table: &str, key: &str) -> Result<Option<AttributeMap>> {
    let desc = description::get(ctx, table)?;
    match rowid_by_key(ctx, &desc, key)? {
        Some(rowid) => Ok(Some(record_by_id(ctx, &desc, rowid)?)),
        None => Ok(None),
    }
}

/// Deletes a record; no-op when the key is absent. Removes the hash-search
/// row (if any), the IV row, then the data row.
pub fn del_record(ctx: &mut StoreContext, table: &str, key: &str) -> Result<()> {
    let owns = raw::begin_write(&ctx.conn)?;
    let result = del_record_inner(ctx, table, key);
    raw::finish_write(&ctx.conn, owns, result)
}

fn del_record_inner(ctx: &mut StoreContext, table: &str, key: &str) -> Result<()> {
    let desc = description::get(ctx, table)?;
    let Some(rowid) = rowid_by_key(ctx, &desc, key)? else {
        return Ok(());
    };
    del_record_by_id(&ctx.conn, &desc, rowid)
}

fn del_record_by_id(conn: &Connection, desc: &TableDescription, rowid: i64) -> Result<()> {
    if let Some(hs_name) = &desc.hs_name {
        raw::delete_record(conn, hs_name, ID_COL, &rowid)?;
    }
    raw::delete_record(conn, &desc.iv_name, ID_COL, &rowid)?;
    raw::delete_record(conn, &desc.raw_name, ID_COL, &rowid)?;
    Ok(())
}

pub fn count_records(ctx: &mut StoreContext, table: &str) -> Result<u64> {
    let desc = description::get(ctx, table)?;
    raw::count_star(&ctx.conn, &desc.raw_name)
}

/// Decrypts every row of a user table.
pub fn iterate_with_decryption(ctx: &mut StoreContext, table: &str) -> Result<Vec<ContentRow>> {
    let desc = description::get(ctx, table)?;
    let sql = format!(
        "SELECT t.{ID_COL}, t.{KEY_COL}, t.{DATA_COL}, iv.{IV_KEY_COL}, iv.{IV_DATA_COL} \
         FROM {} t INNER JOIN {} iv ON t.{ID_COL} = iv.{ID_COL}",
        desc.raw_name, desc.iv_name
    );
    let rows: Vec<(i64, String, String, String, String)> = raw::query_rows(&ctx.conn, &sql, [], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })?;
    rows.iter()
        .map(|(id, key, data, iv_key, iv_data)| {
            Ok(ContentRow {
                id: *id,
                key: decrypt_key_col(&mut ctx.mixer, key, iv_key)?,
                attribs: decrypt_data_col(&mut ctx.mixer, data, iv_data)?,
            })
        })
        .collect()
}

/// Decrypts the key column only.
pub fn keys(ctx: &mut StoreContext, table: &str) -> Result<Vec<String>> {
    let desc = description::get(ctx, table)?;
    Ok(iterate_keys(ctx, &desc)?.into_iter().map(|(_, key)| key).collect())
}

/// Keys containing `key_substr`, via key-column decryption.
pub fn find(ctx: &mut StoreContext, table: &str, key_substr: &str) -> Result<Vec<String>> {
    Ok(keys(ctx, table)?.into_iter().filter(|key| key.contains(key_substr)).collect())
}

// LOOKUP

/// Point lookup policy: the keyed-hash index when the table has one, a
/// linear scan with key decryption otherwise. Both return the same answer
/// for any well-formed database.
fn rowid_by_key(ctx: &mut StoreContext, desc: &TableDescription, key: &str) -> Result<Option<i64>> {
    if desc.hash_search_enabled {
        rowid_by_key_hash(ctx, desc, key)
    } else {
        rowid_by_seq_decryption(ctx, desc, key)
    }
}

fn rowid_by_key_hash(ctx: &mut StoreContext, desc: &TableDescription, key: &str) -> Result<Option<i64>> {
    let key_hash = calc_key_hash(&ctx.hs_hasher, desc, key)?;
    let hs_name = desc.hs_name.as_deref().expect("hash search enabled");
    let sql = format!("SELECT {ID_COL} FROM {hs_name} WHERE {HS_HASH_COL} = ?1");
    raw::query_row_opt(&ctx.conn, &sql, [&key_hash], |row| row.get(0))
}

fn rowid_by_seq_decryption(
    ctx: &mut StoreContext,
    desc: &TableDescription,
    key: &str,
) -> Result<Option<i64>> {
    for (id, row_key) in iterate_keys(ctx, desc)? {
        if row_key == key {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

fn iterate_keys(ctx: &mut StoreContext, desc: &TableDescription) -> Result<Vec<(i64, String)>> {
    let sql = format!(
        "SELECT t.{ID_COL}, t.{KEY_COL}, iv.{IV_KEY_COL} \
         FROM {} t INNER JOIN {} iv ON t.{ID_COL} = iv.{ID_COL}",
        desc.raw_name, desc.iv_name
    );
    let rows: Vec<(i64, String, String)> = raw::query_rows(&ctx.conn, &sql, [], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;
    rows.iter()
        .map(|(id, key, iv_key)| Ok((*id, decrypt_key_col(&mut ctx.mixer, key, iv_key)?)))
        .collect()
}

fn record_by_id(ctx: &mut StoreContext, desc: &TableDescription, rowid: i64) -> Result<AttributeMap> {
    let sql = format!(
        "SELECT t.{DATA_COL}, iv.{IV_DATA_COL} \
         FROM {} t INNER JOIN {} iv ON t.{ID_COL} = iv.{ID_COL} WHERE t.{ID_COL} = ?1",
        desc.raw_name, desc.iv_name
    );
    let row: Option<(String, String)> =
        raw::query_row_opt(&ctx.conn, &sql, [rowid], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let (data, iv_data) =
        row.ok_or_else(|| Error::storage(format!("record {rowid} not found in '{}'", desc.name)))?;
    decrypt_data_col(&mut ctx.mixer, &data, &iv_data)
}

// ENCRYPTION

fn encrypt_key(
    mixer: &mut Mixer,
    hs_hasher: &Hasher,
    desc: &TableDescription,
    key: &str,
) -> Result<KeyEncryption> {
    let key_hash =
        if desc.hash_search_enabled { Some(calc_key_hash(hs_hasher, desc, key)?) } else { None };
    let padded = encode_add_padding(key.as_bytes(), MIN_KEY_PAD_SIZE, MAX_KEY_PAD_RND_SIZE);
    let iv_key = encode_base64(&mixer.iv_set_random());
    let crypted_key = encode_base64(&mixer.process(&padded)?);
    Ok(KeyEncryption { iv_key, crypted_key, key_hash })
}

fn encrypt_data(mixer: &mut Mixer, attribs: &AttributeMap) -> Result<DataEncryption> {
    let plain = encode_json(&serde_json::to_value(attribs).expect("string map is valid json"));
    let padded = encode_add_padding(plain.as_bytes(), 0, MAX_DATA_PAD_RND_SIZE);
    let iv_data = encode_base64(&mixer.iv_set_random());
    let crypted_data = encode_base64(&mixer.process(&padded)?);
    Ok(DataEncryption { iv_data, crypted_data })
}

fn decrypt_bytes(mixer: &mut Mixer, crypted_base64: &str, iv_base64: &str) -> Result<Vec<u8>> {
    let opp = mixer.opp_mut();
    opp.iv_set(&decode_base64(iv_base64)?)?;
    opp.process(&decode_base64(crypted_base64)?)
}

fn decrypt_key_col(mixer: &mut Mixer, crypted: &str, iv: &str) -> Result<String> {
    decode_utf8(decode_add_padding(&decrypt_bytes(mixer, crypted, iv)?)?)
}

fn decrypt_data_col(mixer: &mut Mixer, crypted: &str, iv: &str) -> Result<AttributeMap> {
    let plain = decode_utf8(decode_add_padding(&decrypt_bytes(mixer, crypted, iv)?)?)?;
    let value = decode_json(&plain)?;
    serde_json::from_value(value).map_err(|e| Error::storage(format!("malformed attribute map: {e}")))
}

/// Keyed hash for point lookup: two SHA3-512 halves salted with the
/// table-specific `hs_data`, bound to the raw and user-visible table names,
/// then run through the database's hash-search hasher.
fn calc_key_hash(hs_hasher: &Hasher, desc: &TableDescription, key: &str) -> Result<String> {
    let hs_data = desc.hs_data.as_ref().expect("hash search enabled");
    let middle = hs_data.len() / 2;
    let mut part1 = hs_data[..middle].to_vec();
    part1.extend_from_slice(key.as_bytes());
    let mut part2 = hs_data[middle..].to_vec();
    part2.extend_from_slice(desc.raw_name.as_bytes());
    part2.extend_from_slice(key.as_bytes());
    part2.extend_from_slice(desc.name.as_bytes());
    let mut input = Hash::Sha3_512.process(&part1)?;
    input.extend(Hash::Sha3_512.process(&part2)?);
    Ok(encode_base64(&hs_hasher.process(&input)?))
}

// EXPORT / IMPORT

/// Exports a table's decrypted rows into `content_<name>(key, data)` inside
/// a separate dump database. The dump table must not already exist.
pub fn export_table(ctx: &mut StoreContext, conn_dump: &Connection, table: &str) -> Result<()> {
    let dump_table = format!("{DUMP_TABLE_PREFIX}{table}");
    if raw::table_exists(conn_dump, &dump_table)? {
        return Err(Error::storage(format!("table in dump already exist '{table}'")));
    }
    if !description::is_table_exist(ctx, table)? {
        return Err(Error::storage(format!("table not exist '{table}'")));
    }
    raw::create_table(conn_dump, &dump_table, &[(KEY_COL, "TEXT"), (DATA_COL, "TEXT")], None, None, &[])?;
    for row in iterate_with_decryption(ctx, table)? {
        let data = encode_json(&serde_json::to_value(&row.attribs).expect("string map is valid json"));
        raw::insert_record(conn_dump, &dump_table, &[KEY_COL, DATA_COL], &[&row.key, &data])?;
    }
    debug!(table, "exported table to dump");
    Ok(())
}

/// Imports `content_<name>` rows from a dump database into an existing,
/// empty user table.
pub fn import_table(ctx: &mut StoreContext, conn_dump: &Connection, table: &str) -> Result<()> {
    let dump_table = format!("{DUMP_TABLE_PREFIX}{table}");
    if !raw::table_exists(conn_dump, &dump_table)? {
        return Err(Error::storage(format!("table in dump not exist '{table}'")));
    }
    if !description::is_table_exist(ctx, table)? {
        return Err(Error::storage(format!("table not created '{table}'")));
    }
    if count_records(ctx, table)? > 0 {
        return Err(Error::storage(format!("table is not empty '{table}'")));
    }
    let sql = format!("SELECT {KEY_COL}, {DATA_COL} FROM {dump_table}");
    let rows: Vec<(String, String)> =
        raw::query_rows(conn_dump, &sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let owns = raw::begin_write(&ctx.conn)?;
    let result = (|| -> Result<()> {
        for (key, data) in &rows {
            let attribs: AttributeMap = serde_json::from_value(decode_json(data)?)
                .map_err(|e| Error::storage(format!("malformed attribute map in dump: {e}")))?;
            insert_record_inner(ctx, table, key, &attribs)?;
        }
        Ok(())
    })();
    raw::finish_write(&ctx.conn, owns, result)?;
    debug!(table, "imported table from dump");
    Ok(())
}
