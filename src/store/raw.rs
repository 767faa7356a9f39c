//! Thin contract over the SQLite row store.
//!
//! Everything the engine needs from the relational file lives here:
//! create/connect, DDL with primary/foreign/unique keys, equality CRUD,
//! iteration, row counting, and exclusive transactions. Table and column
//! names are engine-generated identifiers and are formatted into SQL text;
//! all values travel as bound parameters.

use std::path::Path;

use rusqlite::types::ToSql;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{Error, Result};

pub struct ForeignKey<'a> {
    pub column: &'a str,
    pub ref_column: &'a str,
    pub ref_table: &'a str,
}

/// Creates a new database file. With `rewrite` an existing file is removed
/// first; otherwise an existing file is a storage error.
pub fn db_create_new(path: &Path, rewrite: bool) -> Result<Connection> {
    if path.exists() {
        if !rewrite {
            return Err(Error::storage(format!("database file already exists: {}", path.display())));
        }
        std::fs::remove_file(path)
            .map_err(|e| Error::storage(format!("cannot remove file {}: {e}", path.display())))?;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::storage(format!("cannot create directory {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    connection_setup(&conn)?;
    debug!(path = %path.display(), "created database file");
    Ok(conn)
}

/// Opens an existing database file and probes that it parses as one.
/// On any failure the handle is released before the error propagates.
pub fn db_connect(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(Error::storage(format!("database file not found: {}", path.display())));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    conn.query_row("PRAGMA schema_version", [], |_| Ok(()))
        .map_err(|e| Error::storage(format!("database connection test failed for {}: {e}", path.display())))?;
    connection_setup(&conn)?;
    Ok(conn)
}

fn connection_setup(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// Starts an exclusive transaction on a shared connection handle.
pub fn exclusive_transaction(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Exclusive)?)
}

/// Opens an exclusive transaction unless one is already active. Returns
/// whether this call now owns the transaction.
pub fn begin_write(conn: &Connection) -> Result<bool> {
    if !conn.is_autocommit() {
        return Ok(false);
    }
    conn.execute_batch("BEGIN EXCLUSIVE")?;
    Ok(true)
}

/// Commits an owned transaction on success, rolls it back on error, and
/// passes the result through.
pub fn finish_write<T>(conn: &Connection, owns: bool, result: Result<T>) -> Result<T> {
    if !owns {
        return result;
    }
    match result {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Total number of rows changed since the connection was opened.
pub fn total_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}

pub fn create_table(
    conn: &Connection,
    name: &str,
    columns: &[(&str, &str)],
    primary_key: Option<&str>,
    foreign_key: Option<&ForeignKey<'_>>,
    unique: &[&str],
) -> Result<()> {
    let mut parts: Vec<String> =
        columns.iter().map(|(col, kind)| format!("{col} {kind} NOT NULL")).collect();
    if let Some(pk) = primary_key {
        parts.push(format!("PRIMARY KEY ({pk})"));
    }
    if let Some(fk) = foreign_key {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            fk.column, fk.ref_table, fk.ref_column
        ));
    }
    for col in unique {
        parts.push(format!("UNIQUE ({col})"));
    }
    let sql = format!("CREATE TABLE {name} ({})", parts.join(", "));
    conn.execute(&sql, [])?;
    debug!(table = name, "created table");
    Ok(())
}

pub fn drop_table(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(&format!("DROP TABLE {name}"), [])?;
    debug!(table = name, "dropped table");
    Ok(())
}

pub fn create_index(conn: &Connection, table: &str, column: &str) -> Result<()> {
    conn.execute(&format!("CREATE INDEX index_{table}_{column} ON {table} ({column})"), [])?;
    Ok(())
}

/// Inserts one row and returns its rowid.
pub fn insert_record(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    values: &[&dyn ToSql],
) -> Result<i64> {
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, values)?;
    Ok(conn.last_insert_rowid())
}

pub fn update_record(
    conn: &Connection,
    table: &str,
    key_column: &str,
    key: &dyn ToSql,
    assignments: &[(&str, &dyn ToSql)],
) -> Result<()> {
    let sets: Vec<String> =
        assignments.iter().enumerate().map(|(i, (col, _))| format!("{col} = ?{}", i + 1)).collect();
    let sql = format!(
        "UPDATE {table} SET {} WHERE {key_column} = ?{}",
        sets.join(", "),
        assignments.len() + 1
    );
    let mut values: Vec<&dyn ToSql> = assignments.iter().map(|(_, value)| *value).collect();
    values.push(key);
    conn.execute(&sql, values.as_slice())?;
    Ok(())
}

pub fn delete_record(conn: &Connection, table: &str, key_column: &str, key: &dyn ToSql) -> Result<()> {
    let sql = format!("DELETE FROM {table} WHERE {key_column} = ?1");
    conn.execute(&sql, [key])?;
    Ok(())
}

/// Equality select of one row, mapped by the caller.
pub fn query_row_opt<T, P, F>(conn: &Connection, sql: &str, params: P, mapper: F) -> Result<Option<T>>
where
    P: rusqlite::Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    Ok(conn.query_row(sql, params, mapper).optional()?)
}

/// Runs a query and collects every mapped row.
pub fn query_rows<T, P, F>(conn: &Connection, sql: &str, params: P, mapper: F) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, mapper)?;
    Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
}

pub fn count_star(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count as u64)
}

pub fn db_tables(conn: &Connection) -> Result<Vec<String>> {
    query_rows(conn, "SELECT name FROM sqlite_master WHERE type = 'table'", [], |row| row.get(0))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    query_rows(conn, &format!("PRAGMA table_info({table})"), [], |row| row.get(1))
}
