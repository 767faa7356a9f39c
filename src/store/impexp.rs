//! Multi-table export/import against a plaintext dump database.

use std::path::Path;

use crate::config::DUMP_TABLE_PREFIX;
use crate::error::Result;
use crate::store::{StoreContext, content, description, raw};

/// Exports the given tables (or every table with `all`) into a freshly
/// created dump database at `dump_path`.
pub fn export_tables(
    ctx: &mut StoreContext,
    dump_path: &Path,
    tables: &[String],
    rewrite: bool,
    all: bool,
) -> Result<()> {
    let names: Vec<String> = if all {
        description::iterate_with_decryption(ctx)?.into_iter().map(|desc| desc.name).collect()
    } else {
        tables.to_vec()
    };
    let conn_dump = raw::db_create_new(dump_path, rewrite)?;
    let owns = raw::begin_write(&conn_dump)?;
    let result = (|| -> Result<()> {
        for table in &names {
            content::export_table(ctx, &conn_dump, table)?;
        }
        Ok(())
    })();
    raw::finish_write(&conn_dump, owns, result)
}

/// Imports the given tables (or every `content_*` table with `all`) from a
/// dump database into already-created, empty user tables. The whole import
/// runs in one transaction on the encrypted database.
pub fn import_tables(
    ctx: &mut StoreContext,
    dump_path: &Path,
    tables: &[String],
    all: bool,
) -> Result<()> {
    let conn_dump = raw::db_connect(dump_path)?;
    let names: Vec<String> = if all {
        raw::db_tables(&conn_dump)?
            .into_iter()
            .filter_map(|table| table.strip_prefix(DUMP_TABLE_PREFIX).map(str::to_owned))
            .collect()
    } else {
        tables.to_vec()
    };
    let owns = raw::begin_write(&ctx.conn)?;
    let result = (|| -> Result<()> {
        for table in &names {
            content::import_table(ctx, &conn_dump, table)?;
        }
        Ok(())
    })();
    raw::finish_write(&ctx.conn, owns, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::content::{self, AttributeMap};
    use crate::store::testutil::fresh_context;

    fn attribs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut src = fresh_context("hello");
        content::create_table(&mut src.ctx, "t1", true).unwrap();
        content::create_table(&mut src.ctx, "t2", false).unwrap();
        for i in 0..3 {
            content::insert_record(
                &mut src.ctx,
                "t1",
                &format!("k{i}"),
                &attribs(&[("login", "l"), ("password", &format!("p{i}"))]),
            )
            .unwrap();
        }
        content::insert_record(&mut src.ctx, "t2", "only", &attribs(&[("v", "1")])).unwrap();

        let dump_path = src.dir.path().join("dump.db");
        export_tables(&mut src.ctx, &dump_path, &[], false, true).unwrap();

        // without rewrite the existing dump file is refused
        assert!(export_tables(&mut src.ctx, &dump_path, &["t1".into()], false, false).is_err());

        let mut dst = fresh_context("different password");
        content::create_table(&mut dst.ctx, "t1", false).unwrap();
        content::create_table(&mut dst.ctx, "t2", true).unwrap();
        import_tables(&mut dst.ctx, &dump_path, &[], true).unwrap();

        assert_eq!(content::count_records(&mut dst.ctx, "t1").unwrap(), 3);
        assert_eq!(
            content::get_record(&mut dst.ctx, "t1", "k2").unwrap(),
            Some(attribs(&[("login", "l"), ("password", "p2")]))
        );
        assert_eq!(
            content::get_record(&mut dst.ctx, "t2", "only").unwrap(),
            Some(attribs(&[("v", "1")]))
        );
    }

    #[test]
    fn test_import_refuses_nonempty_table() {
        let mut src = fresh_context("hello");
        content::create_table(&mut src.ctx, "t1", true).unwrap();
        content::insert_record(&mut src.ctx, "t1", "k", &attribs(&[("v", "1")])).unwrap();
        let dump_path = src.dir.path().join("dump.db");
        export_tables(&mut src.ctx, &dump_path, &["t1".into()], false, false).unwrap();

        let mut dst = fresh_context("other");
        content::create_table(&mut dst.ctx, "t1", true).unwrap();
        content::insert_record(&mut dst.ctx, "t1", "existing", &attribs(&[("v", "2")])).unwrap();
        match import_tables(&mut dst.ctx, &dump_path, &["t1".into()], false) {
            Err(Error::Storage(message)) => assert!(message.contains("not empty")),
            other => panic!("expected storage error, got {other:?}"),
        }
        // the failed import leaves the destination untouched
        assert_eq!(content::count_records(&mut dst.ctx, "t1").unwrap(), 1);
    }

    #[test]
    fn test_import_requires_dump_table_and_target() {
        let mut src = fresh_context("hello");
        content::create_table(&mut src.ctx, "t1", false).unwrap();
        let dump_path = src.dir.path().join("dump.db");
        export_tables(&mut src.ctx, &dump_path, &["t1".into()], false, false).unwrap();

        let mut dst = fresh_context("other");
        // table exists in dump but was never created in the target database
        assert!(import_tables(&mut dst.ctx, &dump_path, &["t1".into()], false).is_err());
        // table missing from the dump
        content::create_table(&mut dst.ctx, "t9", false).unwrap();
        assert!(import_tables(&mut dst.ctx, &dump_path, &["t9".into()], false).is_err());
    }

    #[test]
    fn test_export_rewrite_replaces_dump() {
        let mut src = fresh_context("hello");
        content::create_table(&mut src.ctx, "t1", false).unwrap();
        let dump_path = src.dir.path().join("dump.db");
        export_tables(&mut src.ctx, &dump_path, &["t1".into()], false, false).unwrap();
        assert!(export_tables(&mut src.ctx, &dump_path, &["t1".into()], false, false).is_err());
        export_tables(&mut src.ctx, &dump_path, &["t1".into()], true, false).unwrap();
    }
}
