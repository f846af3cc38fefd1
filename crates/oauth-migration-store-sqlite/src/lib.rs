use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use oauth_migration_core::{
    AccessTokenRecord, AccessTokenUpdate, MigrationStore, RefreshTokenRecord, RefreshTokenUpdate,
    StoreError, TableNames,
};
use rusqlite::{params, Connection, DatabaseName, Row};

/// Matches ids that still carry the legacy `-` delimiter.
const UNMIGRATED_PREDICATE: &str = "token_id LIKE '%-%'";
const MIGRATED_PREDICATE: &str = "token_id NOT LIKE '%-%'";

const ACCESS_TOKEN_COLUMNS: &str =
    "token_id, token, authentication_id, user_name, client_id, authentication, refresh_token";
const REFRESH_TOKEN_COLUMNS: &str = "token_id, token, authentication";

/// [`MigrationStore`] over the two OAuth2 token tables of a `SQLite` database.
pub struct SqliteMigrationStore {
    conn: Connection,
    tables: TableNames,
}

impl SqliteMigrationStore {
    /// Open a `SQLite` token database and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path, tables: TableNames) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        tracing::debug!(
            path = %path.display(),
            access_token_table = tables.access_token(),
            refresh_token_table = tables.refresh_token(),
            "opened token database"
        );
        Ok(Self { conn, tables })
    }

    #[must_use]
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Create both token tables with the standard OAuth2 token store layout.
    ///
    /// # Errors
    /// Returns an error when the DDL fails.
    pub fn create_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {access} (
               token_id VARCHAR(256) PRIMARY KEY,
               token BLOB,
               authentication_id VARCHAR(256),
               user_name VARCHAR(256),
               client_id VARCHAR(256),
               authentication BLOB,
               refresh_token VARCHAR(256)
             );
             CREATE TABLE IF NOT EXISTS {refresh} (
               token_id VARCHAR(256) PRIMARY KEY,
               token BLOB,
               authentication BLOB
             );",
            access = self.tables.access_token(),
            refresh = self.tables.refresh_token(),
        );
        self.conn.execute_batch(&sql).context("failed to create token tables")
    }

    /// # Errors
    /// Returns an error when the insert fails, including on a duplicate id.
    pub fn insert_access_token(&mut self, record: &AccessTokenRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {}({ACCESS_TOKEN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            self.tables.access_token()
        );
        self.conn
            .execute(
                &sql,
                params![
                    record.token_id,
                    record.token,
                    record.authentication_id,
                    record.user_name,
                    record.client_id,
                    record.authentication,
                    record.refresh_token,
                ],
            )
            .with_context(|| format!("failed to insert access token {}", record.token_id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the insert fails, including on a duplicate id.
    pub fn insert_refresh_token(&mut self, record: &RefreshTokenRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {}({REFRESH_TOKEN_COLUMNS}) VALUES (?1, ?2, ?3)",
            self.tables.refresh_token()
        );
        self.conn
            .execute(&sql, params![record.token_id, record.token, record.authentication])
            .with_context(|| format!("failed to insert refresh token {}", record.token_id))?;
        Ok(())
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    fn count(&self, table: &str, predicate: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(token_id) FROM {table} WHERE {predicate}");
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))?;
        usize::try_from(count).map_err(|_| anyhow!("negative row count {count} in {table}"))
    }

    fn select<T>(
        &self,
        table: &str,
        columns: &str,
        predicate: &str,
        limit: usize,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let limit = i64::try_from(limit).context("page limit does not fit in a sqlite integer")?;
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE {predicate} ORDER BY token_id LIMIT ?1"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare token query on {table}"))?;
        let rows = stmt.query_map(params![limit], map)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.with_context(|| format!("failed to read token row from {table}"))?);
        }
        Ok(records)
    }

    /// Run one keyed update in its own transaction, returning the rows changed.
    /// Nothing is committed when no row matched.
    fn update(&mut self, table: &str, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = tx
            .execute(sql, params)
            .with_context(|| format!("failed to update token row in {table}"))?;
        if changed > 0 {
            tx.commit().context("failed to commit token update")?;
        }
        Ok(changed)
    }

    fn clear(&mut self, table: &str) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let deleted = tx
            .execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("failed to clear {table}"))?;
        tx.commit().context("failed to commit refresh token removal")?;
        Ok(deleted)
    }
}

fn access_token_row(row: &Row<'_>) -> rusqlite::Result<AccessTokenRecord> {
    Ok(AccessTokenRecord {
        token_id: row.get(0)?,
        token: row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
        authentication_id: row.get(2)?,
        user_name: row.get(3)?,
        client_id: row.get(4)?,
        authentication: row.get::<_, Option<Vec<u8>>>(5)?.unwrap_or_default(),
        refresh_token: row.get(6)?,
    })
}

fn refresh_token_row(row: &Row<'_>) -> rusqlite::Result<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        token_id: row.get(0)?,
        token: row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
        authentication: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
    })
}

fn backend(err: &anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

fn row_not_found(table: &str, token_id: &str) -> StoreError {
    StoreError::RowNotFound { table: table.to_string(), token_id: token_id.to_string() }
}

impl MigrationStore for SqliteMigrationStore {
    fn count_unmigrated_access_tokens(&self) -> Result<usize, StoreError> {
        self.count(self.tables.access_token(), UNMIGRATED_PREDICATE).map_err(|err| backend(&err))
    }

    fn count_migrated_access_tokens(&self) -> Result<usize, StoreError> {
        self.count(self.tables.access_token(), MIGRATED_PREDICATE).map_err(|err| backend(&err))
    }

    fn count_unmigrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        self.count(self.tables.refresh_token(), UNMIGRATED_PREDICATE).map_err(|err| backend(&err))
    }

    fn count_migrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        self.count(self.tables.refresh_token(), MIGRATED_PREDICATE).map_err(|err| backend(&err))
    }

    fn unmigrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        self.select(
            self.tables.access_token(),
            ACCESS_TOKEN_COLUMNS,
            UNMIGRATED_PREDICATE,
            limit,
            access_token_row,
        )
        .map_err(|err| backend(&err))
    }

    fn migrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        self.select(
            self.tables.access_token(),
            ACCESS_TOKEN_COLUMNS,
            MIGRATED_PREDICATE,
            limit,
            access_token_row,
        )
        .map_err(|err| backend(&err))
    }

    fn unmigrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        self.select(
            self.tables.refresh_token(),
            REFRESH_TOKEN_COLUMNS,
            UNMIGRATED_PREDICATE,
            limit,
            refresh_token_row,
        )
        .map_err(|err| backend(&err))
    }

    fn migrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        self.select(
            self.tables.refresh_token(),
            REFRESH_TOKEN_COLUMNS,
            MIGRATED_PREDICATE,
            limit,
            refresh_token_row,
        )
        .map_err(|err| backend(&err))
    }

    fn clear_refresh_tokens(&mut self) -> Result<usize, StoreError> {
        let table = self.tables.refresh_token().to_string();
        self.clear(&table).map_err(|err| backend(&err))
    }

    fn update_access_token(&mut self, update: AccessTokenUpdate<'_>) -> Result<(), StoreError> {
        let table = self.tables.access_token().to_string();
        let sql = format!(
            "UPDATE {table} SET token_id = ?1, refresh_token = ?2, token = ?3, authentication = ?4
             WHERE token_id = ?5"
        );
        let changed = self
            .update(
                &table,
                &sql,
                params![
                    update.new_token_id,
                    update.new_refresh_token,
                    update.token,
                    update.authentication,
                    update.old_token_id,
                ],
            )
            .map_err(|err| backend(&err))?;
        if changed == 0 {
            return Err(row_not_found(&table, update.old_token_id));
        }
        Ok(())
    }

    fn update_refresh_token(&mut self, update: RefreshTokenUpdate<'_>) -> Result<(), StoreError> {
        let table = self.tables.refresh_token().to_string();
        let sql = format!(
            "UPDATE {table} SET token_id = ?1, token = ?2, authentication = ?3 WHERE token_id = ?4"
        );
        let changed = self
            .update(
                &table,
                &sql,
                params![update.new_token_id, update.token, update.authentication, update.old_token_id],
            )
            .map_err(|err| backend(&err))?;
        if changed == 0 {
            return Err(row_not_found(&table, update.old_token_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(tables: TableNames) -> SqliteMigrationStore {
        let store = SqliteMigrationStore::open(Path::new(":memory:"), tables)
            .unwrap_or_else(|err| panic!("failed to open in-memory store: {err}"));
        store.create_schema().unwrap_or_else(|err| panic!("failed to create schema: {err}"));
        store
    }

    fn access(token_id: &str, refresh_token: Option<&str>) -> AccessTokenRecord {
        AccessTokenRecord {
            token_id: token_id.to_string(),
            token: format!("token:{token_id}").into_bytes(),
            authentication_id: Some(format!("auth:{token_id}")),
            user_name: Some("alice".to_string()),
            client_id: Some("mobile-app".to_string()),
            authentication: b"auth".to_vec(),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    fn refresh(token_id: &str) -> RefreshTokenRecord {
        RefreshTokenRecord {
            token_id: token_id.to_string(),
            token: format!("token:{token_id}").into_bytes(),
            authentication: b"auth".to_vec(),
        }
    }

    fn seeded() -> Result<SqliteMigrationStore> {
        let mut store = store_with(TableNames::default());
        store.insert_access_token(&access("b-2", Some("r-2")))?;
        store.insert_access_token(&access("a-1", Some("r-1")))?;
        store.insert_access_token(&access("c0ffee", None))?;
        store.insert_refresh_token(&refresh("r-1"))?;
        store.insert_refresh_token(&refresh("r-2"))?;
        Ok(store)
    }

    #[test]
    fn counts_split_on_the_id_shape() -> Result<()> {
        let store = seeded()?;
        assert_eq!(store.count_unmigrated_access_tokens()?, 2);
        assert_eq!(store.count_migrated_access_tokens()?, 1);
        assert_eq!(store.count_unmigrated_refresh_tokens()?, 2);
        assert_eq!(store.count_migrated_refresh_tokens()?, 0);
        Ok(())
    }

    #[test]
    fn reads_are_ordered_and_limited() -> Result<()> {
        let store = seeded()?;
        let page = store.unmigrated_access_token_records(1)?;
        assert_eq!(page, vec![access("a-1", Some("r-1"))]);
        assert_eq!(store.unmigrated_access_token_records(5)?.len(), 2);
        assert!(store.unmigrated_access_token_records(0)?.is_empty());
        assert_eq!(store.migrated_access_token_records(2)?, vec![access("c0ffee", None)]);
        assert_eq!(store.unmigrated_refresh_token_records(1)?, vec![refresh("r-1")]);
        Ok(())
    }

    #[test]
    fn update_rewrites_the_row_atomically() -> Result<()> {
        let mut store = seeded()?;
        store.update_access_token(AccessTokenUpdate {
            old_token_id: "a-1",
            new_token_id: "aa11",
            new_refresh_token: None,
            token: b"new-token",
            authentication: b"new-auth",
        })?;

        let migrated = store.migrated_access_token_records(10)?;
        let row = migrated
            .iter()
            .find(|record| record.token_id == "aa11")
            .unwrap_or_else(|| panic!("updated row should be migrated"));
        assert_eq!(row.refresh_token, None);
        assert_eq!(row.token, b"new-token");
        assert_eq!(row.authentication, b"new-auth");
        assert_eq!(row.user_name.as_deref(), Some("alice"));
        assert_eq!(store.count_unmigrated_access_tokens()?, 1);

        store.update_refresh_token(RefreshTokenUpdate {
            old_token_id: "r-1",
            new_token_id: "ff11",
            token: b"t",
            authentication: b"a",
        })?;
        assert_eq!(store.count_migrated_refresh_tokens()?, 1);
        Ok(())
    }

    #[test]
    fn updating_a_missing_row_is_row_not_found() -> Result<()> {
        let mut store = seeded()?;
        let err = store
            .update_access_token(AccessTokenUpdate {
                old_token_id: "missing-1",
                new_token_id: "abcd",
                new_refresh_token: None,
                token: b"t",
                authentication: b"a",
            })
            .err();
        assert!(
            matches!(&err, Some(StoreError::RowNotFound { table, token_id })
                if table == "oauth_access_token" && token_id == "missing-1"),
            "got {err:?}"
        );
        Ok(())
    }

    #[test]
    fn colliding_new_id_is_a_backend_error_and_leaves_the_row() -> Result<()> {
        let mut store = seeded()?;
        let err = store
            .update_access_token(AccessTokenUpdate {
                old_token_id: "a-1",
                new_token_id: "c0ffee",
                new_refresh_token: None,
                token: b"t",
                authentication: b"a",
            })
            .err();
        assert!(matches!(err, Some(StoreError::Backend(_))), "got {err:?}");
        assert_eq!(store.count_unmigrated_access_tokens()?, 2);
        Ok(())
    }

    #[test]
    fn clear_deletes_all_refresh_tokens() -> Result<()> {
        let mut store = seeded()?;
        assert_eq!(store.clear_refresh_tokens()?, 2);
        assert_eq!(store.count_unmigrated_refresh_tokens()?, 0);
        assert_eq!(store.count_unmigrated_access_tokens()?, 2);
        Ok(())
    }

    #[test]
    fn custom_table_names_are_used() -> Result<()> {
        let tables = TableNames::new("legacy_access", "legacy_refresh")?;
        let mut store = store_with(tables);
        store.insert_access_token(&access("x-1", None))?;
        store.insert_refresh_token(&refresh("y-1"))?;
        assert_eq!(store.count_unmigrated_access_tokens()?, 1);
        assert_eq!(store.count_unmigrated_refresh_tokens()?, 1);
        assert_eq!(store.tables().access_token(), "legacy_access");
        Ok(())
    }

    #[test]
    fn missing_tables_surface_as_backend_errors() {
        let store = SqliteMigrationStore::open(Path::new(":memory:"), TableNames::default())
            .unwrap_or_else(|err| panic!("failed to open in-memory store: {err}"));
        let err = store.count_unmigrated_access_tokens().err();
        assert!(
            matches!(&err, Some(StoreError::Backend(msg)) if msg.contains("oauth_access_token")),
            "got {err:?}"
        );
    }

    #[test]
    fn backup_copies_the_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.db");
        let mut store = SqliteMigrationStore::open(&path, TableNames::default())?;
        store.create_schema()?;
        store.insert_access_token(&access("a-1", None))?;

        let backup_path = dir.path().join("backups/tokens.bak");
        store.backup_database(&backup_path)?;

        let restored = SqliteMigrationStore::open(&backup_path, TableNames::default())?;
        assert_eq!(restored.count_unmigrated_access_tokens()?, 1);
        Ok(())
    }
}
