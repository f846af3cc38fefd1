use std::collections::BTreeMap;

use crate::config::TableNames;
use crate::error::StoreError;
use crate::record::{
    is_migrated_id, AccessTokenRecord, AccessTokenUpdate, RefreshTokenRecord, RefreshTokenUpdate,
};

/// Persistence boundary of a migration run.
///
/// Record reads return at most `limit` rows ordered by `token_id`; a limit of
/// zero returns nothing. Each update rewrites one row keyed by its old id as
/// a single atomic unit.
pub trait MigrationStore {
    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn count_unmigrated_access_tokens(&self) -> Result<usize, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn count_migrated_access_tokens(&self) -> Result<usize, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn count_unmigrated_refresh_tokens(&self) -> Result<usize, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn count_migrated_refresh_tokens(&self) -> Result<usize, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn unmigrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn migrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn unmigrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Backend`] when the backend query fails.
    fn migrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Delete every refresh token row, returning how many were removed.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] when the delete fails.
    fn clear_refresh_tokens(&mut self) -> Result<usize, StoreError>;

    /// # Errors
    /// Returns [`StoreError::RowNotFound`] when no row has the old id.
    fn update_access_token(&mut self, update: AccessTokenUpdate<'_>) -> Result<(), StoreError>;

    /// # Errors
    /// Returns [`StoreError::RowNotFound`] when no row has the old id.
    fn update_refresh_token(&mut self, update: RefreshTokenUpdate<'_>) -> Result<(), StoreError>;
}

impl<S: MigrationStore + ?Sized> MigrationStore for &mut S {
    fn count_unmigrated_access_tokens(&self) -> Result<usize, StoreError> {
        (**self).count_unmigrated_access_tokens()
    }

    fn count_migrated_access_tokens(&self) -> Result<usize, StoreError> {
        (**self).count_migrated_access_tokens()
    }

    fn count_unmigrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        (**self).count_unmigrated_refresh_tokens()
    }

    fn count_migrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        (**self).count_migrated_refresh_tokens()
    }

    fn unmigrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        (**self).unmigrated_access_token_records(limit)
    }

    fn migrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        (**self).migrated_access_token_records(limit)
    }

    fn unmigrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        (**self).unmigrated_refresh_token_records(limit)
    }

    fn migrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        (**self).migrated_refresh_token_records(limit)
    }

    fn clear_refresh_tokens(&mut self) -> Result<usize, StoreError> {
        (**self).clear_refresh_tokens()
    }

    fn update_access_token(&mut self, update: AccessTokenUpdate<'_>) -> Result<(), StoreError> {
        (**self).update_access_token(update)
    }

    fn update_refresh_token(&mut self, update: RefreshTokenUpdate<'_>) -> Result<(), StoreError> {
        (**self).update_refresh_token(update)
    }
}

/// Map-backed store with the same id-shape semantics as the SQL backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMigrationStore {
    tables: TableNames,
    access_tokens: BTreeMap<String, AccessTokenRecord>,
    refresh_tokens: BTreeMap<String, RefreshTokenRecord>,
}

impl InMemoryMigrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`StoreError::Backend`] when the id is already present.
    pub fn insert_access_token(&mut self, record: AccessTokenRecord) -> Result<(), StoreError> {
        if self.access_tokens.contains_key(&record.token_id) {
            return Err(duplicate(self.tables.access_token(), &record.token_id));
        }
        self.access_tokens.insert(record.token_id.clone(), record);
        Ok(())
    }

    /// # Errors
    /// Returns [`StoreError::Backend`] when the id is already present.
    pub fn insert_refresh_token(&mut self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        if self.refresh_tokens.contains_key(&record.token_id) {
            return Err(duplicate(self.tables.refresh_token(), &record.token_id));
        }
        self.refresh_tokens.insert(record.token_id.clone(), record);
        Ok(())
    }

    #[must_use]
    pub fn access_token(&self, token_id: &str) -> Option<&AccessTokenRecord> {
        self.access_tokens.get(token_id)
    }

    #[must_use]
    pub fn refresh_token(&self, token_id: &str) -> Option<&RefreshTokenRecord> {
        self.refresh_tokens.get(token_id)
    }

    pub fn access_tokens(&self) -> impl Iterator<Item = &AccessTokenRecord> {
        self.access_tokens.values()
    }

    pub fn refresh_tokens(&self) -> impl Iterator<Item = &RefreshTokenRecord> {
        self.refresh_tokens.values()
    }
}

fn duplicate(table: &str, token_id: &str) -> StoreError {
    StoreError::Backend(format!("duplicate token_id {token_id} in {table}"))
}

fn select<'a, R: 'a>(
    rows: impl Iterator<Item = (&'a String, &'a R)>,
    migrated: bool,
    limit: usize,
) -> Vec<R>
where
    R: Clone,
{
    rows.filter(|(token_id, _)| is_migrated_id(token_id) == migrated)
        .take(limit)
        .map(|(_, record)| record.clone())
        .collect()
}

fn count<'a>(ids: impl Iterator<Item = &'a String>, migrated: bool) -> usize {
    ids.filter(|token_id| is_migrated_id(token_id) == migrated).count()
}

/// Move a row from `old_id` to `new_id`, refusing to overwrite another row.
fn rekey<R>(
    rows: &mut BTreeMap<String, R>,
    table: &str,
    old_id: &str,
    new_id: &str,
) -> Result<R, StoreError> {
    if old_id != new_id && rows.contains_key(new_id) {
        return Err(duplicate(table, new_id));
    }
    rows.remove(old_id).ok_or_else(|| StoreError::RowNotFound {
        table: table.to_string(),
        token_id: old_id.to_string(),
    })
}

impl MigrationStore for InMemoryMigrationStore {
    fn count_unmigrated_access_tokens(&self) -> Result<usize, StoreError> {
        Ok(count(self.access_tokens.keys(), false))
    }

    fn count_migrated_access_tokens(&self) -> Result<usize, StoreError> {
        Ok(count(self.access_tokens.keys(), true))
    }

    fn count_unmigrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        Ok(count(self.refresh_tokens.keys(), false))
    }

    fn count_migrated_refresh_tokens(&self) -> Result<usize, StoreError> {
        Ok(count(self.refresh_tokens.keys(), true))
    }

    fn unmigrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        Ok(select(self.access_tokens.iter(), false, limit))
    }

    fn migrated_access_token_records(&self, limit: usize) -> Result<Vec<AccessTokenRecord>, StoreError> {
        Ok(select(self.access_tokens.iter(), true, limit))
    }

    fn unmigrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        Ok(select(self.refresh_tokens.iter(), false, limit))
    }

    fn migrated_refresh_token_records(&self, limit: usize) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        Ok(select(self.refresh_tokens.iter(), true, limit))
    }

    fn clear_refresh_tokens(&mut self) -> Result<usize, StoreError> {
        let cleared = self.refresh_tokens.len();
        self.refresh_tokens.clear();
        Ok(cleared)
    }

    fn update_access_token(&mut self, update: AccessTokenUpdate<'_>) -> Result<(), StoreError> {
        let mut record = rekey(
            &mut self.access_tokens,
            self.tables.access_token(),
            update.old_token_id,
            update.new_token_id,
        )?;
        record.token_id = update.new_token_id.to_string();
        record.refresh_token = update.new_refresh_token.map(str::to_string);
        record.token = update.token.to_vec();
        record.authentication = update.authentication.to_vec();
        self.access_tokens.insert(record.token_id.clone(), record);
        Ok(())
    }

    fn update_refresh_token(&mut self, update: RefreshTokenUpdate<'_>) -> Result<(), StoreError> {
        let mut record = rekey(
            &mut self.refresh_tokens,
            self.tables.refresh_token(),
            update.old_token_id,
            update.new_token_id,
        )?;
        record.token_id = update.new_token_id.to_string();
        record.token = update.token.to_vec();
        record.authentication = update.authentication.to_vec();
        self.refresh_tokens.insert(record.token_id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(token_id: &str) -> AccessTokenRecord {
        AccessTokenRecord { token_id: token_id.to_string(), ..AccessTokenRecord::default() }
    }

    fn refresh(token_id: &str) -> RefreshTokenRecord {
        RefreshTokenRecord { token_id: token_id.to_string(), ..RefreshTokenRecord::default() }
    }

    fn seeded() -> InMemoryMigrationStore {
        let mut store = InMemoryMigrationStore::new();
        for token_id in ["c-3", "a-1", "b-2", "migrated"] {
            store
                .insert_access_token(access(token_id))
                .unwrap_or_else(|err| panic!("seed {token_id}: {err}"));
        }
        store.insert_refresh_token(refresh("r-1")).unwrap_or_else(|err| panic!("seed: {err}"));
        store
    }

    #[test]
    fn counts_and_reads_follow_the_id_shape() -> Result<(), StoreError> {
        let store = seeded();
        assert_eq!(store.count_unmigrated_access_tokens()?, 3);
        assert_eq!(store.count_migrated_access_tokens()?, 1);

        let page: Vec<_> = store
            .unmigrated_access_token_records(2)?
            .into_iter()
            .map(|record| record.token_id)
            .collect();
        assert_eq!(page, vec!["a-1", "b-2"]);
        assert!(store.unmigrated_access_token_records(0)?.is_empty());
        assert_eq!(store.migrated_access_token_records(10)?.len(), 1);
        Ok(())
    }

    #[test]
    fn update_rekeys_the_row() -> Result<(), StoreError> {
        let mut store = seeded();
        store.update_access_token(AccessTokenUpdate {
            old_token_id: "a-1",
            new_token_id: "aa11",
            new_refresh_token: Some("ff00"),
            token: b"t",
            authentication: b"a",
        })?;

        assert!(store.access_token("a-1").is_none());
        let record = store.access_token("aa11").unwrap_or_else(|| panic!("row should move"));
        assert_eq!(record.refresh_token.as_deref(), Some("ff00"));
        assert_eq!(record.user_name, None);
        assert_eq!(store.count_migrated_access_tokens()?, 2);
        Ok(())
    }

    #[test]
    fn updating_a_missing_row_is_row_not_found() {
        let mut store = seeded();
        let err = store
            .update_refresh_token(RefreshTokenUpdate {
                old_token_id: "nope-1",
                new_token_id: "abcd",
                token: b"t",
                authentication: b"a",
            })
            .err();
        assert!(
            matches!(&err, Some(StoreError::RowNotFound { table, token_id })
                if table == "oauth_refresh_token" && token_id == "nope-1"),
            "got {err:?}"
        );
    }

    #[test]
    fn update_never_overwrites_another_row() {
        let mut store = seeded();
        let err = store
            .update_access_token(AccessTokenUpdate {
                old_token_id: "a-1",
                new_token_id: "migrated",
                new_refresh_token: None,
                token: b"t",
                authentication: b"a",
            })
            .err();
        assert!(matches!(err, Some(StoreError::Backend(_))), "got {err:?}");
        assert!(store.access_token("a-1").is_some());
    }

    #[test]
    fn clear_removes_every_refresh_token() -> Result<(), StoreError> {
        let mut store = seeded();
        assert_eq!(store.clear_refresh_tokens()?, 1);
        assert_eq!(store.count_unmigrated_refresh_tokens()?, 0);
        assert_eq!(store.count_migrated_refresh_tokens()?, 0);
        Ok(())
    }
}
