//! Paged migration of both token tables.
//!
//! Each phase loops count → fetch page → transform and commit each record →
//! re-count until no unmigrated ids remain. The unmigrated count is taken
//! from the store after every page, so a rerun after a crash simply picks up
//! the records whose ids still have the legacy shape.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{MigrationError, Result, StoreError};
use crate::key::TokenKeyGenerator;
use crate::record::{
    is_migrated_id, AccessTokenRecord, AccessTokenUpdate, RefreshTokenRecord, RefreshTokenUpdate,
    TokenKind, TokenRecord,
};
use crate::store::MigrationStore;
use crate::transform::{
    RecordTransformer, TransformPolicy, TransformedAccessToken, TransformedRefreshToken,
};
use crate::types::CodecRegistry;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub remove_refresh_tokens: bool,
    pub serialize_new_token_values: bool,
    pub strict_pairing: bool,
    pub page_size: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            remove_refresh_tokens: false,
            serialize_new_token_values: false,
            strict_pairing: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MigrationOptions {
    /// # Errors
    /// Returns [`MigrationError::Config`] for a zero page size.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MigrationError::Config("page size must be at least 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn policy(&self) -> TransformPolicy {
        TransformPolicy {
            remove_refresh_tokens: self.remove_refresh_tokens,
            serialize_new_token_values: self.serialize_new_token_values,
            strict_pairing: self.strict_pairing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Counting,
    Paging,
    Transforming,
    Committing,
    Done,
}

impl PhaseState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counting => "counting",
            Self::Paging => "paging",
            Self::Transforming => "transforming",
            Self::Committing => "committing",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub kind: TokenKind,
    /// Rows were deleted in bulk instead of migrated.
    pub removed: bool,
    pub initial_unmigrated: usize,
    pub migrated: usize,
    pub cleared: usize,
    pub pages: usize,
    pub pairing_mismatches: usize,
}

impl PhaseSummary {
    fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            removed: false,
            initial_unmigrated: 0,
            migrated: 0,
            cleared: 0,
            pages: 0,
            pairing_mismatches: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub access_tokens: PhaseSummary,
    pub refresh_tokens: PhaseSummary,
}

/// Per-kind hooks for the shared paging loop.
trait Phase {
    type Record: TokenRecord;
    type Output;
    const KIND: TokenKind;

    fn count_unmigrated<S: MigrationStore>(store: &S) -> Result<usize, StoreError>;

    fn fetch<S: MigrationStore>(store: &S, limit: usize) -> Result<Vec<Self::Record>, StoreError>;

    fn transform<K: TokenKeyGenerator + ?Sized>(
        transformer: &RecordTransformer<'_, K>,
        record: &Self::Record,
    ) -> Result<Self::Output>;

    fn new_token_id(output: &Self::Output) -> &str;

    fn pairing_mismatch(_output: &Self::Output) -> bool {
        false
    }

    fn commit<S: MigrationStore>(
        store: &mut S,
        record: &Self::Record,
        output: &Self::Output,
    ) -> Result<(), StoreError>;
}

struct AccessTokens;

impl Phase for AccessTokens {
    type Record = AccessTokenRecord;
    type Output = TransformedAccessToken;
    const KIND: TokenKind = TokenKind::Access;

    fn count_unmigrated<S: MigrationStore>(store: &S) -> Result<usize, StoreError> {
        store.count_unmigrated_access_tokens()
    }

    fn fetch<S: MigrationStore>(store: &S, limit: usize) -> Result<Vec<Self::Record>, StoreError> {
        store.unmigrated_access_token_records(limit)
    }

    fn transform<K: TokenKeyGenerator + ?Sized>(
        transformer: &RecordTransformer<'_, K>,
        record: &Self::Record,
    ) -> Result<Self::Output> {
        transformer.transform_access_token(record)
    }

    fn new_token_id(output: &Self::Output) -> &str {
        &output.new_token_id
    }

    fn pairing_mismatch(output: &Self::Output) -> bool {
        output.pairing_mismatch
    }

    fn commit<S: MigrationStore>(
        store: &mut S,
        record: &Self::Record,
        output: &Self::Output,
    ) -> Result<(), StoreError> {
        store.update_access_token(AccessTokenUpdate {
            old_token_id: &record.token_id,
            new_token_id: &output.new_token_id,
            new_refresh_token: output.new_refresh_token.as_deref(),
            token: &output.token,
            authentication: &output.authentication,
        })
    }
}

struct RefreshTokens;

impl Phase for RefreshTokens {
    type Record = RefreshTokenRecord;
    type Output = TransformedRefreshToken;
    const KIND: TokenKind = TokenKind::Refresh;

    fn count_unmigrated<S: MigrationStore>(store: &S) -> Result<usize, StoreError> {
        store.count_unmigrated_refresh_tokens()
    }

    fn fetch<S: MigrationStore>(store: &S, limit: usize) -> Result<Vec<Self::Record>, StoreError> {
        store.unmigrated_refresh_token_records(limit)
    }

    fn transform<K: TokenKeyGenerator + ?Sized>(
        transformer: &RecordTransformer<'_, K>,
        record: &Self::Record,
    ) -> Result<Self::Output> {
        transformer.transform_refresh_token(record)
    }

    fn new_token_id(output: &Self::Output) -> &str {
        &output.new_token_id
    }

    fn commit<S: MigrationStore>(
        store: &mut S,
        record: &Self::Record,
        output: &Self::Output,
    ) -> Result<(), StoreError> {
        store.update_refresh_token(RefreshTokenUpdate {
            old_token_id: &record.token_id,
            new_token_id: &output.new_token_id,
            token: &output.token,
            authentication: &output.authentication,
        })
    }
}

fn enter(state: &mut PhaseState, next: PhaseState, kind: TokenKind) {
    debug!(kind = kind.as_str(), from = state.as_str(), to = next.as_str(), "phase state");
    *state = next;
}

/// Runs the access token phase, then the refresh token phase, against one store.
pub struct Migrator<S, K> {
    store: S,
    keys: K,
    registry: CodecRegistry,
    options: MigrationOptions,
    state: PhaseState,
}

impl<S, K> Migrator<S, K>
where
    S: MigrationStore,
    K: TokenKeyGenerator,
{
    /// # Errors
    /// Returns [`MigrationError::Config`] for invalid options.
    pub fn new(store: S, keys: K, registry: CodecRegistry, options: MigrationOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { store, keys, registry, options, state: PhaseState::Counting })
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// State of the most recent phase; where it stopped when a run failed.
    #[must_use]
    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Access tokens first, then refresh tokens. The first error aborts the
    /// run; records committed before it stay committed.
    ///
    /// # Errors
    /// Any error from either phase.
    pub fn migrate_data(&mut self) -> Result<MigrationSummary> {
        let access_tokens = self.migrate_access_tokens()?;
        let refresh_tokens = self.migrate_refresh_tokens()?;
        Ok(MigrationSummary { access_tokens, refresh_tokens })
    }

    /// # Errors
    /// Store, transform and stall errors.
    pub fn migrate_access_tokens(&mut self) -> Result<PhaseSummary> {
        self.run_phase::<AccessTokens>()
    }

    /// With the removal policy every refresh token row is deleted in one
    /// step; otherwise refresh tokens are migrated page by page.
    ///
    /// # Errors
    /// Store, transform and stall errors.
    pub fn migrate_refresh_tokens(&mut self) -> Result<PhaseSummary> {
        if !self.options.remove_refresh_tokens {
            return self.run_phase::<RefreshTokens>();
        }

        let kind = TokenKind::Refresh;
        let mut summary = PhaseSummary { removed: true, ..PhaseSummary::new(kind) };
        enter(&mut self.state, PhaseState::Counting, kind);
        summary.initial_unmigrated = self.store.count_unmigrated_refresh_tokens()?;
        info!(count = summary.initial_unmigrated, "clearing refresh tokens");

        enter(&mut self.state, PhaseState::Committing, kind);
        summary.cleared = self.store.clear_refresh_tokens()?;
        enter(&mut self.state, PhaseState::Done, kind);
        info!(cleared = summary.cleared, "finished clearing refresh tokens");
        Ok(summary)
    }

    fn run_phase<P: Phase>(&mut self) -> Result<PhaseSummary> {
        let kind = P::KIND;
        let transformer = RecordTransformer::new(&self.registry, &self.keys, self.options.policy());
        let mut summary = PhaseSummary::new(kind);

        enter(&mut self.state, PhaseState::Counting, kind);
        let mut remaining = P::count_unmigrated(&self.store)?;
        summary.initial_unmigrated = remaining;
        info!(kind = kind.as_str(), count = remaining, "starting token migration");

        while remaining > 0 {
            enter(&mut self.state, PhaseState::Paging, kind);
            let page = P::fetch(&self.store, self.options.page_size)?;
            if page.is_empty() {
                return Err(MigrationError::Stalled { kind: kind.as_str(), remaining });
            }
            summary.pages += 1;

            for record in &page {
                let old_token_id = record.token_id();
                info!(kind = kind.as_str(), token_id = old_token_id, "migrating token");

                enter(&mut self.state, PhaseState::Transforming, kind);
                let output = P::transform(&transformer, record)?;
                let new_token_id = P::new_token_id(&output);
                if !is_migrated_id(new_token_id) {
                    return Err(MigrationError::UnmigratedKeyShape {
                        token_id: old_token_id.to_string(),
                        key: new_token_id.to_string(),
                    });
                }

                enter(&mut self.state, PhaseState::Committing, kind);
                P::commit(&mut self.store, record, &output)?;
                if P::pairing_mismatch(&output) {
                    summary.pairing_mismatches += 1;
                }
                summary.migrated += 1;
                info!(kind = kind.as_str(), token_id = old_token_id, new_token_id, "migrated token");
            }

            enter(&mut self.state, PhaseState::Counting, kind);
            remaining = P::count_unmigrated(&self.store)?;
        }

        enter(&mut self.state, PhaseState::Done, kind);
        info!(
            kind = kind.as_str(),
            migrated = summary.migrated,
            pages = summary.pages,
            "finished token migration"
        );
        Ok(summary)
    }
}
