use thiserror::Error;

/// Failures reported by a [`crate::MigrationStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no row in {table} with token_id {token_id}")]
    RowNotFound { table: String, token_id: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Every way a migration run can fail. All variants are fatal for the run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("decode failure: {0}")]
    DecodeFailure(String),
    #[error("class {class} does not resolve in the {context} type context")]
    UnresolvedType { class: String, context: String },
    #[error(
        "class {class} is incompatible with the {context} type context: stream uid {stream_uid}, local uid {local_uid}"
    )]
    IncompatibleType { class: String, context: String, stream_uid: i64, local_uid: i64 },
    #[error("class {class} does not expose the `{capability}` capability")]
    MissingCapability { class: String, capability: String },
    #[error(
        "cannot rewrite the token value of class {class}: it has neither a settable value nor a usable constructor"
    )]
    NoReconstructionPath { class: String },
    #[error(
        "access token {token_id}: embedded refresh token hashes to {embedded_key} but the refresh_token column hashes to {column_key}"
    )]
    PairingMismatch { token_id: String, embedded_key: String, column_key: String },
    #[error("generated key {key} for token {token_id} still has the unmigrated shape")]
    UnmigratedKeyShape { token_id: String, key: String },
    #[error("{kind} migration stalled: {remaining} unmigrated record(s) reported but none fetched")]
    Stalled { kind: &'static str, remaining: usize },
    #[error("encode failure: {0}")]
    Encode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
