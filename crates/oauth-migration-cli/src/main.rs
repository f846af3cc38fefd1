use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use oauth_migration_core::{
    locate_legacy_type_dir, CodecRegistry, Md5KeyGenerator, MigrationOptions, MigrationStore,
    MigrationSummary, Migrator, PhaseSummary, Sha256KeyGenerator, TableNames, TokenKeyGenerator,
    DEFAULT_PAGE_SIZE,
};
use oauth_migration_store_sqlite::SqliteMigrationStore;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "oauth-migrate.v1";
const SQLITE_SCHEME: &str = "sqlite://";

#[derive(Debug, Parser)]
#[command(name = "oauth-migrate")]
#[command(about = "Migrate persisted OAuth2 token records to hashed keys and the current format")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rewrite every unmigrated access and refresh token record.
    Migrate(MigrateArgs),
    /// Report migrated and unmigrated record counts without writing anything.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct TableArgs {
    #[arg(long)]
    access_token_table: Option<String>,
    #[arg(long)]
    refresh_token_table: Option<String>,
}

impl TableArgs {
    fn resolve(&self) -> Result<TableNames> {
        Ok(TableNames::with_overrides(
            self.access_token_table.as_deref(),
            self.refresh_token_table.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Token database: a file path or a `sqlite://` url.
    database: String,
    #[command(flatten)]
    tables: TableArgs,
    #[arg(long, default_value_t = false)]
    remove_refresh_tokens: bool,
    #[arg(long, default_value_t = false)]
    serialize_new_token_values: bool,
    #[arg(long, default_value_t = false)]
    strict_pairing: bool,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Directory of legacy type archives; defaults to `oldlib` or `target/oldlib`.
    #[arg(long)]
    legacy_types: Option<PathBuf>,
    /// Directory of archives visible to both format contexts.
    #[arg(long)]
    shared_types: Option<PathBuf>,
    /// Hash used for new token keys; `md5` matches the current token store.
    #[arg(long, value_enum, default_value_t = KeyAlgorithmArg::Md5)]
    key_algorithm: KeyAlgorithmArg,
    /// Salt prepended before hashing; only with `--key-algorithm sha256`.
    #[arg(long)]
    key_salt: Option<String>,
    /// Copy the database here before any record is rewritten.
    #[arg(long)]
    backup: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KeyAlgorithmArg {
    Md5,
    Sha256,
}

#[derive(Debug, Args)]
struct StatusArgs {
    database: String,
    #[command(flatten)]
    tables: TableArgs,
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Accepts a plain path or a `sqlite://` url; other schemes are rejected.
fn database_path(database: &str) -> Result<PathBuf> {
    if let Some(path) = database.strip_prefix(SQLITE_SCHEME) {
        if path.is_empty() {
            bail!("database url {database} has no path");
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = database.split_once("://") {
        bail!("unsupported database url scheme {scheme}://; only sqlite:// and plain paths are supported");
    }
    Ok(PathBuf::from(database))
}

fn open_existing(database: &str, tables: TableNames) -> Result<SqliteMigrationStore> {
    let path = database_path(database)?;
    if !path.is_file() {
        bail!("token database {} does not exist", path.display());
    }
    SqliteMigrationStore::open(&path, tables)
}

fn run_migrate(args: &MigrateArgs) -> Result<()> {
    let tables = args.tables.resolve()?;
    let options = MigrationOptions {
        remove_refresh_tokens: args.remove_refresh_tokens,
        serialize_new_token_values: args.serialize_new_token_values,
        strict_pairing: args.strict_pairing,
        page_size: args.page_size,
    };
    options.validate()?;
    if args.key_salt.is_some() && args.key_algorithm != KeyAlgorithmArg::Sha256 {
        bail!("--key-salt requires --key-algorithm sha256");
    }

    let base = std::env::current_dir().context("failed to read the working directory")?;
    let legacy_dir = locate_legacy_type_dir(args.legacy_types.as_deref(), &base)?;
    let registry = CodecRegistry::load(&legacy_dir, args.shared_types.as_deref())
        .with_context(|| format!("failed to load legacy types from {}", legacy_dir.display()))?;

    let store = open_existing(&args.database, tables)?;
    if let Some(backup) = &args.backup {
        store.backup_database(backup)?;
        tracing::info!(backup = %backup.display(), "backed up token database");
    }

    let summary = match (args.key_algorithm, args.key_salt.as_deref()) {
        (KeyAlgorithmArg::Md5, _) => migrate_with(store, Md5KeyGenerator::new(), registry, options)?,
        (KeyAlgorithmArg::Sha256, None) => {
            migrate_with(store, Sha256KeyGenerator::new(), registry, options)?
        }
        (KeyAlgorithmArg::Sha256, Some(salt)) => {
            migrate_with(store, Sha256KeyGenerator::with_salt(salt), registry, options)?
        }
    };

    if args.json {
        emit_json(serde_json::to_value(&summary)?)
    } else {
        print_summary(&summary);
        Ok(())
    }
}

fn migrate_with<K: TokenKeyGenerator>(
    store: SqliteMigrationStore,
    keys: K,
    registry: CodecRegistry,
    options: MigrationOptions,
) -> Result<MigrationSummary> {
    let mut migrator = Migrator::new(store, keys, registry, options)?;
    migrator
        .migrate_data()
        .with_context(|| format!("migration stopped while {}", migrator.state().as_str()))
}

fn print_summary(summary: &MigrationSummary) {
    for phase in [&summary.access_tokens, &summary.refresh_tokens] {
        println!("{}", describe_phase(phase));
    }
}

fn describe_phase(phase: &PhaseSummary) -> String {
    let kind = phase.kind.as_str();
    if phase.removed {
        return format!("{kind} tokens: cleared {} record(s)", phase.cleared);
    }
    format!(
        "{kind} tokens: migrated {} of {} record(s) in {} page(s), {} pairing mismatch(es)",
        phase.migrated, phase.initial_unmigrated, phase.pages, phase.pairing_mismatches
    )
}

fn run_status(args: &StatusArgs) -> Result<()> {
    let tables = args.tables.resolve()?;
    let store = open_existing(&args.database, tables)?;
    let status = json!({
        "database": args.database,
        "tables": {
            "access_token": store.tables().access_token(),
            "refresh_token": store.tables().refresh_token(),
        },
        "access_tokens": {
            "unmigrated": store.count_unmigrated_access_tokens()?,
            "migrated": store.count_migrated_access_tokens()?,
        },
        "refresh_tokens": {
            "unmigrated": store.count_unmigrated_refresh_tokens()?,
            "migrated": store.count_migrated_refresh_tokens()?,
        },
    });

    if args.json {
        return emit_json(status);
    }
    for kind in ["access_tokens", "refresh_tokens"] {
        println!(
            "{kind}: {} unmigrated, {} migrated",
            status[kind]["unmigrated"], status[kind]["migrated"]
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    match &cli.command {
        Command::Migrate(args) => run_migrate(args),
        Command::Status(args) => run_status(args),
    }
}
