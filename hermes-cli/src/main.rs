//! `hermes-vault` operator tool
//!
//! - Prepare and inspect the ledger database
//! - Replay exported transactions through ingestion
//! - Report unspent notes for an address
//! - Seal legacy plaintext nullifiers and generate keys

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hermes_core::{
    decode_address, format_microunits, generate_keypair, NullifierPublicKey, NullifierSecretKey,
};
use hermes_ingest::{
    CancelToken, IngestionController, JsonFileSource, RunnerConfig, StartupOptions,
    SubscriptionRunner,
};
use hermes_params::VaultConfig;
use hermes_storage_sqlite::{
    encrypt_nullifiers, ChangeChainResolver, Database, LedgerStore, MigrationTable,
};
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

/// Environment variable holding the nullifier secret key (hex)
const SECRET_KEY_ENV: &str = "HERMES_NULLIFIER_KEY";

#[derive(Parser)]
#[command(name = "hermes-vault")]
#[command(about = "HermesVault ledger tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply startup rules to the configured ledger and print the watermark
    Init {
        /// Environment file
        #[arg(short, long, default_value = ".env")]
        env: PathBuf,

        /// Force the watermark to this round (test networks only)
        #[arg(long)]
        fast_catchup: Option<u64>,
    },

    /// Print watermark, latest root and totals
    Status {
        /// Ledger database
        #[arg(short, long)]
        db: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Ingest an exported JSON array of transactions
    Replay {
        /// Environment file
        #[arg(short, long, default_value = ".env")]
        env: PathBuf,

        /// Exported transactions
        #[arg(short, long)]
        input: PathBuf,

        /// Force the watermark to this round first (test networks only)
        #[arg(long)]
        fast_catchup: Option<u64>,

        /// Keep polling after reaching the end of the file
        #[arg(long)]
        follow: bool,
    },

    /// List unspent deposits and change notes of an address
    Unspent {
        /// Algorand address
        address: String,

        /// Ledger database
        #[arg(short, long)]
        db: PathBuf,

        /// Nullifier secret key (hex); falls back to HERMES_NULLIFIER_KEY, then a prompt
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Seal plaintext nullifiers with the nullifier public key
    EncryptNullifiers {
        /// Ledger database; defaults to TxnsDbPath from the environment file
        #[arg(short, long)]
        db: Option<PathBuf>,

        /// Raw 32-byte public key file; defaults to NullifierPublicKeyPath
        #[arg(short, long)]
        public_key: Option<PathBuf>,

        /// Environment file consulted for missing paths
        #[arg(short, long, default_value = ".env")]
        env: PathBuf,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate a nullifier key pair
    GenerateKey {
        /// Where to write the public key
        #[arg(short, long, default_value = "nullifier_public.key")]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { env, fast_catchup } => run_init(&env, fast_catchup),
        Commands::Status { db, json } => run_status(&db, json),
        Commands::Replay {
            env,
            input,
            fast_catchup,
            follow,
        } => run_replay(&env, &input, fast_catchup, follow).await,
        Commands::Unspent { address, db, key } => run_unspent(&address, &db, key),
        Commands::EncryptNullifiers {
            db,
            public_key,
            env,
            dry_run,
        } => encrypt_inputs(db, public_key, &env)
            .and_then(|(db, public_key)| run_encrypt_nullifiers(&db, &public_key, dry_run)),
        Commands::GenerateKey { out, force } => run_generate_key(&out, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(env: &Path) -> anyhow::Result<VaultConfig> {
    VaultConfig::from_env_file(env).with_context(|| format!("loading {}", env.display()))
}

fn open_controller(
    config: &VaultConfig,
    fast_catchup: Option<u64>,
) -> anyhow::Result<IngestionController> {
    let app = config.app_descriptor()?;
    info!(app_id = app.id, creation_block = app.creation_block, "Loaded application");

    let store = LedgerStore::open(&config.txns_db_path)
        .with_context(|| format!("opening {}", config.txns_db_path.display()))?;
    let mut controller = IngestionController::new(store, app);
    controller.initialize(&StartupOptions {
        fast_catchup_height: fast_catchup,
    })?;
    Ok(controller)
}

fn open_readonly(db: &Path) -> anyhow::Result<LedgerStore> {
    LedgerStore::open_readonly(db).with_context(|| format!("opening {}", db.display()))
}

fn run_init(env: &Path, fast_catchup: Option<u64>) -> anyhow::Result<()> {
    let config = load_config(env)?;
    let controller = open_controller(&config, fast_catchup)?;
    println!("Watermark: {}", controller.get_watermark()?);
    Ok(())
}

fn run_status(db: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_readonly(db)?;
    let watermark = store.get_watermark()?;
    let root = store.latest_root()?;
    let notes = store.note_count()?;
    let stats = store.stats()?;

    if json {
        let value = serde_json::json!({
            "watermark": watermark,
            "root": root.as_ref().map(|r| hex::encode(r.value)),
            "leafCount": root.as_ref().map(|r| r.leaf_count).unwrap_or(0),
            "notes": notes,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Watermark:         {}", watermark);
    match root {
        Some(root) => {
            println!("Latest root:       {}", hex::encode(root.value));
            println!("Leaf count:        {}", root.leaf_count);
        }
        None => println!("Latest root:       none"),
    }
    println!("Notes stored:      {}", notes);
    println!("Deposits:          {}", stats.count_deposits);
    println!("Total deposited:   {}", format_microunits(stats.total_deposits));
    println!("Total withdrawn:   {}", format_microunits(stats.total_withdrawals));
    println!("Total fees:        {}", format_microunits(stats.total_fees));
    Ok(())
}

async fn run_replay(
    env: &Path,
    input: &Path,
    fast_catchup: Option<u64>,
    follow: bool,
) -> anyhow::Result<()> {
    let config = load_config(env)?;
    let mut controller = open_controller(&config, fast_catchup)?;
    let mut source = JsonFileSource::load(input)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let runner = SubscriptionRunner::new(RunnerConfig {
        stop_when_caught_up: !follow,
        ..RunnerConfig::from_vault_config(&config)
    });
    let summary = runner.run(&mut controller, &mut source, &cancel).await?;

    println!(
        "Applied {} transactions in {} batches ({} new, {} already present)",
        summary.transactions, summary.batches, summary.inserted, summary.duplicates
    );
    println!("Watermark: {}", summary.watermark);
    if summary.cancelled {
        println!("Stopped by interrupt");
    }
    Ok(())
}

fn run_unspent(address: &str, db: &Path, key: Option<String>) -> anyhow::Result<()> {
    decode_address(address).with_context(|| format!("invalid address {}", address))?;
    let store = open_readonly(db)?;

    let env_key = std::env::var(SECRET_KEY_ENV).ok();
    let secret = read_secret_key(key, env_key, || {
        let stdin = std::io::stdin();
        if stdin.is_terminal() {
            rpassword::prompt_password("Nullifier secret key (hex): ")
        } else {
            read_line(&mut stdin.lock())
        }
    })?;

    let report = ChangeChainResolver::new(&store, &secret).resolve(address)?;

    for record in &report.records {
        println!(
            "{:<8} leaf {:>8}  {:>20}  {}",
            record.kind.to_string(),
            record.leaf_index,
            format_microunits(record.amount),
            record.secret_note.as_deref().unwrap_or("-")
        );
    }
    for anomaly in &report.anomalies {
        println!("Skipped chain: {}", anomaly);
    }
    println!(
        "{} unspent notes, total {}",
        report.records.len(),
        format_microunits(report.total())
    );
    if !report.anomalies.is_empty() {
        println!("{} chains could not be followed", report.anomalies.len());
    }
    Ok(())
}

/// Secret key from the argument, the environment, or `prompt`, in that order
fn read_secret_key<F>(
    arg: Option<String>,
    env: Option<String>,
    prompt: F,
) -> anyhow::Result<NullifierSecretKey>
where
    F: FnOnce() -> std::io::Result<String>,
{
    let hex_key = match arg.or(env).filter(|k| !k.trim().is_empty()) {
        Some(k) => k,
        None => prompt().context("reading nullifier secret key")?,
    };
    let hex_key = hex_key.trim();
    if hex_key.is_empty() {
        bail!("no nullifier secret key given");
    }
    Ok(NullifierSecretKey::from_hex(hex_key)?)
}

/// Piped key input, one line
fn read_line<R: BufRead>(input: &mut R) -> std::io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line)
}

/// Ledger and public key paths; whichever is not given comes from `env`
fn encrypt_inputs(
    db: Option<PathBuf>,
    public_key: Option<PathBuf>,
    env: &Path,
) -> anyhow::Result<(PathBuf, PathBuf)> {
    if let (Some(db), Some(public_key)) = (&db, &public_key) {
        return Ok((db.clone(), public_key.clone()));
    }
    let config = load_config(env)?;
    let db = db.unwrap_or(config.txns_db_path);
    let public_key = match public_key.or(config.nullifier_public_key_path) {
        Some(path) => path,
        None => bail!("no public key given and NullifierPublicKeyPath is not set"),
    };
    Ok((db, public_key))
}

fn run_encrypt_nullifiers(db: &Path, public_key: &Path, dry_run: bool) -> anyhow::Result<()> {
    if !db.exists() {
        bail!("database {} does not exist", db.display());
    }
    if !public_key.exists() {
        bail!("public key file {} does not exist", public_key.display());
    }

    let key = NullifierPublicKey::load(public_key)
        .with_context(|| format!("reading {}", public_key.display()))?;
    let mut database = if dry_run {
        Database::open_readonly(db)?
    } else {
        Database::open_existing(db)?
    };
    let report = encrypt_nullifiers(&mut database, &key, dry_run)?;

    for row in &report.rows {
        println!("{}", row);
    }
    let verb = if dry_run { "Would encrypt" } else { "Encrypted" };
    println!(
        "{} {} note nullifiers and {} unconfirmed note nullifiers",
        verb,
        report.sealed(MigrationTable::Notes),
        report.sealed(MigrationTable::UnconfirmedNotes)
    );
    Ok(())
}

fn run_generate_key(out: &Path, force: bool) -> anyhow::Result<()> {
    if out.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", out.display());
    }
    let (secret, public) = generate_keypair();
    public
        .save(out)
        .with_context(|| format!("writing {}", out.display()))?;

    println!("Public key written to {}", out.display());
    println!("Secret key (store it offline, it is not saved anywhere):");
    println!("{}", secret.to_hex().as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Cursor;

    const KEY_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_unspent() {
        let cli = Cli::try_parse_from(["hermes-vault", "unspent", "ADDR", "--db", "txns.db"]).unwrap();
        match cli.command {
            Commands::Unspent { address, db, key } => {
                assert_eq!(address, "ADDR");
                assert_eq!(db, PathBuf::from("txns.db"));
                assert!(key.is_none());
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_secret_key_precedence() {
        let expected = NullifierSecretKey::from_hex(KEY_HEX).unwrap().public_key();

        let never = || -> std::io::Result<String> { panic!("prompted with a key available") };
        let from_arg = read_secret_key(Some(KEY_HEX.to_string()), Some("zz".to_string()), never).unwrap();
        assert_eq!(from_arg.public_key().as_bytes(), expected.as_bytes());

        let from_env = read_secret_key(None, Some(KEY_HEX.to_string()), never).unwrap();
        assert_eq!(from_env.public_key().as_bytes(), expected.as_bytes());

        let mut typed = Cursor::new(format!("{}\n", KEY_HEX).into_bytes());
        let prompted = read_secret_key(None, None, || read_line(&mut typed)).unwrap();
        assert_eq!(prompted.public_key().as_bytes(), expected.as_bytes());

        let mut empty = Cursor::new(b"\n".to_vec());
        assert!(read_secret_key(None, None, || read_line(&mut empty)).is_err());
    }

    #[test]
    fn test_encrypt_nullifiers_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("txns.db");
        let key = dir.path().join("public.key");

        assert!(run_encrypt_nullifiers(&db, &key, true).is_err());

        LedgerStore::open(&db).unwrap();
        assert!(run_encrypt_nullifiers(&db, &key, true).is_err());

        run_generate_key(&key, false).unwrap();
        run_encrypt_nullifiers(&db, &key, true).unwrap();
    }

    #[test]
    fn test_encrypt_dry_run_leaves_schema_alone() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("txns.db");
        let key = dir.path().join("public.key");
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute_batch(
                "CREATE TABLE notes (leaf_index INTEGER PRIMARY KEY, commitment BLOB NOT NULL, \
                 nullifier BLOB, txn_id TEXT NOT NULL); \
                 CREATE TABLE unconfirmed_notes (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 commitment BLOB NOT NULL, nullifier BLOB, txn_id TEXT);",
            )
            .unwrap();
        run_generate_key(&key, false).unwrap();

        let schema = |path: &Path| -> (Vec<String>, String) {
            let conn = rusqlite::Connection::open(path).unwrap();
            let tables = conn
                .prepare("SELECT name FROM sqlite_master ORDER BY name")
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<String>, _>>()
                .unwrap();
            let mode = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap();
            (tables, mode)
        };

        let before = schema(&db);
        run_encrypt_nullifiers(&db, &key, true).unwrap();
        run_status(&db, true).unwrap();
        assert_eq!(schema(&db), before);
    }

    #[test]
    fn test_encrypt_inputs_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(
            &env,
            "AppSetupDirPath=/srv/app\nTxnsDbPath=/srv/txns.db\nNullifierPublicKeyPath=/srv/public.key\n",
        )
        .unwrap();

        let (db, key) = encrypt_inputs(None, None, &env).unwrap();
        assert_eq!(db, PathBuf::from("/srv/txns.db"));
        assert_eq!(key, PathBuf::from("/srv/public.key"));

        let (db, key) = encrypt_inputs(Some("a.db".into()), None, &env).unwrap();
        assert_eq!(db, PathBuf::from("a.db"));
        assert_eq!(key, PathBuf::from("/srv/public.key"));

        // both given: the env file is not needed
        let missing = dir.path().join("missing.env");
        let (db, key) = encrypt_inputs(Some("a.db".into()), Some("k".into()), &missing).unwrap();
        assert_eq!((db, key), (PathBuf::from("a.db"), PathBuf::from("k")));
        assert!(encrypt_inputs(None, Some("k".into()), &missing).is_err());

        std::fs::write(&env, "AppSetupDirPath=/srv/app\nTxnsDbPath=/srv/txns.db\n").unwrap();
        assert!(encrypt_inputs(None, None, &env).is_err());
    }

    #[test]
    fn test_generate_key_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("public.key");

        run_generate_key(&out, false).unwrap();
        let first = NullifierPublicKey::load(&out).unwrap();
        assert!(run_generate_key(&out, false).is_err());

        run_generate_key(&out, true).unwrap();
        let second = NullifierPublicKey::load(&out).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }
}
