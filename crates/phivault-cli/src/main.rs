//! phivault: operator tooling for ephemeral PHI export bundles
//!
//! Commands:
//!   seal <records.json> --fields a,b --out <bundle>  - load records into a fresh vault and export
//!   inspect <bundle>                                 - show bundle metadata (no password)
//!   verify <bundle>                                  - check the bundle checksum
//!   open <bundle>                                    - import into a fresh vault and report
//!
//! Every vault lives only for the duration of one command and is cleared on exit.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use phivault_core::{ProtectionMode, VaultConfig};
use phivault_store::{parse_bundle, spawn_sweeper, ImportOptions, KeyRedaction, Vault};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "phivault",
    version,
    about = "Ephemeral encrypted PHI vault tooling",
    long_about = "Seal records into checksummed, field-encrypted bundles and open them in memory"
)]
struct Cli {
    /// Path to phivault.toml configuration file (defaults apply if absent)
    #[arg(long, short = 'c', env = "PHIVAULT_CONFIG", default_value = "phivault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "PHIVAULT_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long, env = "PHIVAULT_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    /// Bundle password (prompted for when omitted)
    #[arg(long, env = "PHIVAULT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// User id recorded in the audit trail
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a JSON object of `{key: record}` and export it as a bundle
    Seal {
        /// JSON file with the records to seal
        records: PathBuf,
        /// Field names to encrypt wherever they appear (comma separated)
        #[arg(long, short = 'f', value_delimiter = ',')]
        fields: Vec<String>,
        /// Output bundle path
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Show bundle metadata without decrypting anything
    Inspect { bundle: PathBuf },

    /// Check the bundle checksum; exits non-zero on mismatch
    Verify { bundle: PathBuf },

    /// Import a bundle into a fresh vault and print the report
    Open {
        bundle: PathBuf,
        /// Replace entries that already exist
        #[arg(long)]
        overwrite: bool,
        /// Skip checksum validation
        #[arg(long)]
        no_checksum: bool,
        /// Print the decrypted records
        #[arg(long)]
        show: bool,
    },
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let default_format = match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    };
    let format = cli.log_format.clone().unwrap_or(default_format);
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "phivault starting"
    );

    let user = cli.user.as_deref();
    match cli.command {
        Commands::Inspect { bundle } => cmd_inspect(&config, &bundle),
        Commands::Verify { bundle } => cmd_verify(&bundle),
        Commands::Seal {
            records,
            fields,
            out,
        } => {
            let password = read_password(cli.password, true)?;
            let session = Session::start(config)?;
            let result = cmd_seal(&session.vault, &records, &fields, &out, &password, user);
            session.shutdown().await;
            result
        }
        Commands::Open {
            bundle,
            overwrite,
            no_checksum,
            show,
        } => {
            let password = read_password(cli.password, false)?;
            let session = Session::start(config)?;
            let options = ImportOptions {
                overwrite,
                validate_checksum: !no_checksum,
            };
            let result = cmd_open(&session.vault, &bundle, &password, user, options, show);
            session.shutdown().await;
            result
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<VaultConfig> {
    if path.exists() {
        VaultConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(VaultConfig::default())
    }
}

fn read_password(given: Option<String>, confirm: bool) -> Result<SecretString> {
    let password = match given {
        Some(p) => p,
        None => {
            let first = rpassword::prompt_password("Bundle password: ")
                .context("reading password")?;
            if confirm {
                let again = rpassword::prompt_password("Confirm password: ")
                    .context("reading password")?;
                if again != first {
                    anyhow::bail!("passwords do not match");
                }
            }
            first
        }
    };
    if password.is_empty() {
        anyhow::bail!("bundle password must not be empty");
    }
    Ok(SecretString::from(password))
}

// ── Vault session ─────────────────────────────────────────────────────────────

/// A vault plus its sweeper, torn down (and cleared) when the command ends.
struct Session {
    vault: Vault,
    cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Session {
    fn start(config: VaultConfig) -> Result<Self> {
        let period = config.store.sweep_interval();
        let vault = Vault::new(config).context("creating vault")?;
        if vault.protection_mode() == ProtectionMode::Degraded {
            eprintln!("warning: degraded crypto backend, sensitive fields are only obfuscated");
        }
        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(vault.clone(), period, cancel.clone());
        Ok(Self {
            vault,
            cancel,
            sweeper,
        })
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "sweeper task did not stop cleanly");
        }
        // the CLI never leaves records behind, whatever clear_on_shutdown says
        if !self.vault.config().store.clear_on_shutdown {
            self.vault.clear_all(None);
        }
    }
}

// ── `phivault seal` ───────────────────────────────────────────────────────────

fn parse_records(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(content).context("records file is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("records file must be a JSON object mapping keys to records"),
    }
}

fn cmd_seal(
    vault: &Vault,
    records: &Path,
    fields: &[String],
    out: &Path,
    password: &SecretString,
    user: Option<&str>,
) -> Result<()> {
    let content = std::fs::read_to_string(records)
        .with_context(|| format!("reading records: {}", records.display()))?;
    let records = parse_records(&content)?;

    for (key, record) in &records {
        if !vault.store(key, record, user) {
            anyhow::bail!("failed to store record {key:?}");
        }
    }

    let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
    let bytes = vault
        .export_bundle(password, &fields, user)
        .context("exporting bundle")?;
    std::fs::write(out, &bytes).with_context(|| format!("writing bundle: {}", out.display()))?;

    println!(
        "sealed {} record(s) into {} ({})",
        records.len(),
        out.display(),
        fmt_bytes(bytes.len() as u64)
    );
    if fields.is_empty() {
        println!("no fields were encrypted (pass --fields to protect sensitive values)");
    }
    Ok(())
}

// ── `phivault inspect` / `phivault verify` ────────────────────────────────────

fn read_bundle(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading bundle: {}", path.display()))
}

fn cmd_inspect(config: &VaultConfig, path: &Path) -> Result<()> {
    let parsed = parse_bundle(&read_bundle(path)?).context("parsing bundle")?;
    let redaction = KeyRedaction::from_config(&config.audit);
    let bundle = &parsed.bundle;

    println!("format:     {}", bundle.format_version);
    println!("created:    {}", bundle.created_at);
    println!(
        "checksum:   {}",
        if parsed.checksum_matches() {
            "ok"
        } else {
            "MISMATCH"
        }
    );
    let names: Vec<&str> = bundle
        .encrypted_field_names
        .iter()
        .map(String::as_str)
        .collect();
    println!(
        "encrypted:  {}",
        if names.is_empty() {
            "(none)".to_string()
        } else {
            names.join(", ")
        }
    );
    println!("entries:    {}", bundle.entries.len());
    for (key, entry) in &bundle.entries {
        println!(
            "  {:<24} expires {}  accessed {}x",
            redaction.redact(key),
            entry.metadata.expires_at,
            entry.metadata.access_count
        );
    }
    Ok(())
}

fn cmd_verify(path: &Path) -> Result<()> {
    let parsed = parse_bundle(&read_bundle(path)?).context("parsing bundle")?;
    if !parsed.checksum_matches() {
        anyhow::bail!(
            "checksum mismatch: bundle says {}, contents hash to {}",
            parsed.bundle.checksum,
            parsed.computed_checksum
        );
    }
    println!("checksum ok ({} entries)", parsed.bundle.entries.len());
    Ok(())
}

// ── `phivault open` ───────────────────────────────────────────────────────────

fn cmd_open(
    vault: &Vault,
    path: &Path,
    password: &SecretString,
    user: Option<&str>,
    options: ImportOptions,
    show: bool,
) -> Result<()> {
    let bytes = read_bundle(path)?;
    let report = vault
        .import_bundle(&bytes, password, user, options)
        .context("importing bundle")?;

    println!("imported:   {}", report.imported_count);
    for error in &report.errors {
        println!("  skipped   {error}");
    }

    let stats = vault.stats();
    let health = vault.health_check();
    println!(
        "vault:      {} item(s), {} in memory, health {:?}: {}",
        stats.item_count,
        fmt_bytes(stats.total_bytes),
        health.status,
        health.message
    );

    if show {
        let keys = parse_bundle(&bytes)?.bundle.entries.into_keys();
        let mut records = Map::new();
        for key in keys {
            if let Some(record) = vault.retrieve::<Value>(&key, user) {
                records.insert(key, record);
            }
        }
        let rendered =
            serde_json::to_string_pretty(&Value::Object(records)).context("rendering records")?;
        println!("{rendered}");
    }

    if !report.success {
        anyhow::bail!("{} entr(y/ies) could not be imported", report.errors.len());
    }
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
