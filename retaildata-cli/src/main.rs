//! RetailData CLI: catalog, download, preparation and credential commands.
//!
//! Commands:
//! - `list` / `info`: browse the dataset catalog
//! - `get`: download a dataset (optionally preparing it)
//! - `prepare`: convert raw files to parquet with sampling/splitting
//! - `verify`: re-hash raw files against the stored manifest (exit 1 on drift)
//! - `purge`: delete one dataset or every managed directory
//! - `auth`: store, remove and inspect credentials

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::HumanBytes;
use std::collections::BTreeSet;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use retaildata_core::cache::VerifyReport;
use retaildata_core::config::{env_key, Settings};
use retaildata_core::credentials::{CredentialManager, PassphraseSource};
use retaildata_core::fetch::BarProgress;
use retaildata_core::providers::hub::HUB_SERVICE;
use retaildata_core::providers::kaggle::KAGGLE_SERVICE;
use retaildata_core::providers::AcquireOptions;
use retaildata_core::registry::{CredentialUse, DatasetDescriptor, Locator, ProviderKind};
use retaildata_runner::{DownloadOptions, PrepareOptions, PrepareReport, RetailData};

#[derive(Parser)]
#[command(
    name = "retaildata",
    version,
    about = "RetailData: fetch, cache and prepare retail benchmark datasets"
)]
struct Cli {
    /// Data root (raw/, prepared/, meta/). Overrides config and environment.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Master password for the encrypted credential file.
    #[arg(long, global = true, env = "RETAILDATA_MASTER_PASSWORD", hide_env_values = true)]
    master_password: Option<String>,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog datasets.
    List {
        /// Only datasets present on disk, with their size.
        #[arg(long, default_value_t = false)]
        downloaded: bool,

        /// Only datasets carrying this topic tag.
        #[arg(long)]
        tag: Option<String>,
    },
    /// Show one dataset's descriptor and local state.
    Info { id: String },
    /// Download a dataset.
    Get {
        id: String,

        /// Data root for this download (same as --data-dir).
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Re-download even if already present.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Ignore any cached copy.
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Convert to parquet after downloading.
        #[arg(long, default_value_t = false)]
        prepare: bool,

        #[command(flatten)]
        shaping: ShapingArgs,

        /// Hub files to include (glob, repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Hub files to exclude (glob, repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Hub revision (branch, tag or commit).
        #[arg(long)]
        revision: Option<String>,

        /// Pipeline API base URL.
        #[arg(long)]
        base_url: Option<String>,

        /// Pipeline API key (prefer `auth set <source> api_key`).
        #[arg(long, env = "RETAILDATA_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Convert a downloaded dataset to parquet.
    Prepare {
        id: String,

        #[command(flatten)]
        shaping: ShapingArgs,
    },
    /// Check raw files against the checksum manifest.
    Verify { id: String },
    /// Delete a dataset, or every managed directory with --all.
    Purge {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Credential management.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Args, Clone, Default)]
struct ShapingArgs {
    /// Keep this fraction of rows, in (0, 1].
    #[arg(long)]
    sample: Option<f64>,

    /// Sample within each value of this column.
    #[arg(long, requires = "sample")]
    stratify: Option<String>,

    /// Train share of a shuffled train/test split, in (0, 1].
    #[arg(long)]
    split: Option<f64>,

    /// Seed for reproducible sampling and splitting.
    #[arg(long)]
    seed: Option<u64>,
}

impl ShapingArgs {
    fn is_set(&self) -> bool {
        self.sample.is_some() || self.stratify.is_some() || self.split.is_some()
    }

    fn to_options(&self) -> PrepareOptions {
        PrepareOptions {
            sample_fraction: self.sample,
            stratify_column: self.stratify.clone(),
            split_fraction: self.split,
            seed: self.seed,
        }
    }
}

#[derive(Subcommand)]
enum AuthAction {
    /// Store a secret. Reads it from stdin unless --secret is given.
    Set {
        service: String,
        account: String,

        #[arg(long, env = "RETAILDATA_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
    /// Remove a stored secret.
    Delete { service: String, account: String },
    /// Show the active backend and which provider credentials are present.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut settings = Settings::load()?;
    if let Some(dir) = &cli.data_dir {
        settings = settings.with_data_dir(dir.clone());
    }
    if let Some(password) = cli.master_password.clone() {
        settings.master_password = Some(password);
    }
    debug!(data_dir = %settings.data_dir.display(), "settings resolved");

    match cli.command {
        Commands::List { downloaded, tag } => run_list(settings, downloaded, tag.as_deref()),
        Commands::Info { id } => run_info(settings, &id),
        Commands::Get {
            id,
            output,
            force,
            no_cache,
            prepare,
            shaping,
            include,
            exclude,
            revision,
            base_url,
            api_key,
        } => {
            if shaping.is_set() && !prepare {
                bail!("--sample, --stratify and --split need --prepare");
            }
            if let Some(dir) = output {
                settings = settings.with_data_dir(dir);
            }
            let options = DownloadOptions {
                acquire: AcquireOptions {
                    force,
                    include_patterns: include,
                    exclude_patterns: exclude,
                    revision,
                    base_url,
                    api_key,
                },
                use_cache: no_cache.then_some(false),
                prepare: prepare.then(|| shaping.to_options()),
            };
            run_get(settings, &id, &options)
        }
        Commands::Prepare { id, shaping } => run_prepare(settings, &id, &shaping.to_options()),
        Commands::Verify { id } => run_verify(settings, &id),
        Commands::Purge { id, all } => run_purge(settings, id.as_deref(), all),
        Commands::Auth { action } => run_auth(settings, action),
    }
}

fn open(settings: Settings) -> Result<RetailData> {
    let passphrase = passphrase_source(&settings, std::io::stdin().is_terminal());
    let credentials = Arc::new(CredentialManager::from_settings_with(&settings, passphrase));
    Ok(RetailData::with_credentials(settings, credentials)
        .context("failed to initialise retaildata")?
        .with_progress(Arc::new(BarProgress::new())))
}

/// Master password for the encrypted credential file: flag or environment
/// first, then an interactive prompt when stdin is a terminal.
fn passphrase_source(settings: &Settings, interactive: bool) -> PassphraseSource {
    match &settings.master_password {
        Some(value) => PassphraseSource::Value(value.clone()),
        None if interactive => PassphraseSource::Prompt(Box::new(prompt_master_password)),
        None => PassphraseSource::Env(env_key("MASTER_PASSWORD")),
    }
}

fn prompt_master_password() -> Option<String> {
    rpassword::prompt_password("Master password for the credential file: ").ok()
}

fn run_list(settings: Settings, downloaded: bool, tag: Option<&str>) -> Result<()> {
    let app = open(settings)?;
    if downloaded {
        let present = app.list_downloaded()?;
        if present.is_empty() {
            println!("No datasets downloaded under {}", app.layout().root().display());
            return Ok(());
        }
        for (id, entry) in &present {
            println!("{id:<24} {:>10}  {}", HumanBytes(entry.size).to_string(), entry.path.display());
        }
        return Ok(());
    }

    println!("{:<24} {:<12} {:<5} DESCRIPTION", "ID", "PROVIDER", "AUTH");
    for d in app.list_datasets() {
        if tag.is_some_and(|t| !d.has_tag(t)) {
            continue;
        }
        println!(
            "{:<24} {:<12} {:<5} {}",
            d.id,
            d.provider.as_str(),
            if d.requires_credentials { "yes" } else { "-" },
            d.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run_info(settings: Settings, id: &str) -> Result<()> {
    let app = open(settings)?;
    let descriptor = app.get_dataset(id)?;
    println!("{}", serde_json::to_string_pretty(descriptor)?);

    match app.cache().metadata(id)? {
        Some(record) => {
            println!();
            println!("Downloaded: {}", record.downloaded_at.to_rfc3339());
            println!("Source:     {}", record.source_url);
            println!("Size:       {}", HumanBytes(app.cache().size(id)));
            println!("Raw files:  {}", app.layout().raw_dir(id).display());
        }
        None => println!("\nNot downloaded. Run `retaildata get {id}`."),
    }
    Ok(())
}

fn run_get(settings: Settings, id: &str, options: &DownloadOptions) -> Result<()> {
    let app = open(settings)?;
    let outcome = app.download(id, options)?;
    if outcome.from_cache {
        println!("'{id}' is already downloaded (use --force to fetch again)");
    } else {
        println!(
            "Downloaded '{id}' to {} ({})",
            app.layout().raw_dir(id).display(),
            HumanBytes(app.cache().size(id))
        );
    }
    if let Some(report) = &outcome.prepared {
        print_prepare_report(id, report)?;
    }
    Ok(())
}

fn run_prepare(settings: Settings, id: &str, options: &PrepareOptions) -> Result<()> {
    let app = open(settings)?;
    let report = app.prepare(id, options)?;
    print_prepare_report(id, &report)
}

fn print_prepare_report(id: &str, report: &PrepareReport) -> Result<()> {
    for file in &report.written {
        println!("  wrote {}", file.display());
    }
    for skipped in &report.skipped {
        eprintln!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    if !report.succeeded() {
        bail!("no tables could be prepared for '{id}'");
    }
    println!("Prepared {} file(s) for '{id}'", report.written.len());
    Ok(())
}

fn run_verify(settings: Settings, id: &str) -> Result<()> {
    let app = open(settings)?;
    let report = app.verify(id)?;
    for path in &report.mismatched {
        eprintln!("  changed    {path}");
    }
    for path in &report.missing {
        eprintln!("  missing    {path}");
    }
    for path in &report.unexpected {
        eprintln!("  unexpected {path}");
    }
    ensure_verified(id, &report)?;
    println!("'{id}': {} file(s) verified", report.checked);
    Ok(())
}

/// Turns a dirty report into an error so `main` exits non-zero.
fn ensure_verified(id: &str, report: &VerifyReport) -> Result<()> {
    if !report.is_clean() {
        bail!(
            "'{id}' failed verification: {} changed, {} missing, {} unexpected",
            report.mismatched.len(),
            report.missing.len(),
            report.unexpected.len()
        );
    }
    Ok(())
}

fn run_purge(settings: Settings, id: Option<&str>, all: bool) -> Result<()> {
    let app = open(settings)?;
    if all {
        app.purge_all()?;
        println!("Purged all datasets under {}", app.layout().root().display());
        return Ok(());
    }
    let Some(id) = id else {
        bail!("pass a dataset id or --all");
    };
    if app.delete(id)? {
        println!("Deleted '{id}'");
    } else {
        println!("'{id}' was not present");
    }
    Ok(())
}

fn run_auth(settings: Settings, action: AuthAction) -> Result<()> {
    let app = open(settings)?;
    let credentials = app.credentials();
    match action {
        AuthAction::Set {
            service,
            account,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => read_secret_line()?,
            };
            if secret.is_empty() {
                bail!("refusing to store an empty secret");
            }
            credentials.set_credential(&service, &account, &secret)?;
            println!(
                "Stored {service}/{account} in the {} store",
                credentials.active_backend().unwrap_or("unknown")
            );
        }
        AuthAction::Delete { service, account } => {
            credentials.delete_credential(&service, &account)?;
            println!("Removed {service}/{account}");
        }
        AuthAction::Status => {
            let Some(backend) = credentials.active_backend() else {
                println!("Credential backend: none available");
                println!("  enable the platform keychain or set RETAILDATA_MASTER_PASSWORD");
                return Ok(());
            };
            println!("Credential backend: {backend}");

            let mut seen = BTreeSet::new();
            for d in app.list_datasets() {
                if d.provider.credential_use() == CredentialUse::None {
                    continue;
                }
                let service = credential_service(d);
                if !seen.insert(service.clone()) {
                    continue;
                }
                for account in credential_accounts(d.provider) {
                    let present = credentials.get_credential(&service, account)?.is_some();
                    println!("  {service}/{account}: {}", if present { "set" } else { "missing" });
                }
            }
        }
    }
    Ok(())
}

/// Service name a dataset's secrets are stored under.
fn credential_service(d: &DatasetDescriptor) -> String {
    match (&d.locator, d.provider) {
        (Locator::Pipeline { source, .. }, _) => source.clone(),
        (_, ProviderKind::Kaggle) => KAGGLE_SERVICE.to_string(),
        (_, ProviderKind::HuggingFace) => HUB_SERVICE.to_string(),
        (_, other) => other.as_str().to_string(),
    }
}

fn credential_accounts(provider: ProviderKind) -> &'static [&'static str] {
    match provider {
        ProviderKind::Kaggle => &["username", "key"],
        ProviderKind::HuggingFace => &["token"],
        ProviderKind::Pipeline => &["api_key", "base_url"],
        _ => &[],
    }
}

fn read_secret_line() -> Result<String> {
    eprint!("Secret (one line on stdin): ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read secret from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
