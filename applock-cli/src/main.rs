use anyhow::{bail, Context, Result};
use applock_core::platform::scripted::ScriptedForegroundProvider;
use applock_core::state::{refresh_from, SharedProtectionState};
use applock_core::{
    ApplockConfig, Engine, ForegroundEventKind, ForegroundProvider, GateOutcome, GatePresenter,
    LockError, PinGate, ProtectionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Application-lock enforcement CLI", long_about = None)]
struct Cli {
    /// Data directory (default: $APPLOCKD_DATA_DIR, then ~/.applockd)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and default configuration
    Init,
    /// Show enforcement status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable enforcement (establishes the PIN on first use)
    Enable {
        #[arg(short, long)]
        pin: String,
    },
    /// Disable enforcement
    Disable {
        #[arg(short, long)]
        pin: String,
    },
    /// Check a PIN candidate without changing anything
    Pin {
        #[arg(short, long)]
        pin: String,
    },
    /// Manage the protected-application list
    Apps {
        #[command(subcommand)]
        action: AppsAction,
    },
    /// Run the engine in the foreground, driven by stdin
    Run,
}

#[derive(Subcommand)]
enum AppsAction {
    /// Add an application to the protected list
    Add {
        /// OS application identifier, e.g. com.example.messages
        package: String,
        /// Display name (defaults to the package identifier)
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Remove an application from the protected list
    Remove { package: String },
    /// List protected applications
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(&cli);

    match cli.command {
        Commands::Init => cmd_init(&data_dir),
        Commands::Status { json } => cmd_status(&data_dir, json),
        Commands::Enable { pin } => cmd_enable(&data_dir, &pin).await,
        Commands::Disable { pin } => cmd_disable(&data_dir, &pin).await,
        Commands::Pin { pin } => cmd_pin(&data_dir, &pin),
        Commands::Apps { action } => cmd_apps(&data_dir, action),
        Commands::Run => cmd_run(&data_dir).await,
    }
}

fn resolve_data_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.data_dir {
        return dir.clone();
    }
    if let Some(dir) = std::env::var_os("APPLOCKD_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".applockd"))
        .unwrap_or_else(|| PathBuf::from(".applockd"))
}

fn open_store(data_dir: &Path) -> Result<ProtectionStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {data_dir:?}"))?;
    ProtectionStore::open(data_dir.join("applockd.sqlite3"))
        .with_context(|| format!("failed to open store in {data_dir:?}"))
}

fn open_pin_gate(data_dir: &Path) -> Result<PinGate> {
    let config = ApplockConfig::load_or_default(data_dir)?;
    let store = Arc::new(Mutex::new(open_store(data_dir)?));
    let state = Arc::new(SharedProtectionState::new(config.unlock_ttl()));
    {
        let store = store.lock().unwrap();
        refresh_from(&store, &state)?;
    }
    Ok(PinGate::new(store, state))
}

fn cmd_init(data_dir: &Path) -> Result<()> {
    let config = ApplockConfig::load_or_default(data_dir)?;
    let store = open_store(data_dir)?;
    store.settings_or_default()?;
    println!("applockd initialized at {:?}", config.data_dir);
    Ok(())
}

#[derive(serde::Serialize)]
struct StatusReport {
    enforcing: bool,
    pin_set: bool,
    updated_at: i64,
    protected_apps: Vec<applock_core::ProtectedApp>,
}

fn cmd_status(data_dir: &Path, json: bool) -> Result<()> {
    let store = open_store(data_dir)?;
    let settings = store.settings_or_default()?;
    let apps = store.list_protected()?;

    if json {
        let report = StatusReport {
            enforcing: settings.enabled,
            pin_set: settings.pin_hash.is_some(),
            updated_at: settings.updated_at,
            protected_apps: apps,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("applockd Status");
    println!(
        "  Enforcement: {}",
        if settings.enabled { "ON" } else { "OFF" }
    );
    println!(
        "  PIN: {}",
        if settings.pin_hash.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    if let Some(updated) = DateTime::<Utc>::from_timestamp_millis(settings.updated_at) {
        println!("  Updated: {}", updated.to_rfc3339());
    }
    println!("  Protected apps: {}", apps.len());
    for app in apps {
        println!("    - {} ({})", app.label, app.package);
    }
    Ok(())
}

async fn cmd_enable(data_dir: &Path, pin: &str) -> Result<()> {
    let pin_gate = open_pin_gate(data_dir)?;
    match pin_gate.enable(pin).await {
        Ok(()) => {
            println!("Enforcement enabled.");
            Ok(())
        }
        Err(LockError::IncorrectPin) => bail!("incorrect PIN"),
        Err(LockError::NeedsNewPin { min }) => {
            bail!("no PIN set - choose a new PIN of at least {min} characters")
        }
        Err(err) => Err(err.into()),
    }
}

async fn cmd_disable(data_dir: &Path, pin: &str) -> Result<()> {
    let pin_gate = open_pin_gate(data_dir)?;
    match pin_gate.disable(pin).await {
        Ok(()) => {
            println!("Enforcement disabled.");
            Ok(())
        }
        Err(LockError::IncorrectPin) => bail!("incorrect PIN"),
        Err(err) => Err(err.into()),
    }
}

fn cmd_pin(data_dir: &Path, pin: &str) -> Result<()> {
    let pin_gate = open_pin_gate(data_dir)?;
    if pin_gate.verify(pin)? {
        println!("PIN matches.");
        Ok(())
    } else {
        bail!("incorrect PIN")
    }
}

fn cmd_apps(data_dir: &Path, action: AppsAction) -> Result<()> {
    let store = open_store(data_dir)?;
    match action {
        AppsAction::Add { package, label } => {
            let label = label.unwrap_or_else(|| package.clone());
            store.insert_protected(&label, &package)?;
            println!("Added {package} to the protected list.");
        }
        AppsAction::Remove { package } => {
            if store.remove_protected(&package)? {
                println!("Removed {package} from the protected list.");
            } else {
                bail!("{package} is not in the protected list");
            }
        }
        AppsAction::List { json } => {
            let apps = store.list_protected()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else if apps.is_empty() {
                println!("No protected apps.");
            } else {
                for app in apps {
                    println!("{} ({})", app.label, app.package);
                }
            }
        }
    }
    Ok(())
}

/// Lock screen for a terminal: announces the gate and waits for an
/// `unlock`/`dismiss` line.
struct StdoutGatePresenter;

#[async_trait]
impl GatePresenter for StdoutGatePresenter {
    async fn present_lock_gate(&self, package: &str) {
        println!("LOCK GATE: {package} is protected - `unlock {package}` or `dismiss {package}`");
    }
}

async fn cmd_run(data_dir: &Path) -> Result<()> {
    let config = ApplockConfig::load_or_default(data_dir)?;
    let provider = Arc::new(ScriptedForegroundProvider::new());
    let presenter = Arc::new(StdoutGatePresenter);
    let engine = Engine::start(
        config,
        Arc::clone(&provider) as Arc<dyn ForegroundProvider>,
        presenter as Arc<dyn GatePresenter>,
    )?;

    log::info!("run: engine started over {data_dir:?}");
    println!("applockd running.");
    println!("Commands: fg <package> | unlock <package> | dismiss <package> | status | quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("fg"), Some(package)) => {
                provider.set_foreground(package);
                engine.handle_foreground_event(package, ForegroundEventKind::WindowForeground);
                // Give the detection a beat to land before the next command,
                // so piped scripts see the gate before their unlock/dismiss.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            (Some("unlock"), Some(package)) => {
                engine.resolve_gate(package, GateOutcome::Unlocked);
                println!("{package} temporarily unlocked.");
            }
            (Some("dismiss"), Some(package)) => {
                engine.resolve_gate(package, GateOutcome::Dismissed);
            }
            (Some("status"), None) => {
                let status = engine.status()?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            (Some("quit"), None) => break,
            (None, _) => {}
            _ => println!("unrecognized command: {line}"),
        }
    }

    // Let in-flight detections drain before tearing the engine down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.shutdown();
    Ok(())
}
