use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use linekeep_core::secure_storage::{
    delete_default_password, load_default_password, store_default_password,
};
use linekeep_core::{DirectoryAccess, FileStore, Password, StoreError, StoreSettings};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "LINEKEEP_PASSWORD";
const KEYRING_PROFILE: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "linekeep", author, version, about = "Line-oriented text store with change tracking", long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the lines of a file
    Show {
        /// File to read (defaults to todo.txt in the storage root)
        file: Option<PathBuf>,
    },
    /// Replace a file with lines read from stdin
    Save {
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Eol::Lf)]
        eol: Eol,
    },
    /// Append lines to a file without encryption
    Append {
        file: PathBuf,
        #[arg(required = true)]
        lines: Vec<String>,
        #[arg(long, value_enum, default_value_t = Eol::Lf)]
        eol: Eol,
    },
    /// List a directory
    Ls {
        dir: PathBuf,
        /// Only list .txt files (directories are always listed)
        #[arg(long)]
        txt_only: bool,
    },
    /// Load a file and report whether it changed since
    Status { file: Option<PathBuf> },
    /// Reload a file whenever it changes outside linekeep
    Watch { file: Option<PathBuf> },
    /// Manage the default password kept in the OS keyring
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },
}

#[derive(Subcommand, Debug)]
enum PasswordAction {
    Set,
    Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Eol {
    Lf,
    Crlf,
}

impl Eol {
    fn as_str(&self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::Crlf => "\r\n",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Show { file } => {
            let (store, _changes) = open_store(config)?;
            let path = target(&store, file)?;
            let password = resolve_password(&store, &path, false)?;
            let lines = store.load(&path, password.as_ref())?;
            let mut out = std::io::stdout().lock();
            for line in lines {
                writeln!(out, "{line}")?;
            }
        }
        Commands::Save { file, eol } => {
            let (store, _changes) = open_store(config)?;
            let path = target(&store, file)?;
            let password = resolve_password(&store, &path, true)?;
            let lines = std::io::stdin()
                .lock()
                .lines()
                .collect::<std::io::Result<Vec<String>>>()?;
            let saved = store.save(&path, &lines, eol.as_str(), password.as_ref())?;
            info!(path = %saved.display(), lines = lines.len(), "saved");
        }
        Commands::Append { file, lines, eol } => {
            let (store, _changes) = open_store(config)?;
            store.append(&file, &lines, eol.as_str())?;
        }
        Commands::Ls { dir, txt_only } => {
            let (store, _changes) = open_store(config)?;
            let mut out = std::io::stdout().lock();
            for entry in store.list_entries(&dir, txt_only)? {
                let marker = if entry.is_directory { "/" } else { "" };
                writeln!(out, "{}{marker}", entry.path.display())?;
            }
        }
        Commands::Status { file } => {
            let (store, _changes) = open_store(config)?;
            let path = target(&store, file)?;
            let password = resolve_password(&store, &path, false)?;
            let lines = store.load(&path, password.as_ref())?;
            println!("file:       {}", path.display());
            println!("lines:      {}", lines.len());
            println!("version:    {}", store.version().as_str());
            println!("encrypted:  {}", store.codec().is_eligible(&path));
            println!("needs sync: {}", store.needs_sync(&path));
        }
        Commands::Watch { file } => {
            let (store, changes) = open_store(config)?;
            let path = target(&store, file)?;
            let password = resolve_password(&store, &path, false)?;
            watch_command(store, path, password, changes).await?;
        }
        Commands::Password { action } => password_command(&action)?,
    }
    Ok(())
}

/// Builds the store from settings and checks storage access. External change
/// notifications are forwarded to the returned channel.
fn open_store(config: Option<&Path>) -> Result<(Arc<FileStore>, mpsc::UnboundedReceiver<()>)> {
    let settings = match config {
        Some(path) => StoreSettings::load_from(path)?,
        None => StoreSettings::load()?,
    };
    let root = settings.storage_root()?;
    std::fs::create_dir_all(&root)?;

    let (change_tx, change_rx) = mpsc::unbounded_channel::<()>();
    let store = Arc::new(FileStore::new(
        settings,
        Arc::new(DirectoryAccess::new(&root)),
        Arc::new(move || {
            let _ = change_tx.send(());
        }),
    )?);
    if !store.is_authorized() {
        let flow = store.login_flow().map(|f| f.id()).unwrap_or("none");
        return Err(StoreError::Permission(format!(
            "{} is not writable (login flow: {flow})",
            root.display()
        ))
        .into());
    }
    Ok((store, change_rx))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "linekeep=debug,linekeep_core=debug"
    } else {
        "linekeep=info,linekeep_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn target(store: &FileStore, file: Option<PathBuf>) -> Result<PathBuf> {
    match file {
        Some(path) => Ok(path),
        None => Ok(store.default_file()?),
    }
}

async fn watch_command(
    store: Arc<FileStore>,
    path: PathBuf,
    password: Option<Password>,
    mut changes: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let lines = store.load(&path, password.as_ref())?;
    info!(path = %path.display(), lines = lines.len(), "watching for external changes");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("stopping");
                store.stop_watching();
                return Ok(());
            }
            change = changes.recv() => {
                if change.is_none() {
                    return Ok(());
                }
                if !store.needs_sync(&path) {
                    debug!("change event without new version, skipping reload");
                    continue;
                }
                let (store, path, password) = (store.clone(), path.clone(), password.clone());
                let reloaded = tokio::task::spawn_blocking(move || {
                    store.load(&path, password.as_ref())
                })
                .await?;
                match reloaded {
                    Ok(lines) => println!("reloaded: {} lines", lines.len()),
                    Err(e) => warn!(error = %e, "reload failed"),
                }
            }
        }
    }
}

fn password_command(action: &PasswordAction) -> Result<()> {
    match action {
        PasswordAction::Set => {
            let password = prompt_password_twice("New default password")?;
            store_default_password(KEYRING_PROFILE, &password)?;
            println!("Default password stored in keyring");
        }
        PasswordAction::Clear => {
            delete_default_password(KEYRING_PROFILE)?;
            println!("Default password removed");
        }
    }
    Ok(())
}

/// Environment first, then the keyring, then an interactive prompt. Only
/// consulted for encryption-eligible files.
fn resolve_password(store: &FileStore, path: &Path, confirm: bool) -> Result<Option<Password>> {
    if !store.codec().is_eligible(path) {
        return Ok(None);
    }
    if let Ok(secret) = std::env::var(PASSWORD_ENV) {
        return Ok(Some(Password::from_zeroizing(Zeroizing::new(secret))));
    }
    match load_default_password(KEYRING_PROFILE) {
        Ok(Some(password)) => return Ok(Some(password)),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "keyring unavailable"),
    }
    let secret = if confirm {
        prompt_password_twice("Password")?
    } else {
        prompt_password_once("Password")?
    };
    Ok(Some(Password::from_zeroizing(secret)))
}

fn prompt_password_once(prompt: &str) -> Result<Zeroizing<String>> {
    let pw = rpassword::prompt_password(format!("{prompt}: "))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    let first = prompt_password_once(prompt)?;
    let second = prompt_password_once("Confirm password")?;
    if *first != *second {
        return Err(anyhow!("passwords do not match"));
    }
    if first.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    Ok(first)
}
