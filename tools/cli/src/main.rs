//! Lockbox CLI - command line front end for personal records.
//!
//! Notes and passwords can be stored encrypted under a key derived from the
//! login password; todos and expenses only show up in the stats.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lockbox_common::{Collection, RecordId, SensitiveString};
use lockbox_crypto::KdfParams;
use lockbox_store::StoreRegistry;
use lockbox_vault::{
    parse_tags, search, watch_stats, Content, Identity, LockboxConfig, Record, RecordAccess,
    RecordDraft, Session,
};

/// Overrides the configured store with a local directory.
const STORE_ROOT_ENV: &str = "LOCKBOX_STORE_ROOT";

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox - personal records with client-side encryption")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file.
    #[arg(short, long, env = "LOCKBOX_CONFIG", default_value = "lockbox.json")]
    config: PathBuf,

    /// User id to act as.
    #[arg(short, long, env = "LOCKBOX_USER", default_value = "local")]
    user: String,

    /// Do not prompt for the password; encrypted content stays locked.
    /// Commands that never read content never prompt.
    #[arg(long)]
    locked: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file for a local store.
    InitConfig {
        /// Directory holding the record files.
        #[arg(short, long, default_value = "lockbox-data")]
        root: PathBuf,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Manage notes.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Manage saved passwords.
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// Show how many records each collection holds.
    Stats,
}

impl Commands {
    /// Whether the command reads or writes encrypted content.
    fn needs_key(&self) -> bool {
        match self {
            Commands::Note { action } => match action {
                NoteAction::Add { plain, .. } => !plain,
                NoteAction::List { .. } => true,
                NoteAction::Delete { .. } => false,
            },
            Commands::Password { action } => match action {
                PasswordAction::Add { plain, .. } => !plain,
                PasswordAction::List { .. } => true,
                PasswordAction::Delete { .. } => false,
            },
            Commands::InitConfig { .. } | Commands::Stats => false,
        }
    }
}

#[derive(Subcommand)]
enum NoteAction {
    /// Add a note.
    Add {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        content: String,

        /// Comma-separated tags.
        #[arg(long, default_value = "")]
        tags: String,

        /// Store the content in the clear.
        #[arg(long)]
        plain: bool,
    },

    /// List notes.
    List {
        /// Only show notes whose title or content contains this text.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Delete a note.
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum PasswordAction {
    /// Add a password entry. The secret is read from the terminal.
    Add {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        website: Option<String>,

        #[arg(short = 'n', long)]
        username: Option<String>,

        /// Store the secret in the clear.
        #[arg(long)]
        plain: bool,
    },

    /// List password entries.
    List {
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Delete a password entry.
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::InitConfig {
            root,
            strength,
            force,
        } => cmd_init_config(&cli.config, root, strength, *force),

        Commands::Note { action } => match action {
            NoteAction::Add {
                title,
                content,
                tags,
                plain,
            } => {
                let draft = RecordDraft::new(title.as_str(), content.as_str())
                    .with_tags(parse_tags(tags));
                cmd_add(&cli, Collection::Notes, draft, !plain).await
            }
            NoteAction::List { search } => {
                cmd_list(&cli, Collection::Notes, search.as_deref()).await
            }
            NoteAction::Delete { id } => cmd_delete(&cli, Collection::Notes, id).await,
        },

        Commands::Password { action } => match action {
            PasswordAction::Add {
                title,
                website,
                username,
                plain,
            } => {
                let secret = prompt_password("Secret to store: ")?;
                let mut draft = RecordDraft::new(title.as_str(), secret);
                if let Some(website) = website {
                    draft = draft.with_extra("website", website.as_str());
                }
                if let Some(username) = username {
                    draft = draft.with_extra("username", username.as_str());
                }
                cmd_add(&cli, Collection::Passwords, draft, !plain).await
            }
            PasswordAction::List { search } => {
                cmd_list(&cli, Collection::Passwords, search.as_deref()).await
            }
            PasswordAction::Delete { id } => cmd_delete(&cli, Collection::Passwords, id).await,
        },

        Commands::Stats => cmd_stats(&cli).await,
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<SensitiveString> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(SensitiveString::from(password))
}

/// Load the configuration file, falling back to a local store in `./lockbox-data`.
fn load_config(path: &Path) -> Result<LockboxConfig> {
    let config = if path.exists() {
        LockboxConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        debug!(path = %path.display(), "No config file, using defaults");
        LockboxConfig::default().with_store_root("lockbox-data")
    };

    Ok(match std::env::var_os(STORE_ROOT_ENV) {
        Some(root) => config.with_store_root(PathBuf::from(root)),
        None => config,
    })
}

/// Open a session for the configured user.
///
/// The password is prompted for only when the command needs the key and
/// `--locked` was not given.
async fn open_session(cli: &Cli) -> Result<Session> {
    let config = load_config(&cli.config)?;
    let store = config
        .open_store(&StoreRegistry::with_defaults())
        .context("Failed to open store")?;

    let mut session = Session::from_config(&config, store);
    let identity = Identity::new(cli.user.as_str()).context("Invalid user id")?;
    session.login(identity).context("Failed to log in")?;

    if cli.command.needs_key() && !cli.locked {
        let password = prompt_password("Login password: ")?;
        session
            .unlock(&password)
            .await
            .context("Failed to unlock")?;
    }

    Ok(session)
}

/// Write a new configuration file.
fn cmd_init_config(path: &Path, root: &Path, strength: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }

    let kdf = KdfParams::preset(strength).context("Invalid strength")?;
    let config = LockboxConfig {
        kdf,
        ..LockboxConfig::default()
    }
    .with_store_root(root);

    config.save(path).context("Failed to write config")?;

    println!("Configuration written to {}", path.display());
    println!("  Store: {}", root.display());
    println!("  KDF memory: {} KiB", config.kdf.memory_cost);

    Ok(())
}

/// Save a new record.
async fn cmd_add(cli: &Cli, collection: Collection, draft: RecordDraft, encrypt: bool) -> Result<()> {
    if encrypt && cli.locked {
        bail!("Encrypted records need the password; drop --locked or pass --plain");
    }

    let session = open_session(cli).await?;
    let access = RecordAccess::new(&session)?;

    let id = access
        .save(collection, draft, encrypt)
        .await
        .with_context(|| format!("Failed to save to {}", collection))?;

    info!(record = %id, "Saved");
    println!("Saved {} ({})", id, if encrypt { "encrypted" } else { "plain" });

    Ok(())
}

/// List the user's records in a collection.
async fn cmd_list(cli: &Cli, collection: Collection, query: Option<&str>) -> Result<()> {
    let session = open_session(cli).await?;
    let access = RecordAccess::new(&session)?;

    let report = access
        .load(collection)
        .await
        .with_context(|| format!("Failed to load {}", collection))?;

    let shown = search(&report.records, query.unwrap_or_default());
    if shown.is_empty() {
        println!("No {} found.", collection);
        return Ok(());
    }

    for record in shown {
        print_record(record);
    }

    if report.unreadable() > 0 {
        println!("\n{} record(s) could not be read.", report.unreadable());
    }

    Ok(())
}

fn print_record(record: &Record) {
    let pin = if record.metadata.pinned { "*" } else { " " };
    println!("{} {}  {}", pin, record.id, record.metadata.title);

    for field in ["website", "username"] {
        if let Some(value) = record.metadata.extra.get(field).and_then(|v| v.as_str()) {
            println!("    {}: {}", field, value);
        }
    }
    if !record.metadata.tags.is_empty() {
        println!("    tags: {}", record.metadata.tags.join(", "));
    }
    if let Some(created) = record.metadata.created_at {
        println!("    created: {}", created.format("%Y-%m-%d %H:%M"));
    }

    match &record.content {
        Content::Available(text) => println!("    {}", text.expose()),
        Content::Locked => println!("    [locked]"),
        Content::Unreadable(reason) => println!("    [unreadable: {}]", reason),
    }
}

/// Delete one of the user's records.
async fn cmd_delete(cli: &Cli, collection: Collection, id: &str) -> Result<()> {
    let session = open_session(cli).await?;
    let access = RecordAccess::new(&session)?;

    access
        .delete(collection, &RecordId::from(id))
        .await
        .with_context(|| format!("Failed to delete {}", id))?;

    println!("Deleted {}", id);
    Ok(())
}

/// Print the first complete dashboard count.
async fn cmd_stats(cli: &Cli) -> Result<()> {
    let session = open_session(cli).await?;

    let mut watch = watch_stats(&session)
        .await
        .context("Failed to subscribe to stats")?;
    let stats = match watch.next().await {
        Some(stats) => stats.context("Failed to count records")?,
        None => bail!("Stats subscription closed"),
    };

    for collection in Collection::ALL {
        println!("{:<10} {}", collection.name(), stats.count(collection));
    }
    println!("{:<10} {}", "total", stats.total());

    Ok(())
}
