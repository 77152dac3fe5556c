use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use identity_kv::{create_engine, Config, IdentityStore};
use std::io::BufRead;
use tracing_subscriber::EnvFilter;

/// Manage users and session tokens in a shared key-value engine.
#[derive(Parser, Debug)]
#[command(name = "identity-kv", version, about)]
struct Cli {
    /// Path to config.toml (default: ~/.identity-kv/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommand),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Commands that talk to the key-value engine.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Register a user and print its first token
    Register {
        name: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Check credentials and print a fresh token
    Login {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Print the user owning a token
    Whoami { token: String },
    /// Revoke a user's current token
    Logout { name: String },
    /// Exit 0 if the user exists, 1 otherwise
    Exists { name: String },
    /// List registered users, newest first
    Users {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Ping the key-value engine
    Health,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the JSON Schema of config.toml
    Schema,
}

fn read_password(flag: Option<String>) -> Result<String> {
    if let Some(p) = flag {
        return Ok(p);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("identity_kv=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config {
            action: ConfigAction::Schema,
        } => println!("{}", Config::json_schema()?),
        Commands::Store(command) => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            run(command, &config).await?;
        }
    }

    Ok(())
}

async fn run(command: StoreCommand, config: &Config) -> Result<()> {
    let engine = create_engine(&config.engine)
        .await
        .with_context(|| format!("Failed to connect to {} engine", config.engine.kind))?;
    let store = IdentityStore::new(engine, config.identity.clone());

    match command {
        StoreCommand::Register { name, password } => {
            let password = read_password(password)?;
            if store.exists_by_name(&name).await? {
                bail!("User '{name}' already exists");
            }
            let reg = store.add_user(&name, &password).await?;
            println!("uid:   {}", reg.uid);
            println!("token: {}", reg.token);
        }
        StoreCommand::Login { name, password } => {
            let password = read_password(password)?;
            if !store.authenticate(&name, &password).await? {
                bail!("Invalid username or password");
            }
            println!("{}", store.issue_auth(&name).await?);
        }
        StoreCommand::Whoami { token } => match store.find_name_for_token(&token).await? {
            Some(name) => println!("{name}"),
            None => bail!("Unknown or revoked token"),
        },
        StoreCommand::Logout { name } => {
            store.revoke_auth(&name).await?;
            println!("Token revoked for {name}");
        }
        StoreCommand::Exists { name } => {
            if !store.exists_by_name(&name).await? {
                std::process::exit(1);
            }
        }
        StoreCommand::Users { offset, limit } => {
            for name in store.list_users(offset, limit).await? {
                println!("{name}");
            }
        }
        StoreCommand::Health => {
            if !store.health_check().await {
                bail!("Engine '{}' is not reachable", config.engine.kind);
            }
            println!("ok ({})", config.engine.kind);
        }
    }

    Ok(())
}
