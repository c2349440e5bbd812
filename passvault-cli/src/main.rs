//! Passvault CLI - command-line client for the password vault service

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use passvault_cli::PassvaultClient;
use passvault_tls::{Passphrase, TransportConfig};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Passvault - remote password manager
#[derive(Parser)]
#[command(name = "passvault", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "PASSVAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    transport: TransportArgs,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TransportArgs {
    /// Trust store (PEM bundle of trusted server certificates)
    #[arg(long, global = true, env = "PASSVAULT_CLIENT_TRUST_PATH")]
    client_trust_path: Option<PathBuf>,

    /// Trust store passphrase
    #[arg(long, global = true, env = "PASSVAULT_CLIENT_TRUST_PASSPHRASE", hide_env_values = true)]
    client_trust_passphrase: Option<Passphrase>,

    /// Registry address
    #[arg(long, global = true, env = "PASSVAULT_REGISTRY_ADDRESS")]
    registry_address: Option<String>,

    /// Name the service is published under
    #[arg(long, global = true, env = "PASSVAULT_DISCOVERY_NAME")]
    discovery_name: Option<String>,

    /// Seconds allowed for connecting and the TLS handshake
    #[arg(long, global = true, env = "PASSVAULT_HANDSHAKE_TIMEOUT_SECS")]
    handshake_timeout_secs: Option<u64>,
}

#[derive(Args)]
struct Login {
    /// Username
    username: String,

    /// Master password (prompted when omitted)
    #[arg(long, env = "PASSVAULT_MASTER_SECRET", hide_env_values = true)]
    master: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new user
    Register(Login),

    /// Check a username and master password
    Login(Login),

    /// Store a password for a new service
    Add {
        #[command(flatten)]
        login: Login,
        /// Service name
        service: String,
        /// Service password (prompted when omitted)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Show the password stored for a service
    Get {
        #[command(flatten)]
        login: Login,
        /// Service name
        service: String,
    },

    /// Replace the password of an existing service
    Change {
        #[command(flatten)]
        login: Login,
        /// Service name
        service: String,
        /// New service password (prompted when omitted)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Remove a service
    Delete {
        #[command(flatten)]
        login: Login,
        /// Service name
        service: String,
    },

    /// List stored services
    List {
        #[command(flatten)]
        login: Login,
    },

    /// Interactive session: log in once, then run commands
    Shell,
}

/// Result of a command the service answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Done,
    Refused,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(Verdict::Done) => ExitCode::SUCCESS,
        Ok(Verdict::Refused) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Defaults, then the config file, then environment and flags.
fn load_config(path: Option<&PathBuf>, args: &TransportArgs) -> Result<TransportConfig> {
    let mut config = match path {
        Some(path) => TransportConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TransportConfig::default(),
    };

    if let Some(path) = &args.client_trust_path {
        config.client_trust_path = path.clone();
    }
    if let Some(passphrase) = &args.client_trust_passphrase {
        config.client_trust_passphrase = Some(passphrase.clone());
    }
    if let Some(address) = &args.registry_address {
        config.registry_address = address.clone();
    }
    if let Some(name) = &args.discovery_name {
        config.discovery_name = name.clone();
    }
    if let Some(secs) = args.handshake_timeout_secs {
        config.handshake_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

/// A command with its input checked, ready to send.
enum Plan {
    Register(Credentials),
    Login(Credentials),
    Add {
        login: Credentials,
        service: String,
        secret: Zeroizing<String>,
    },
    Get {
        login: Credentials,
        service: String,
    },
    Change {
        login: Credentials,
        service: String,
        secret: Zeroizing<String>,
    },
    Delete {
        login: Credentials,
        service: String,
    },
    List(Credentials),
    Shell,
}

type Credentials = (String, Zeroizing<String>);

/// Validate arguments and prompt for anything missing. Runs before any
/// connection is made, so bad input is reported as such.
fn plan(command: Commands) -> Result<Plan> {
    Ok(match command {
        Commands::Register(login) => Plan::Register(credentials(&login)?),
        Commands::Login(login) => Plan::Login(credentials(&login)?),
        Commands::Add {
            login,
            service,
            secret,
        } => {
            let service = required(&service, "Service name")?;
            let login = credentials(&login)?;
            let secret = secret_or_prompt(secret, &format!("Password for \"{service}\": "))?;
            Plan::Add {
                login,
                service,
                secret,
            }
        }
        Commands::Get { login, service } => Plan::Get {
            service: required(&service, "Service name")?,
            login: credentials(&login)?,
        },
        Commands::Change {
            login,
            service,
            secret,
        } => {
            let service = required(&service, "Service name")?;
            let login = credentials(&login)?;
            let secret = secret_or_prompt(secret, &format!("New password for \"{service}\": "))?;
            Plan::Change {
                login,
                service,
                secret,
            }
        }
        Commands::Delete { login, service } => Plan::Delete {
            service: required(&service, "Service name")?,
            login: credentials(&login)?,
        },
        Commands::List { login } => Plan::List(credentials(&login)?),
        Commands::Shell => Plan::Shell,
    })
}

async fn run(cli: Cli) -> Result<Verdict> {
    let config = load_config(cli.config.as_ref(), &cli.transport)?;
    let plan = plan(cli.command)?;
    let json = cli.json;

    let client = PassvaultClient::discover(&config)
        .await
        .context("failed to reach the password service")?;

    let verdict = match plan {
        Plan::Register((user, master)) => cmd_register(&client, &user, &master).await?,
        Plan::Login((user, master)) => {
            if log_in(&client, &user, &master).await? {
                println!("Logged in as: {user}");
                Verdict::Done
            } else {
                Verdict::Refused
            }
        }
        Plan::Add {
            login,
            service,
            secret,
        } => match open_session(&client, login, json).await? {
            Some(session) => session.add(&service, &secret).await?,
            None => Verdict::Refused,
        },
        Plan::Get { login, service } => match open_session(&client, login, json).await? {
            Some(session) => session.get(&service).await?,
            None => Verdict::Refused,
        },
        Plan::Change {
            login,
            service,
            secret,
        } => match open_session(&client, login, json).await? {
            Some(session) => session.change(&service, &secret).await?,
            None => Verdict::Refused,
        },
        Plan::Delete { login, service } => match open_session(&client, login, json).await? {
            Some(session) => session.delete(&service).await?,
            None => Verdict::Refused,
        },
        Plan::List(login) => match open_session(&client, login, json).await? {
            Some(session) => session.list().await?,
            None => Verdict::Refused,
        },
        Plan::Shell => cmd_shell(&client, json).await?,
    };

    client.close().await;
    Ok(verdict)
}

// ============================================================================
// Input
// ============================================================================

/// Trimmed, non-empty value or an error naming the field.
fn required(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        bail!("{what} cannot be empty.");
    }
    Ok(value.to_string())
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Read a secret without echoing it to the terminal.
fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let entered = Zeroizing::new(rpassword::prompt_password(prompt)?);
    Ok(Zeroizing::new(entered.trim().to_string()))
}

fn secret_or_prompt(value: Option<String>, prompt: &str) -> Result<Zeroizing<String>> {
    let value = match value {
        Some(value) => Zeroizing::new(value),
        None => prompt_secret(prompt)?,
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("Password cannot be empty.");
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}

fn credentials(login: &Login) -> Result<Credentials> {
    let user = login.username.trim();
    if user.is_empty() {
        bail!("Username and password cannot be empty.");
    }
    let master = secret_or_prompt(login.master.clone(), "Master Password: ")
        .context("Username and password cannot be empty.")?;
    Ok((user.to_string(), master))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_register(client: &PassvaultClient, user: &str, master: &str) -> Result<Verdict> {
    if client.register(user, master).await? {
        println!("User \"{user}\" registered. You can now log in.");
        Ok(Verdict::Done)
    } else {
        println!("Registration failed: username already exists.");
        Ok(Verdict::Refused)
    }
}

async fn log_in(client: &PassvaultClient, user: &str, master: &str) -> Result<bool> {
    let ok = client.authenticate(user, master).await?;
    if !ok {
        println!("Login failed: invalid credentials.");
    }
    Ok(ok)
}

async fn open_session(
    client: &PassvaultClient,
    (user, master): Credentials,
    json: bool,
) -> Result<Option<Session<'_>>> {
    if !log_in(client, &user, &master).await? {
        return Ok(None);
    }
    Ok(Some(Session { client, user, json }))
}

/// An authenticated user's view of the service.
struct Session<'a> {
    client: &'a PassvaultClient,
    user: String,
    json: bool,
}

impl Session<'_> {
    async fn add(&self, service: &str, secret: &str) -> Result<Verdict> {
        if self.client.add_service(&self.user, service, secret).await? {
            println!("Service \"{service}\" added.");
            Ok(Verdict::Done)
        } else {
            println!("Failed to add: service may already exist.");
            Ok(Verdict::Refused)
        }
    }

    async fn get(&self, service: &str) -> Result<Verdict> {
        match self.client.get_service(&self.user, service).await? {
            Some(secret) => {
                let secret = Zeroizing::new(secret);
                if self.json {
                    let value = serde_json::json!({ "service": service, "secret": secret.as_str() });
                    println!("{value}");
                } else {
                    println!("Password for \"{service}\": {}", secret.as_str());
                }
                Ok(Verdict::Done)
            }
            None => {
                println!("Service not found.");
                Ok(Verdict::Refused)
            }
        }
    }

    async fn change(&self, service: &str, secret: &str) -> Result<Verdict> {
        if self.client.change_service(&self.user, service, secret).await? {
            println!("Password changed for \"{service}\".");
            Ok(Verdict::Done)
        } else {
            println!("Failed to change: service not found.");
            Ok(Verdict::Refused)
        }
    }

    async fn delete(&self, service: &str) -> Result<Verdict> {
        if self.client.delete_service(&self.user, service).await? {
            println!("Service \"{service}\" deleted.");
            Ok(Verdict::Done)
        } else {
            println!("Failed to delete: service not found.");
            Ok(Verdict::Refused)
        }
    }

    async fn list(&self) -> Result<Verdict> {
        let services = self.client.list_services(&self.user).await?;
        if self.json {
            println!("{}", serde_json::to_string(&services)?);
        } else if services.is_empty() {
            println!("No services stored.");
        } else {
            println!("Services: [{}]", services.join(", "));
        }
        Ok(Verdict::Done)
    }
}

// ============================================================================
// Shell
// ============================================================================

const SHELL_HELP: &str = "Commands: add, get, change, delete, list, logout, quit";

async fn cmd_shell(client: &PassvaultClient, json: bool) -> Result<Verdict> {
    loop {
        let Some(action) = prompt_line("login, register or quit> ")? else {
            return Ok(Verdict::Done);
        };
        match action.as_str() {
            "quit" | "exit" => return Ok(Verdict::Done),
            "register" | "login" => {}
            "" => continue,
            other => {
                println!("Unknown command: {other}");
                continue;
            }
        }

        let user = prompt_line("Username: ")?.unwrap_or_default();
        let master = prompt_secret("Master Password: ")?;
        if user.is_empty() || master.is_empty() {
            println!("Username and password cannot be empty.");
            continue;
        }

        if action == "register" {
            cmd_register(client, &user, &master).await?;
            continue;
        }
        if !log_in(client, &user, &master).await? {
            continue;
        }

        println!("Logged in as: {user}");
        println!("{SHELL_HELP}");
        let session = Session { client, user, json };
        if !run_session(&session).await? {
            return Ok(Verdict::Done);
        }
    }
}

/// Command loop for a logged-in user. Returns `false` when input ends or
/// the user quits, `true` on logout.
async fn run_session(session: &Session<'_>) -> Result<bool> {
    loop {
        let Some(command) = prompt_line(&format!("{}> ", session.user))? else {
            return Ok(false);
        };

        match command.as_str() {
            "" => {}
            "add" | "get" | "change" | "delete" => {
                let service = prompt_line("Service name: ")?.unwrap_or_default();
                if service.is_empty() {
                    continue;
                }
                match command.as_str() {
                    "add" => {
                        let secret = prompt_secret(&format!("Password for \"{service}\": "))?;
                        if !secret.is_empty() {
                            session.add(&service, &secret).await?;
                        }
                    }
                    "change" => {
                        let secret = prompt_secret(&format!("New password for \"{service}\": "))?;
                        if !secret.is_empty() {
                            session.change(&service, &secret).await?;
                        }
                    }
                    "get" => {
                        session.get(&service).await?;
                    }
                    _ => {
                        session.delete(&service).await?;
                    }
                }
            }
            "list" => {
                session.list().await?;
            }
            "logout" => return Ok(true),
            "quit" | "exit" => return Ok(false),
            "help" => println!("{SHELL_HELP}"),
            other => println!("Unknown command: {other}. {SHELL_HELP}"),
        }
    }
}
