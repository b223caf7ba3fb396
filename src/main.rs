//! Routewise CLI - sign in and issue authenticated requests against the
//! Routewise backend from a terminal.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use routewise::api::ApiRequest;
use routewise::{ApiClient, Config, TerminationReason, TokenStore};

const USAGE: &str = "\
Usage: routewise <command> [args]

Commands:
  login <email>            Sign in (password is prompted)
  signup <name> <email>    Create an account (password is prompted)
  logout                   Forget the stored session
  status                   Show the stored session
  get <path>               GET a backend path and print the result
  post <path> [json]       POST a JSON body to a backend path and print the result
  config [<key> <value>]   Show the configuration, or change one setting";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// The CLI's unauthenticated entry point: tell the user to sign in again.
fn on_session_ended(reason: TerminationReason, entry_point: &str) {
    if reason != TerminationReason::UserLogout {
        eprintln!(
            "Session ended ({}). Run `routewise login <email>` to sign in again [{}].",
            reason, entry_point
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    if command.as_str() == "config" {
        return configure(&args[1..]);
    }

    let config = Config::load()?;
    let backend = config.credential_store()?;
    let store = Arc::new(TokenStore::load(backend).context("Failed to load stored session")?);
    let client = ApiClient::new(&config, store, Arc::new(on_session_ended))
        .context("Failed to create API client")?;
    info!(base_url = %config.base_url, "Routewise CLI starting");

    match (command.as_str(), &args[1..]) {
        ("login", [email]) => login(&client, email).await,
        ("signup", [name, email]) => signup(&client, name, email).await,
        ("logout", []) => {
            client.logout();
            println!("Signed out.");
            Ok(())
        }
        ("status", []) => {
            status(&client);
            Ok(())
        }
        ("get", [path]) => {
            let result = client.send(ApiRequest::get(path.as_str())).await?;
            print_json(&result)
        }
        ("post", [path, rest @ ..]) if rest.len() <= 1 => {
            let body: Value = match rest.first() {
                Some(raw) => serde_json::from_str(raw).context("Body is not valid JSON")?,
                None => Value::Object(Default::default()),
            };
            let result = client.send(ApiRequest::post(path.as_str()).json(body)).await?;
            print_json(&result)
        }
        _ => {
            eprintln!("{}", USAGE);
            Err(anyhow::anyhow!("Unknown command: {}", args.join(" ")))
        }
    }
}

async fn login(client: &ApiClient, email: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    let session = client
        .login(email, &password)
        .await
        .context("Sign in failed")?;
    println!(
        "Signed in as {}.",
        session.user_email.as_deref().unwrap_or(email)
    );
    Ok(())
}

async fn signup(client: &ApiClient, name: &str, email: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    client
        .signup(name, email, &password)
        .await
        .context("Sign up failed")?;
    println!("Account created. Run `routewise login {}` to sign in.", email);
    Ok(())
}

fn status(client: &ApiClient) {
    let session = client.session();
    if !session.is_valid() {
        println!("Not signed in.");
        return;
    }
    println!("Signed in as {}", session.user_email.as_deref().unwrap_or("(unknown)"));
    if let Some(at) = session.signed_in_at {
        println!("Since {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Show or edit the stored config file. Environment overrides are not applied
/// so they never get written back.
fn configure(args: &[String]) -> Result<()> {
    let path = Config::config_path()?;
    let mut config = Config::load_from(&path)?;
    match args {
        [] => print_json(&serde_json::to_value(&config)?),
        [key, value] => {
            config.set(key, value)?;
            config.save_to(&path)?;
            println!("Saved {} to {}.", key, path.display());
            Ok(())
        }
        _ => Err(anyhow::anyhow!("Usage: routewise config [<key> <value>]")),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
