use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use std::sync::Arc;

use authkeep::config::{CliArgs, Command, Config};
use authkeep::identity::types::LoginRequest;
use authkeep::identity::IdentityClient;
use authkeep::session::{RefreshCoordinator, SessionContext, SessionSnapshot, SessionState};
use authkeep::store::{SessionStore, SqliteStorage};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let backend = Arc::new(SqliteStorage::open(&config.session_db_file)?);
    let store = Arc::new(SessionStore::single(backend));
    let identity = Arc::new(IdentityClient::new(&config.identity_base_url)?);
    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::clone(&identity),
        Arc::clone(&store),
    ));

    let context = SessionContext::new(store, identity, coordinator);
    context.initialize().await;

    match args.command {
        Command::Login => run_login(&context).await,
        Command::Logout => run_logout(&context).await,
        Command::Status => run_status(&context),
        Command::Watch => run_watch(&context).await,
    }
}

async fn run_login(context: &Arc<SessionContext>) -> Result<()> {
    if context.is_authenticated().await {
        println!("Already logged in; run `authkeep logout` first.");
        return Ok(());
    }

    let email: String = Input::new()
        .with_prompt("Email")
        .interact_text()
        .context("failed to read email")?;
    let password: String = Password::new()
        .with_prompt("Password")
        .interact()
        .context("failed to read password")?;

    let response = context.login(&LoginRequest { email, password }).await;
    if response.success {
        let who = response.user.map(|user| user.email).unwrap_or_default();
        println!("Logged in as {who}");
        Ok(())
    } else {
        anyhow::bail!("login failed: {}", response.message)
    }
}

async fn run_logout(context: &Arc<SessionContext>) -> Result<()> {
    let response = context.logout().await;
    if response.success {
        println!("Logged out.");
    } else {
        // the local session is gone either way
        println!("Logged out locally ({}).", response.message);
    }
    Ok(())
}

fn run_status(context: &Arc<SessionContext>) -> Result<()> {
    print_snapshot(&context.snapshot());
    Ok(())
}

async fn run_watch(context: &Arc<SessionContext>) -> Result<()> {
    let mut rx = context.subscribe();
    println!("Watching session (ctrl-c to stop)");
    print_snapshot(&context.snapshot());

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_snapshot(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    match snapshot.state {
        SessionState::Authenticated => {
            let who = snapshot
                .user
                .as_ref()
                .map(|user| user.email.as_str())
                .unwrap_or("unknown");
            println!("Session: authenticated as {who}");
        }
        SessionState::Authenticating => println!("Session: renewing..."),
        SessionState::Unauthenticated => println!("Session: not logged in"),
        SessionState::Unknown => println!("Session: not yet loaded"),
    }
    let titles: Vec<&str> = snapshot.navigation.iter().map(|item| item.title).collect();
    println!("Navigation: {}", titles.join(", "));
}
