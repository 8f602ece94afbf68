use clap::{Parser, Subcommand};
use log::{error, info, warn};
use reqwest::Method;
use service::{config::Config, logging::Logger, AppState};
use std::sync::atomic::AtomicBool;
use tokio::io::{AsyncBufReadExt, BufReader};
use token_auth::api::CallOptions;
use token_auth::oauth::{RedirectRequest, RedirectResponse};
use token_auth::UIError;

/// Drives the OAuth session from a terminal: the browser redirect is printed and
/// the callback URL is pasted back on stdin.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in through the browser
    Login,
    /// Print the current access token, refreshing it if needed
    Token,
    /// GET a path under the API base URL
    Call { path: String },
    /// List companies
    Companies {
        #[arg(long)]
        force_reload: bool,
    },
    /// List transactions for a company
    Transactions {
        company_id: String,
        #[arg(long)]
        force_reload: bool,
    },
    /// Show the signed in user's claims
    Userinfo,
    /// Sign out locally and at the provider
    Logout,
    /// Corrupt the stored access token so the next API call is rejected
    ExpireAccess,
    /// Corrupt the stored refresh token so the next refresh is rejected
    ExpireRefresh,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Err(e) = Logger::init_logger(&cli.config) {
        eprintln!("Failed to start logger: {e}");
    }

    let state = match AppState::new(cli.config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&state, cli.command).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(state: &AppState, command: Command) -> Result<(), UIError> {
    let authenticator = state.authenticator_ref();
    let api = state.api_client_ref();
    let redirect_active = AtomicBool::new(false);

    match command {
        Command::Login => {
            authenticator.initialize().await?;
            let launcher = |request: RedirectRequest| {
                println!("Open this URL in a browser to sign in:\n\n{}\n", request.url);
                println!(
                    "Then paste the URL starting with {} (or press Enter to cancel):",
                    request.return_uri
                );
            };
            if !authenticator.start_login(&launcher, &redirect_active).await? {
                warn!("A redirect is already in progress");
                return Ok(());
            }
            let response = read_redirect_response().await;
            authenticator.finish_login(response, &redirect_active).await?;
            info!("Signed in");
        }
        Command::Token => match authenticator.get_access_token().await? {
            Some(token) => println!("{token}"),
            None => return Err(token_auth::ErrorFactory::from_login_required()),
        },
        Command::Call { path } => {
            let response = api
                .call(&path, Method::GET, None, &CallOptions::default())
                .await?;
            println!("{}", response.body);
        }
        Command::Companies { force_reload } => {
            print_json(&api.get_companies(force_reload).await?);
        }
        Command::Transactions {
            company_id,
            force_reload,
        } => {
            print_json(&api.get_company_transactions(&company_id, force_reload).await?);
        }
        Command::Userinfo => {
            print_json(&api.get_user_info().await?);
        }
        Command::Logout => {
            authenticator.initialize().await?;
            let launcher = |request: RedirectRequest| {
                println!("Open this URL in a browser to end the provider session:\n\n{}\n", request.url);
                println!("Press Enter once the browser returns to {}", request.return_uri);
            };
            let launched = authenticator.start_logout(&launcher, &redirect_active).await;
            if matches!(launched, Ok(true)) {
                read_line().await;
            }
            authenticator.finish_logout(&redirect_active);
            launched?;
            info!("Signed out");
        }
        Command::ExpireAccess => {
            authenticator.expire_access_token().await?;
            info!("Access token expired");
        }
        Command::ExpireRefresh => {
            authenticator.expire_refresh_token().await?;
            info!("Refresh token expired");
        }
    }
    Ok(())
}

async fn read_line() -> Option<String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(line) => line,
        Err(e) => {
            warn!("Unable to read from stdin: {e}");
            None
        }
    }
}

async fn read_redirect_response() -> RedirectResponse {
    match read_line().await.map(|line| line.trim().to_string()) {
        Some(line) if !line.is_empty() => RedirectResponse::Callback(line),
        _ => RedirectResponse::Cancelled,
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn report(e: &UIError) {
    if e.is_login_required() {
        warn!("No session, run the login command first");
        return;
    }
    if e.is_redirect_cancelled() {
        info!("Redirect cancelled");
        return;
    }
    if e.is_expected_api_error() {
        warn!("{}", e.details().unwrap_or(e.user_message()));
        return;
    }
    error!("{}", e.user_message());
    for (label, value) in e.diagnostic_fields() {
        error!("  {label}: {value}");
    }
}
