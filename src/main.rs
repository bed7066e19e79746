use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pbl_session::session::models::LoginCredentials;
use pbl_session::session::redirect::LogRedirect;
use pbl_session::storage;
use pbl_session::transport::RequestDescriptor;
use pbl_session::{ClientConfig, Role, SessionStore};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pbl-session", version, about = "PBL platform session client")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "pbl.json", global = true)]
    config: String,

    /// Role to act as (student, institution_admin, platform_admin)
    #[arg(long, default_value = "student", global = true)]
    role: Role,

    /// Front-end route to derive the role from; overrides --role
    #[arg(long, global = true)]
    route: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Student login with school code and student number
    LoginStudent {
        #[arg(long)]
        school_code: String,
        #[arg(long)]
        number: String,
        #[arg(long, env = "PBL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Admin login with username
    LoginAdmin {
        #[arg(long)]
        username: String,
        #[arg(long, env = "PBL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the current user
    Whoami,
    /// Exchange the refresh credential for a new access credential
    Refresh,
    /// End the session
    Logout,
    /// Switch the student session to another tenant
    SwitchTenant { tenant_id: String },
    /// Authenticated GET against the API
    Get {
        path: String,
        /// Query parameters as key=value
        #[arg(short, long = "query")]
        query: Vec<String>,
    },
    /// Authenticated request with a JSON body
    Send {
        #[arg(value_parser = parse_method)]
        method: Method,
        path: String,
        /// JSON body
        #[arg(default_value = "{}")]
        body: String,
    },
}

fn parse_method(raw: &str) -> Result<Method, String> {
    raw.to_ascii_uppercase()
        .parse::<Method>()
        .map_err(|e| e.to_string())
}

fn parse_query(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("query parameter `{pair}` is not key=value"))
        })
        .collect()
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    pbl_session::utils::logging::init(&args.log_level);

    let config = ClientConfig::load(&args.config)?;
    let store = storage::open(&config)?;
    let role = match &args.route {
        Some(route) => {
            let has_student = storage::access_token(store.as_ref(), Role::Student.namespace()).is_some();
            Role::resolve(route, has_student)
        }
        None => args.role,
    };
    info!(role = %role, api = %config.api_base(), "starting");

    let session = SessionStore::new(&config, role, store)?;
    session.restore().await?;

    match args.command {
        Commands::LoginStudent {
            school_code,
            number,
            password,
        } => {
            let creds = LoginCredentials::student(school_code, number, password);
            session.login(&creds).await?;
            println!(
                "logged in as {}",
                session.display_name().await.unwrap_or_else(|| creds.login_name())
            );
        }
        Commands::LoginAdmin { username, password } => {
            let creds = LoginCredentials::admin(username, password);
            session.login(&creds).await?;
            println!(
                "logged in as {}",
                session.display_name().await.unwrap_or_else(|| creds.login_name())
            );
        }
        Commands::Whoami => {
            let profile = session.fetch_profile().await?;
            print_json(&serde_json::to_value(profile)?)?;
        }
        Commands::Refresh => {
            session.refresh().await?;
            println!("credential refreshed");
        }
        Commands::Logout => {
            session.logout().await;
            println!("logged out");
        }
        Commands::SwitchTenant { tenant_id } => {
            session.switch_tenant(&tenant_id).await?;
            println!("switched to tenant {tenant_id}");
        }
        Commands::Get { path, query } => {
            let dispatcher = session.dispatcher(Arc::new(LogRedirect));
            let req = parse_query(&query)?
                .into_iter()
                .fold(RequestDescriptor::get(path), |req, (k, v)| req.with_query(k, v));
            let response = dispatcher.send(req).await?;
            print_json(response.data())?;
        }
        Commands::Send { method, path, body } => {
            let dispatcher = session.dispatcher(Arc::new(LogRedirect));
            let body: Value = serde_json::from_str(&body).context("parsing JSON body")?;
            let req = RequestDescriptor::new(method, path).with_body(body);
            let response = dispatcher.send(req).await?;
            print_json(response.data())?;
        }
    }

    Ok(())
}
