//! mlsdk - CLI tool for sending Mindlytics analytics events
//!
//! This tool provides commands for:
//! - Checking client configuration
//! - Tracking a single event inside a one-off session
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/mlsdk/config.toml (~/.config/mlsdk/config.toml)
//! - Logs: $XDG_STATE_HOME/mlsdk/mlsdk.log (~/.local/state/mlsdk/mlsdk.log)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mlsdk_core::{
    Client, ClientConfig, Config, Error, Properties, PropertyValue, SessionConfig, TrackEvent,
};

#[derive(Parser)]
#[command(name = "mlsdk")]
#[command(about = "Send analytics events to Mindlytics")]
#[command(version)]
struct Args {
    /// Verbose output (writes logs to the state directory)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show client configuration
    Status,

    /// Track one event in a new session
    Track {
        /// Event name
        #[arg(short, long)]
        event: String,

        /// Event property as key=value (repeatable)
        #[arg(short, long = "prop", value_name = "KEY=VALUE")]
        props: Vec<String>,

        /// Project id (default: from config)
        #[arg(long)]
        project: Option<String>,

        /// End-user id attached to the session
        #[arg(long)]
        user: Option<String>,

        /// API key (default: from config)
        #[arg(long)]
        api_key: Option<String>,

        /// Server endpoint (default: from config)
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(mlsdk_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config.client),
        Command::Track {
            event,
            props,
            project,
            user,
            api_key,
            endpoint,
        } => {
            let mut client_config = config.client;
            if let Some(api_key) = api_key {
                client_config.api_key = api_key;
            }
            if endpoint.is_some() {
                client_config.server_endpoint = endpoint;
            }
            cmd_track(client_config, event, &props, project, user).await
        }
    }
}

fn cmd_status(config: &ClientConfig) -> Result<()> {
    println!("Mindlytics Client Configuration");
    println!("===============================");
    println!();
    println!("Config file:     {}", Config::config_path().display());
    println!("Endpoint:        {}", config.endpoint());
    println!("API Key:         {}", mask_key(&config.api_key));
    println!(
        "Project ID:      {}",
        config.project_id.as_deref().unwrap_or("<not set>")
    );
    println!("Timeout:         {}s", config.timeout_secs);
    println!("Retry Budget:    {}s", config.max_retry_secs);
    println!(
        "Backoff:         {}ms initial, {}ms max",
        config.initial_backoff_ms, config.max_backoff_ms
    );
    match config.max_pending {
        Some(n) => println!("Max Pending:     {}", n),
        None => println!("Max Pending:     unbounded"),
    }
    println!("Debug:           {}", config.debug);

    println!();
    match config.validate() {
        Ok(()) => println!("Status: Ready to send"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    Ok(())
}

async fn cmd_track(
    config: ClientConfig,
    event: String,
    props: &[String],
    project: Option<String>,
    user: Option<String>,
) -> Result<()> {
    let properties = parse_properties(props)?;

    let client = Client::new(config).context("failed to create client")?;
    let mut session_config = SessionConfig {
        project_id: project,
        ..Default::default()
    };
    if let Some(user) = user {
        session_config = session_config.with_user_id(user);
    }
    let mut session = client
        .create_session(session_config)
        .context("failed to create session")?;

    tracing::info!(event = %event, "Tracking event");
    let track = TrackEvent::new(event).with_properties(properties);
    session
        .scoped(|s| {
            Box::pin(async move {
                s.track_event(track)?;
                Ok::<_, Error>(())
            })
        })
        .await
        .context("failed to track event")?;

    println!(
        "Session: {}",
        session.session_id().unwrap_or("<none>")
    );
    for (i, outcome) in session.history().iter().enumerate() {
        let marker = if outcome.errored { "FAIL" } else { "ok" };
        println!(
            "  [{}] {:>4} {} {}",
            i + 1,
            marker,
            outcome.status,
            outcome.message
        );
    }

    if session.has_errors() {
        bail!("{} delivery error(s)", session.errors().len());
    }
    Ok(())
}

/// Parse `key=value` pairs, inferring bool, integer and float values
fn parse_properties(pairs: &[String]) -> Result<Properties> {
    let mut properties = Properties::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid property '{}', expected KEY=VALUE", pair);
        };
        if key.is_empty() {
            bail!("invalid property '{}', key is empty", pair);
        }
        properties.insert(key, parse_value(value));
    }
    properties.validate()?;
    Ok(properties)
}

fn parse_value(raw: &str) -> PropertyValue {
    if let Ok(b) = raw.parse::<bool>() {
        PropertyValue::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        PropertyValue::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            PropertyValue::Float(f)
        } else {
            PropertyValue::String(raw.to_string())
        }
    } else {
        PropertyValue::String(raw.to_string())
    }
}

/// Show only the key prefix
fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return "<not set>".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    format!("{}****", prefix)
}
