use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use omnichat_core::{
    env_api_key, ApiKey, ChatError, Config, Conversation, Message, Model, OpenAIClient, Relay,
    API_KEY_ENV,
};
use omnichat_web::{router, AppState, SessionDefaults, SessionRegistry};

#[derive(Parser)]
#[command(name = "omnichat")]
#[command(author, version, about = "Chat with OpenAI models in the browser, replies streamed live", long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the chat page (default)
    Serve {
        /// Address to listen on, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Ask a single question and stream the reply to stdout
    Ask {
        /// Your question
        question: String,
        /// Model to use
        #[arg(short, long)]
        model: Option<String>,
        /// Sampling temperature (0.0 - 2.0)
        #[arg(short, long)]
        temperature: Option<f32>,
    },
    /// List selectable models
    Models,
    /// Write a config file with the default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => serve(&config, bind).await?,
        Commands::Ask {
            question,
            model,
            temperature,
        } => ask(&config, &question, model, temperature).await?,
        Commands::Models => list_models(),
        Commands::InitConfig { force } => init_config(force)?,
    }

    Ok(())
}

fn client_for(config: &Config) -> OpenAIClient {
    match config.api_base_url.as_deref() {
        Some(url) => OpenAIClient::with_base_url(url),
        None => OpenAIClient::new(),
    }
}

async fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let defaults = SessionDefaults {
        api_key: env_api_key(),
        generation: config.generation()?,
    };
    if ApiKey::parse(&defaults.api_key).is_err() {
        warn!("{} is not set to a usable key; sessions must paste one", API_KEY_ENV);
    }

    let client = client_for(config);
    info!("Completion endpoint: {}", client.base_url());

    let sessions = SessionRegistry::new(defaults, Duration::from_secs(config.session_ttl_secs()));
    let app = router(AppState::new(Relay::new(Arc::new(client)), sessions));

    let address = bind.unwrap_or_else(|| config.bind_address().to_string());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {}: {}", address, e))?;

    info!("Serving omnichat on http://{}", address);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask(
    config: &Config,
    question: &str,
    model: Option<String>,
    temperature: Option<f32>,
) -> Result<()> {
    let api_key = ApiKey::parse(&env_api_key())
        .map_err(|e| anyhow!("{} (set {})", e, API_KEY_ENV))?;

    let mut generation = config.generation()?;
    if let Some(name) = model {
        let model = Model::from_str(&name).ok_or(ChatError::UnknownModel(name.clone()))?;
        generation = generation.with_model(model);
    }
    if let Some(temperature) = temperature {
        generation = generation.with_temperature(temperature)?;
    }

    let relay = Relay::new(Arc::new(client_for(config)));
    let mut conversation = Conversation::new();
    conversation.append(Message::user_text(question));

    let mut stdout = io::stdout();
    let mut write_error = None;
    relay
        .complete(&api_key, &mut conversation, &generation, |fragment| {
            echo_fragment(&mut stdout, fragment, &mut write_error)
        })
        .await?;
    if let Some(err) = write_error {
        return Err(anyhow!("Failed to write reply to stdout: {}", err));
    }
    writeln!(stdout)?;

    Ok(())
}

/// Write and flush one fragment, keeping only the first I/O error.
fn echo_fragment(out: &mut impl Write, fragment: &str, first_error: &mut Option<io::Error>) {
    if first_error.is_some() {
        return;
    }
    if let Err(err) = out.write_all(fragment.as_bytes()).and_then(|_| out.flush()) {
        *first_error = Some(err);
    }
}

fn list_models() {
    let default = Model::default();
    for model in Model::all() {
        let marker = if model == default { " (default)" } else { "" };
        println!("  • {} - {}{}", model.as_str(), model.display_name(), marker);
    }
}

fn init_config(force: bool) -> Result<()> {
    let path = Config::path()?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let path = Config::new().save()?;
    println!("Wrote {}", path.display());
    Ok(())
}
