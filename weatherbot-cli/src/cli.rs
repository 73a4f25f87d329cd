use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use weatherbot_core::{
    Config, Dispatcher, ForecastPipeline, ForecastStore, OpenWeatherClient, StoreError,
    dispatcher::NO_STAT_REPLY,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weatherbot", version, about = "Weather chat bot")]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the provider API key and the database location.
    Configure,

    /// Show the current weather for a city and record it.
    Info {
        /// City name, e.g. "London" or "St. Petersburg".
        city: String,
    },

    /// Show statistics over every recorded forecast.
    Stat,

    /// Read chat commands ("/info London", "/stat", ...) from stdin, one per line.
    Chat,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Info { city } => {
                let bot = Bot::start().await?;
                if let Some(reply) = bot.dispatch(1, &format!("/info {city}")).await {
                    println!("{reply}");
                }
                bot.stop().await
            }
            Command::Stat => stat().await,
            Command::Chat => chat().await,
        }
    }
}

/// Everything a chat session needs, built once from config.
struct Bot {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl Bot {
    async fn start() -> Result<Self> {
        let config = load_config()?;

        info!("prepare forecast store");
        let store = ForecastStore::connect(&config.database)
            .await
            .with_context(|| format!("Failed to open forecast database: {}", config.database.url))?;

        info!("prepare forecaster");
        let client = OpenWeatherClient::from_config(&config.provider)?;
        let shutdown = CancellationToken::new();
        let (pipeline, worker) = ForecastPipeline::spawn(Arc::new(client), shutdown.clone());

        Ok(Self {
            dispatcher: Dispatcher::new(pipeline, store),
            shutdown,
            worker,
        })
    }

    async fn dispatch(&self, message_id: i64, text: &str) -> Option<String> {
        self.dispatcher.handle(message_id, text, &self.shutdown).await
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.worker.await.context("Forecast worker panicked")?;
        Ok(())
    }
}

fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    Ok(config)
}

fn configure() -> Result<()> {
    let mut config = Config::load()?;

    let api_key = Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()?;
    let database_url = Text::new("Database URL:")
        .with_default(&config.database.url)
        .prompt()?;

    config.provider.api_key = Some(api_key);
    config.database.url = database_url;
    config.save()?;

    println!(
        "Saved configuration to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}

async fn stat() -> Result<()> {
    let config = load_config()?;
    let store = ForecastStore::connect(&config.database)
        .await
        .with_context(|| format!("Failed to open forecast database: {}", config.database.url))?;

    match store.stat().await {
        Ok(stat) => println!("{}", stat.to_message()),
        Err(StoreError::NoData) => println!("{NO_STAT_REPLY}"),
        Err(err) => return Err(err).context("Failed to collect statistics"),
    }

    Ok(())
}

async fn chat() -> Result<()> {
    let bot = Bot::start().await?;

    watch_signals(bot.shutdown.clone())?;

    info!("start chat on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_id = 0;

    loop {
        let line = tokio::select! {
            _ = bot.shutdown.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read from stdin")?,
        };
        let Some(line) = line else { break };

        message_id += 1;
        if let Some(reply) = bot.dispatch(message_id, &line).await {
            println!("{reply}");
        }
    }

    bot.stop().await
}

/// Cancel `shutdown` on Ctrl-C, or on SIGTERM where the platform has one.
fn watch_signals(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut terminate = signal(SignalKind::terminate())
        .context("Failed to listen for SIGTERM")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => info!("interrupted"),
            _ = terminated => info!("terminated"),
        }
        shutdown.cancel();
    });

    Ok(())
}
