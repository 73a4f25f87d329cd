//! Chat command handling, independent of the chat transport.

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::{
    pipeline::ForecastPipeline,
    provider::ForecastError,
    store::{ForecastStore, StoreError},
};

pub const START_REPLY: &str = r#"Enter "/info city_name" to forecast"#;
pub const HELP_REPLY: &str = "/info city_name - do forecast\n/stat - take statistics";
pub const UNKNOWN_COMMAND_REPLY: &str = "I don't know that command";
pub const INVALID_CITY_REPLY: &str = "invalid city, try again";
pub const UNKNOWN_CITY_REPLY: &str = "unknown city, try again";
pub const FORECAST_ERROR_REPLY: &str = "forecast error, try again";
pub const INTERNAL_ERROR_REPLY: &str = "internal error, try again";
pub const NO_STAT_REPLY: &str = "no stat data";
pub const STAT_ERROR_REPLY: &str = "could not stat, try again";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info(String),
    Stat,
    Start,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse a chat message. Anything not starting with `/` is not a command.
    ///
    /// A `@botname` suffix on the command word is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };
        let name = word.split('@').next().unwrap_or_default();

        let cmd = match name {
            "info" => Command::Info(args.to_string()),
            "stat" => Command::Stat,
            "start" => Command::Start,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        };

        Some(cmd)
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Info(_) => "info",
            Command::Stat => "stat",
            Command::Start => "start",
            Command::Help => "help",
            Command::Unknown(name) => name,
        }
    }
}

fn is_name_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{0080}'..='\u{024F}').contains(&c)
}

/// Words of Latin letters joined by a space, `-`, `'` or `". "`.
///
/// A single trailing separator is allowed, e.g. `"St. "`.
pub fn is_valid_city_name(name: &str) -> bool {
    let mut chars = name.chars().peekable();
    let mut in_word = false;
    let mut seen_letter = false;

    while let Some(c) = chars.next() {
        if is_name_letter(c) {
            in_word = true;
            seen_letter = true;
            continue;
        }

        if !in_word {
            return false;
        }

        match c {
            ' ' | '-' | '\'' => {}
            '.' => {
                if chars.next() != Some(' ') {
                    return false;
                }
            }
            _ => return false,
        }
        in_word = false;
    }

    seen_letter
}

/// Turns chat commands into forecasts, stored records and statistics.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pipeline: ForecastPipeline,
    store: ForecastStore,
}

impl Dispatcher {
    pub fn new(pipeline: ForecastPipeline, store: ForecastStore) -> Self {
        Self { pipeline, store }
    }

    /// Handle one incoming chat message and return the reply, if any.
    pub async fn handle(
        &self,
        message_id: i64,
        text: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let command = Command::parse(text)?;
        let span = info_span!("message", message_id, cmd = command.name());

        let reply = async {
            match &command {
                Command::Info(city) => self.info(message_id, city, cancel).await,
                Command::Stat => self.stat().await,
                Command::Start => START_REPLY.to_string(),
                Command::Help => HELP_REPLY.to_string(),
                Command::Unknown(_) => UNKNOWN_COMMAND_REPLY.to_string(),
            }
        }
        .instrument(span)
        .await;

        Some(reply)
    }

    async fn info(&self, message_id: i64, city: &str, cancel: &CancellationToken) -> String {
        if !is_valid_city_name(city) {
            info!(city, "invalid name");
            return INVALID_CITY_REPLY.to_string();
        }

        let forecast = match self.pipeline.forecast(city, cancel).await {
            Ok(forecast) => forecast,
            Err(err) => {
                error!(error = %err, "forecast failed");
                let reply = if matches!(err, ForecastError::CityNotFound) {
                    UNKNOWN_CITY_REPLY
                } else if err.is_provider_failure() {
                    FORECAST_ERROR_REPLY
                } else {
                    INTERNAL_ERROR_REPLY
                };
                return reply.to_string();
            }
        };
        debug!(?forecast, "forecast respond");

        let reply = forecast.to_message();
        let record = forecast.into_record(message_id, city);

        if let Err(err) = self.store.insert(&record).await {
            error!(error = %err, "failed to store forecast");
        }

        reply
    }

    async fn stat(&self) -> String {
        match self.store.stat().await {
            Ok(stat) => {
                debug!(?stat, "collected stat");
                stat.to_message()
            }
            Err(StoreError::NoData) => {
                info!("no stat data");
                NO_STAT_REPLY.to_string()
            }
            Err(err) => {
                error!(error = %err, "failed to stat");
                STAT_ERROR_REPLY.to_string()
            }
        }
    }
}
