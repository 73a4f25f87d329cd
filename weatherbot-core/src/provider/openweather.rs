use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::{config::ProviderConfig, model::Forecast};

use super::{ForecastError, ForecastProvider, classify_status};

pub const DEFAULT_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Current-weather client for https://openweathermap.org/current#name.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    endpoint: String,
    http: Client,
}

impl OpenWeatherClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT)
    }

    pub fn with_endpoint(
        api_key: String,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::with_endpoint(api_key.to_owned(), &config.endpoint, config.timeout())
    }

    async fn fetch_current(&self, city: &str) -> Result<Forecast, ForecastError> {
        info!(op = "get forecast", city, "requesting forecast");

        let res = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("units", "metric"),
                ("q", city),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(ForecastError::CorruptedCall)?;

        let status = res.status();
        info!(
            op = "forecast respond",
            city,
            status = status.as_u16(),
            "forecast responded",
        );

        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let body = res.text().await.map_err(ForecastError::CorruptedCall)?;
        let parsed: OwCurrentResponse =
            serde_json::from_str(&body).map_err(ForecastError::Decode)?;

        let description = parsed
            .weather
            .into_iter()
            .next()
            .map(|w| w.description)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Forecast {
            made_at: Utc::now(),
            description,
            temperature: parsed.main.temp,
            feels_like: parsed.main.feels_like,
            humidity: parsed.main.humidity,
            wind_speed: parsed.wind.speed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: i64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[async_trait]
impl ForecastProvider for OpenWeatherClient {
    async fn fetch(&self, city: &str) -> Result<Forecast, ForecastError> {
        self.fetch_current(city).await
    }
}
