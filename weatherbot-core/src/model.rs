use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current weather for a city, as answered by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Moment the forecast was received, not a provider timestamp.
    pub made_at: DateTime<Utc>,
    pub description: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: i64,
    pub wind_speed: f64,
}

impl Forecast {
    /// Turn the forecast into a storable record for the chat message that asked for it.
    pub fn into_record(self, message_id: i64, city: &str) -> ForecastRecord {
        ForecastRecord {
            message_id,
            city: city.to_string(),
            description: self.description,
            temperature: self.temperature,
            humidity: self.humidity,
            wind_speed: self.wind_speed,
            made_at: self.made_at,
        }
    }

    /// Chat reply text.
    pub fn to_message(&self) -> String {
        format!(
            "{}\n\ntemp: {:.2} C\nfeels like: {:.2} C\n\nhum: {} %\nwind: {:.2} m/s\n",
            self.description,
            self.temperature,
            self.feels_like,
            self.humidity,
            self.wind_speed,
        )
    }
}

/// One persisted forecast observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub message_id: i64,
    pub city: String,
    pub description: String,
    pub temperature: f64,
    pub humidity: i64,
    pub wind_speed: f64,
    pub made_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("city name is empty")]
    EmptyCity,

    #[error("humidity must be positive, got {0}")]
    NonPositiveHumidity(i64),

    #[error("wind speed must be positive, got {0}")]
    NonPositiveWind(f64),
}

impl ForecastRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.city.trim().is_empty() {
            return Err(ValidationError::EmptyCity);
        }
        if self.humidity <= 0 {
            return Err(ValidationError::NonPositiveHumidity(self.humidity));
        }
        // NaN fails this comparison too.
        if !(self.wind_speed > 0.0 && self.wind_speed.is_finite()) {
            return Err(ValidationError::NonPositiveWind(self.wind_speed));
        }

        Ok(())
    }
}

/// Metric tracked by the statistics record holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    Wind,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Wind => "wind",
        }
    }

    pub const fn all() -> &'static [Metric] {
        &[Metric::Temperature, Metric::Humidity, Metric::Wind]
    }

    fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "C",
            Metric::Humidity => "%",
            Metric::Wind => "m/s",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// City holding the maximum observed value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHolder {
    pub city: String,
    pub value: f64,
}

/// Aggregate view over every stored forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastStatistics {
    pub total_records: i64,
    pub first_record_at: DateTime<Utc>,
    pub holders: BTreeMap<Metric, RecordHolder>,
}

impl ForecastStatistics {
    pub fn holder(&self, metric: Metric) -> Option<&RecordHolder> {
        self.holders.get(&metric)
    }

    /// Chat reply text.
    pub fn to_message(&self) -> String {
        let holders: String = self
            .holders
            .iter()
            .map(|(metric, holder)| {
                let precision = match metric {
                    Metric::Humidity => 0,
                    _ => 2,
                };
                format!(
                    "Top {metric}\n\t\tcity: {}\n\t\tvalue: {:.precision$} {}\n",
                    holder.city,
                    holder.value,
                    metric.unit(),
                )
            })
            .collect();

        format!(
            "Total\n\t\trecords: {}\n\t\t1st at: {}\n\n{holders}",
            self.total_records,
            self.first_record_at.to_rfc2822(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn forecast() -> Forecast {
        Forecast {
            made_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            description: "light rain".into(),
            temperature: 7.456,
            feels_like: 4.1,
            humidity: 81,
            wind_speed: 5.0,
        }
    }

    fn record() -> ForecastRecord {
        forecast().into_record(42, "Oslo")
    }

    #[test]
    fn into_record_carries_message_and_city() {
        let rec = record();

        assert_eq!(rec.message_id, 42);
        assert_eq!(rec.city, "Oslo");
        assert_eq!(rec.description, "light rain");
        assert_eq!(rec.humidity, 81);
        assert_eq!(rec.made_at, forecast().made_at);
    }

    #[test]
    fn forecast_message_layout() {
        let msg = forecast().to_message();

        assert!(msg.starts_with("light rain\n\n"));
        assert!(msg.contains("temp: 7.46 C\n"));
        assert!(msg.contains("feels like: 4.10 C\n"));
        assert!(msg.contains("hum: 81 %\n"));
        assert!(msg.contains("wind: 5.00 m/s\n"));
    }

    #[test]
    fn valid_record_passes() {
        assert_eq!(record().validate(), Ok(()));
    }

    #[test]
    fn blank_city_is_rejected() {
        let mut rec = record();
        rec.city = "   ".into();

        assert_eq!(rec.validate(), Err(ValidationError::EmptyCity));
    }

    #[test]
    fn non_positive_humidity_is_rejected() {
        let mut rec = record();
        rec.humidity = 0;

        assert_eq!(rec.validate(), Err(ValidationError::NonPositiveHumidity(0)));
    }

    #[test]
    fn non_positive_or_nan_wind_is_rejected() {
        let mut rec = record();
        rec.wind_speed = -1.5;
        assert!(matches!(rec.validate(), Err(ValidationError::NonPositiveWind(_))));

        rec.wind_speed = f64::NAN;
        assert!(matches!(rec.validate(), Err(ValidationError::NonPositiveWind(_))));
    }

    #[test]
    fn statistics_message_lists_every_holder() {
        let mut holders = BTreeMap::new();
        holders.insert(
            Metric::Temperature,
            RecordHolder {
                city: "A".into(),
                value: 30.0,
            },
        );
        holders.insert(
            Metric::Humidity,
            RecordHolder {
                city: "B".into(),
                value: 90.0,
            },
        );
        holders.insert(
            Metric::Wind,
            RecordHolder {
                city: "C".into(),
                value: 12.0,
            },
        );

        let stat = ForecastStatistics {
            total_records: 4,
            first_record_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            holders,
        };
        let msg = stat.to_message();

        assert!(msg.contains("records: 4"));
        assert!(msg.contains("1st at: Fri, 1 Mar 2024 12:00:00 +0000"));
        assert!(msg.contains("Top temperature\n\t\tcity: A\n\t\tvalue: 30.00 C"));
        assert!(msg.contains("Top humidity\n\t\tcity: B\n\t\tvalue: 90 %"));
        assert!(msg.contains("Top wind\n\t\tcity: C\n\t\tvalue: 12.00 m/s"));
    }

    #[test]
    fn metric_names() {
        let names: Vec<_> = Metric::all().iter().map(Metric::as_str).collect();
        assert_eq!(names, ["temperature", "humidity", "wind"]);
    }
}
