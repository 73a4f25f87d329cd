//! Fake forecast provider served by axum on an ephemeral port.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{Router, extract::Query, extract::State, http::StatusCode, routing::get};
use tokio::net::TcpListener;

pub const API_KEY: &str = "TEST_KEY";

pub const OSLO: &str = r#"{
    "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
    "main": {"temp": 7.2, "feels_like": 4.9, "pressure": 1012, "humidity": 81},
    "wind": {"speed": 4.63, "deg": 200},
    "name": "Oslo",
    "cod": 200
}"#;

const CITY_NOT_FOUND: &str = r#"{"cod":"404","message":"city not found"}"#;

#[derive(Clone, Default)]
pub struct FakeProvider {
    pub hits: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn weather(
    State(state): State<FakeProvider>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);

    if params.get("appid").map(String::as_str) != Some(API_KEY)
        || params.get("units").map(String::as_str) != Some("metric")
    {
        return (StatusCode::UNAUTHORIZED, r#"{"cod":401}"#.into());
    }

    match params.get("q").map(String::as_str).unwrap_or_default() {
        "Oslo" => (StatusCode::OK, OSLO.into()),
        "Atlantis" => (StatusCode::NOT_FOUND, CITY_NOT_FOUND.into()),
        "Bad" => (StatusCode::BAD_REQUEST, r#"{"cod":"400"}"#.into()),
        "Gateway" => (StatusCode::BAD_GATEWAY, "bad gateway".into()),
        "Garbage" => (StatusCode::OK, "<html>not json</html>".into()),
        "Slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, OSLO.into())
        }
        "Rome, Italy" => (StatusCode::OK, OSLO.replace("light rain", "sunny")),
        _ => (StatusCode::NOT_FOUND, r#"{"cod":"404"}"#.into()),
    }
}

/// Start the fake provider and return its endpoint URL.
pub async fn spawn_provider() -> (String, FakeProvider) {
    let state = FakeProvider::default();
    let app = Router::new()
        .route("/data/2.5/weather", get(weather))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/data/2.5/weather"), state)
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    format!("http://{addr}/data/2.5/weather")
}
