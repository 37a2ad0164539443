use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("event-snap/0.1")
        .build()
        .expect("failed to build events api client")
});

const EVENTS_PATH: &str = "/v1/events";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, String>;
}

#[derive(Default)]
pub struct ReqwestTransport;

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, String> {
        let mut builder = CLIENT.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let response = builder.send().await.map_err(|err| err.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| err.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no api token stored")]
    MissingToken,
    #[error("http error: {0}")]
    Http(String),
    #[error("events API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Client for the single `GET /v1/events` endpoint.
pub struct EventsApi {
    base_url: String,
    transport: Box<dyn HttpTransport>,
}

impl EventsApi {
    pub fn new(base_url: impl Into<String>, transport: Box<dyn HttpTransport>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }

    pub fn with_reqwest(base_url: impl Into<String>) -> Self {
        Self::new(base_url, Box::new(ReqwestTransport))
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), EVENTS_PATH)
    }

    pub async fn list_events(&self, token: &str) -> Result<Vec<Value>, RemoteError> {
        if token.trim().is_empty() {
            return Err(RemoteError::MissingToken);
        }
        let url = self.endpoint();
        tracing::debug!(url = %url, "fetching remote events");
        let headers = [
            ("Authorization", format!("Bearer {token}")),
            ("Accept", "application/json".to_string()),
        ];
        let response = self
            .transport
            .get(&url, &headers)
            .await
            .map_err(RemoteError::Http)?;

        if !(200..300).contains(&response.status) {
            return Err(api_error(&response));
        }

        let payload: Value = serde_json::from_str(&response.body)
            .map_err(|err| RemoteError::Parse(err.to_string()))?;
        match payload {
            Value::Array(events) => Ok(events),
            Value::Object(mut map) => match map.remove("events").or_else(|| map.remove("data")) {
                Some(Value::Array(events)) => Ok(events),
                _ => Err(RemoteError::Parse("expected a list of events".to_string())),
            },
            _ => Err(RemoteError::Parse("expected a list of events".to_string())),
        }
    }
}

fn api_error(response: &HttpResponse) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            StatusCode::from_u16(response.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("unknown error")
                .to_string()
        });
    RemoteError::Api {
        status: response.status,
        message,
    }
}
