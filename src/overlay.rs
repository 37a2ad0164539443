use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::db::Store;
use crate::models::{EventRecord, PageEventFields};
use crate::platform;

pub const OVERLAY_WIDTH: u32 = 560;
pub const OVERLAY_HEIGHT: u32 = 800;
pub const FRAME_SANDBOX: &str = "allow-scripts allow-forms allow-same-origin allow-popups";
pub const FRAME_REFERRER_POLICY: &str = "no-referrer";

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid widget url {url}: {reason}")]
    InvalidWidgetUrl { url: String, reason: String },
}

/// The floating container and the sandboxed frame inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayFrame {
    pub id: u64,
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub sandbox: &'static str,
    pub referrer_policy: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Messages posted by the embedded widget.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FrameMessage {
    ClosePopup,
    EventUpdate {
        title: Option<String>,
        image: Option<String>,
        date: Option<String>,
        location: Option<String>,
    },
    Auth,
}

/// Confirmation posted back to the widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameReply {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: &'static str,
}

#[derive(Default)]
struct OverlayState {
    current: Option<OverlayFrame>,
    presented: u64,
    banner: Option<ErrorBanner>,
}

pub struct OverlayPresenter {
    widget_url: String,
    trusted_origins: Vec<String>,
    banner_ttl: Duration,
    store: Arc<Store>,
    state: Mutex<OverlayState>,
}

/// Widget URL carrying the record's display fields.
pub fn frame_url(widget_url: &str, record: &EventRecord) -> Result<String, OverlayError> {
    let params = [
        ("title", record.title.clone()),
        ("image", record.image.clone().unwrap_or_default()),
        ("date", record.start_date.clone()),
        ("location", record.location.display()),
        ("source", record.source_url.clone()),
        (
            "sourceType",
            platform::source_type_for(&record.source_url).to_string(),
        ),
    ];
    Url::parse_with_params(widget_url, &params)
        .map(String::from)
        .map_err(|err| OverlayError::InvalidWidgetUrl {
            url: widget_url.to_string(),
            reason: err.to_string(),
        })
}

fn origin_of(url: &str) -> String {
    Url::parse(url)
        .map(|parsed| parsed.origin().ascii_serialization())
        .unwrap_or_else(|_| url.trim_end_matches('/').to_string())
}

impl OverlayPresenter {
    pub fn new(config: &AppConfig, store: Arc<Store>) -> Self {
        Self {
            widget_url: config.widget_url.clone(),
            trusted_origins: config.trusted_origins.iter().map(|o| origin_of(o)).collect(),
            banner_ttl: Duration::seconds(config.banner_ttl_secs),
            store,
            state: Mutex::new(OverlayState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, OverlayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replaces whatever overlay is showing with one for `record`.
    pub fn present(&self, record: &EventRecord) -> Result<OverlayFrame, OverlayError> {
        let src = frame_url(&self.widget_url, record)?;
        let mut state = self.state();
        state.presented += 1;
        let frame = OverlayFrame {
            id: state.presented,
            src,
            width: OVERLAY_WIDTH,
            height: OVERLAY_HEIGHT,
            sandbox: FRAME_SANDBOX,
            referrer_policy: FRAME_REFERRER_POLICY,
        };
        if let Some(previous) = state.current.replace(frame.clone()) {
            tracing::debug!(previous = previous.id, "removed existing overlay");
        }
        tracing::info!(id = frame.id, event = %record.id, "overlay presented");
        Ok(frame)
    }

    pub fn current(&self) -> Option<OverlayFrame> {
        self.state().current.clone()
    }

    pub fn close(&self) -> bool {
        self.state().current.take().is_some()
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        self.trusted_origins.iter().any(|trusted| trusted == origin)
    }

    /// Handles one message from the frame. Anything from an untrusted origin
    /// or with an unknown shape is dropped without a reply.
    pub fn handle_frame_message(&self, origin: &str, payload: &Value) -> Option<FrameReply> {
        if !self.is_trusted(origin) {
            tracing::warn!(origin, "ignoring frame message from untrusted origin");
            return None;
        }
        let message = match FrameMessage::deserialize(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(origin, "unrecognised frame message: {err}");
                return None;
            }
        };
        match message {
            FrameMessage::ClosePopup => {
                self.close();
                Some(FrameReply {
                    kind: "closePopupConfirmation",
                    status: "success",
                })
            }
            FrameMessage::EventUpdate {
                title,
                image,
                date,
                location,
            } => {
                let fields = PageEventFields {
                    title,
                    image,
                    date,
                    location,
                    ..Default::default()
                };
                let status = match self.store.update_page_display_fields(&fields) {
                    Ok(()) => {
                        tracing::info!(title = ?fields.title, "event updated from widget");
                        "success"
                    }
                    Err(err) => {
                        self.show_error(&format!("Failed to save event update: {err}"), Utc::now());
                        "error"
                    }
                };
                Some(FrameReply {
                    kind: "eventUpdateConfirmation",
                    status,
                })
            }
            FrameMessage::Auth => Some(FrameReply {
                kind: "auth",
                status: "auth-success",
            }),
        }
    }

    /// Raises the transient banner; a new message replaces the old one.
    pub fn show_error(&self, message: &str, now: DateTime<Utc>) -> ErrorBanner {
        tracing::warn!("{message}");
        let banner = ErrorBanner {
            message: message.to_string(),
            expires_at: now + self.banner_ttl,
        };
        self.state().banner = Some(banner.clone());
        banner
    }

    /// The banner showing at `now`, dropping it once expired.
    pub fn banner(&self, now: DateTime<Utc>) -> Option<ErrorBanner> {
        let mut state = self.state();
        if state
            .banner
            .as_ref()
            .is_some_and(|banner| now >= banner.expires_at)
        {
            state.banner = None;
        }
        state.banner.clone()
    }
}
