use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version stamped on published preference events
pub const PREFERENCE_EVENT_VERSION: u32 = 1;

/// Interaction kind carried by a preference event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreferenceEventType {
    Watch,
    Rate,
    /// Any type this consumer does not understand; acknowledged and ignored
    #[serde(other)]
    Unknown,
}

/// Preference-update message published on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceEvent {
    /// Dedupe key; producers always set it, older payloads may lack it
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default = "default_version")]
    pub schema_version: u32,
    pub user_id: i64,
    pub event_type: PreferenceEventType,
    #[serde(default)]
    pub content_id: Option<i64>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default, alias = "watchCount")]
    pub watch_count_delta: Option<i64>,
    #[serde(default)]
    pub average_rating: Option<f64>,
}

fn default_version() -> u32 {
    PREFERENCE_EVENT_VERSION
}

impl PreferenceEvent {
    pub fn watch(user_id: i64, content_id: i64, genre: Option<String>) -> Self {
        Self {
            event_id: Some(Uuid::new_v4()),
            schema_version: PREFERENCE_EVENT_VERSION,
            user_id,
            event_type: PreferenceEventType::Watch,
            content_id: Some(content_id),
            genre,
            watch_count_delta: Some(1),
            average_rating: None,
        }
    }

    pub fn rate(user_id: i64, content_id: i64, genre: Option<String>, average_rating: f64) -> Self {
        Self {
            event_id: Some(Uuid::new_v4()),
            schema_version: PREFERENCE_EVENT_VERSION,
            user_id,
            event_type: PreferenceEventType::Rate,
            content_id: Some(content_id),
            genre,
            watch_count_delta: None,
            average_rating: Some(average_rating),
        }
    }
}

/// In-process event handed to observers after a durable write
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    VideoWatched {
        user_id: i64,
        content_id: i64,
        progress: i32,
        completed: bool,
        genre: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ContentRated {
        user_id: i64,
        content_id: i64,
        score: f64,
        average_rating: f64,
        genre: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl VideoEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            VideoEvent::VideoWatched { .. } => "VIDEO_WATCHED",
            VideoEvent::ContentRated { .. } => "CONTENT_RATED",
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            VideoEvent::VideoWatched { user_id, .. } | VideoEvent::ContentRated { user_id, .. } => {
                *user_id
            }
        }
    }

    pub fn content_id(&self) -> i64 {
        match self {
            VideoEvent::VideoWatched { content_id, .. }
            | VideoEvent::ContentRated { content_id, .. } => *content_id,
        }
    }

    pub fn genre(&self) -> Option<&str> {
        match self {
            VideoEvent::VideoWatched { genre, .. } | VideoEvent::ContentRated { genre, .. } => {
                genre.as_deref()
            }
        }
    }
}

/// Message on the `user.events` stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLifecycleEvent {
    pub user_id: i64,
    pub event_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

/// Message on the `content.events` stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentLifecycleEvent {
    pub content_id: i64,
    pub event_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
}
