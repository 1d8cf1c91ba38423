use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{interaction::is_valid_score, PreferenceEvent, PreferenceEventType};

/// Upper bound on distinct preferred genres kept per user
pub const MAX_PREFERRED_GENRES: usize = 32;

/// Ordered, de-duplicated genre tokens in order of first observation
///
/// Tokens are trimmed and compared case-insensitively; the first spelling
/// seen is the one kept. Persisted and serialized as comma-joined text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreSet(Vec<String>);

impl GenreSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses comma-joined text, dropping blanks and duplicates
    pub fn parse(text: &str) -> Self {
        let mut set = Self::new();
        set.insert_all(text);
        set
    }

    /// Inserts every comma-separated token of `raw`; returns how many were new
    pub fn insert_all(&mut self, raw: &str) -> usize {
        raw.split(',').filter(|token| self.insert(token)).count()
    }

    /// Inserts a single token; returns true if it was not present yet
    pub fn insert(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || self.contains(token) {
            return false;
        }
        if self.0.len() >= MAX_PREFERRED_GENRES {
            tracing::debug!(genre = %token, "Preferred genre set is full, ignoring genre");
            return false;
        }
        self.0.push(token.to_string());
        true
    }

    /// Case-insensitive membership on the trimmed token
    pub fn contains(&self, genre: &str) -> bool {
        let genre = genre.trim();
        self.0.iter().any(|g| g.eq_ignore_ascii_case(genre))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-joined persisted form
    pub fn to_joined(&self) -> String {
        self.0.join(",")
    }
}

impl Serialize for GenreSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_joined())
    }
}

impl<'de> Deserialize<'de> for GenreSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text.map(|t| GenreSet::parse(&t)).unwrap_or_default())
    }
}

/// Per-user preference projection derived from interaction events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    pub user_id: i64,
    pub preferred_genres: GenreSet,
    pub average_rating: Option<f64>,
    pub watch_count: i64,
    pub last_updated: DateTime<Utc>,
    /// Latest rating signal, kept while `watch_count` is still zero and
    /// surfaced as `average_rating` once the user has watched something
    #[serde(skip)]
    pub rated_average: Option<f64>,
}

/// Out-of-band preference overwrite; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceUpdate {
    pub preferred_genres: Option<GenreSet>,
    pub average_rating: Option<f64>,
    pub watch_count: Option<i64>,
}

/// A state transition applied atomically to one preference row
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceMutation {
    /// A consumed bus message
    Event(PreferenceEvent),
    /// The preference-update RPC
    Update(PreferenceUpdate),
}

impl UserPreference {
    /// Default record for a user never seen before
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            preferred_genres: GenreSet::new(),
            average_rating: None,
            watch_count: 0,
            last_updated: now,
            rated_average: None,
        }
    }

    /// Applies `mutation` and stamps `last_updated`
    pub fn apply(&mut self, mutation: &PreferenceMutation, now: DateTime<Utc>) {
        match mutation {
            PreferenceMutation::Event(event) => self.apply_event(event),
            PreferenceMutation::Update(update) => self.apply_update(update),
        }
        self.enforce_invariants();
        self.last_updated = now;
    }

    fn apply_event(&mut self, event: &PreferenceEvent) {
        match event.event_type {
            PreferenceEventType::Watch => {
                let delta = event.watch_count_delta.unwrap_or(1).max(1);
                self.watch_count = self.watch_count.saturating_add(delta);
                self.record_genre(event.genre.as_deref());
            }
            PreferenceEventType::Rate => {
                if let Some(average) = event.average_rating {
                    self.record_average(average);
                }
                self.record_genre(event.genre.as_deref());
            }
            PreferenceEventType::Unknown => {}
        }
    }

    fn apply_update(&mut self, update: &PreferenceUpdate) {
        if let Some(genres) = &update.preferred_genres {
            self.preferred_genres = genres.clone();
        }
        if let Some(average) = update.average_rating {
            self.record_average(average);
        }
        if let Some(count) = update.watch_count {
            self.watch_count = count;
        }
    }

    fn record_average(&mut self, average: f64) {
        self.rated_average = Some(average);
        self.average_rating = Some(average);
    }

    fn record_genre(&mut self, genre: Option<&str>) {
        if let Some(genre) = genre {
            self.preferred_genres.insert_all(genre);
        }
    }

    /// Restores the record invariants after a mutation. A rating received
    /// while `watch_count` is zero stays in `rated_average` only.
    fn enforce_invariants(&mut self) {
        self.watch_count = self.watch_count.max(0);

        let mut signal = self.rated_average.or(self.average_rating);
        if let Some(average) = signal {
            if !is_valid_score(average) {
                tracing::warn!(
                    user_id = self.user_id,
                    average_rating = average,
                    "Discarding out-of-range average rating"
                );
                signal = None;
            }
        }

        self.rated_average = signal;
        self.average_rating = if self.watch_count > 0 { signal } else { None };
    }
}
