mod content;
mod events;
mod interaction;
mod preference;
mod recommendation;

pub use content::{Content, ContentKind};
pub use events::{
    ContentLifecycleEvent, PreferenceEvent, PreferenceEventType, UserLifecycleEvent, VideoEvent,
    PREFERENCE_EVENT_VERSION,
};
pub use interaction::{
    is_valid_score, NewRating, NewWatchEvent, Rating, RatingUpsert, WatchEvent, MAX_SCORE,
    MIN_SCORE,
};
pub use preference::{
    GenreSet, PreferenceMutation, PreferenceUpdate, UserPreference, MAX_PREFERRED_GENRES,
};
pub use recommendation::RecommendationResponse;
