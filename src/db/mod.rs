pub mod interactions;
pub mod memory;
pub mod postgres;
pub mod preferences;
pub mod redis;

pub use self::interactions::{InteractionStore, PgInteractionStore};
pub use self::memory::{InMemoryInteractionStore, InMemoryPreferenceStore};
pub use self::postgres::{create_pool, run_migrations};
pub use self::preferences::{MutationOutcome, PgPreferenceStore, PreferenceStore};
pub use self::redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
