pub mod aggregator;
pub mod catalog;
pub mod fanout;
pub mod observers;
pub mod recommendations;
pub mod recorder;
pub mod strategy;

pub use aggregator::{ContentEventsLogger, PreferenceAggregator, UserEventsLogger};
pub use catalog::{CachedCatalogClient, CatalogClient, HttpCatalogClient, StaticCatalog};
pub use fanout::{EventFanout, FanoutReport, FanoutTotals, Observer};
pub use observers::{analytics_observer, recommendation_notifier, AnalyticsCounters, AnalyticsSnapshot};
pub use recommendations::{PreferenceUpdateRequest, RecommendationService};
pub use recorder::InteractionRecorder;
pub use strategy::{select_strategy, RecommendationStrategy, StrategyKind};
