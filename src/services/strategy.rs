//! Recommendation strategies and the selector that picks one.
//!
//! Strategies are pure: they rank a catalog snapshot for one preference
//! record and return content ids, so the same inputs always give the same
//! output.

use std::cmp::Ordering;

use crate::models::{Content, GenreSet, UserPreference};

/// Average assumed by the rating strategy when the user has none
pub const DEFAULT_AVERAGE_RATING: f64 = 3.0;
/// How far below the user's average an item may be rated and still qualify
pub const RATING_TOLERANCE: f64 = 0.5;

pub trait RecommendationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ranks `catalog` for `preference`, returning at most `limit` ids
    fn recommend(&self, preference: &UserPreference, catalog: &[Content], limit: usize) -> Vec<i64>;
}

/// Most viewed first
pub struct TrendingStrategy;

/// Catalog order, items in the user's preferred genres first
pub struct HistoryStrategy;

/// Highest rated first among items near or above the user's average
pub struct RatingStrategy;

impl RecommendationStrategy for TrendingStrategy {
    fn name(&self) -> &'static str {
        "Trending"
    }

    fn recommend(&self, _preference: &UserPreference, catalog: &[Content], limit: usize) -> Vec<i64> {
        let mut ranked: Vec<&Content> = catalog.iter().collect();
        ranked.sort_by(|a, b| {
            b.view_count_or_zero()
                .cmp(&a.view_count_or_zero())
                .then(a.id.cmp(&b.id))
        });
        ranked.into_iter().take(limit).map(|c| c.id).collect()
    }
}

impl RecommendationStrategy for HistoryStrategy {
    fn name(&self) -> &'static str {
        "History-Based"
    }

    fn recommend(&self, preference: &UserPreference, catalog: &[Content], limit: usize) -> Vec<i64> {
        let (preferred, others) = partition_by_genre(catalog.iter(), &preference.preferred_genres);
        preferred
            .into_iter()
            .chain(others)
            .take(limit)
            .map(|c| c.id)
            .collect()
    }
}

impl RecommendationStrategy for RatingStrategy {
    fn name(&self) -> &'static str {
        "Rating-Based"
    }

    fn recommend(&self, preference: &UserPreference, catalog: &[Content], limit: usize) -> Vec<i64> {
        let min_rating = min_rating(preference.average_rating);

        let mut qualifying: Vec<&Content> = catalog
            .iter()
            .filter(|c| c.rating.is_some_and(|r| r >= min_rating))
            .collect();
        qualifying.sort_by(|a, b| by_rating_desc(a, b).then(a.id.cmp(&b.id)));

        let genres = &preference.preferred_genres;
        if genres.is_empty() {
            return qualifying.into_iter().take(limit).map(|c| c.id).collect();
        }

        let (in_genre, out_of_genre) = partition_by_genre(qualifying.into_iter(), genres);
        in_genre
            .into_iter()
            .chain(out_of_genre)
            .take(limit)
            .map(|c| c.id)
            .collect()
    }
}

/// Lowest item rating the rating strategy accepts for `average_rating`
pub fn min_rating(average_rating: Option<f64>) -> f64 {
    let average = average_rating.unwrap_or(DEFAULT_AVERAGE_RATING);
    (average - RATING_TOLERANCE).max(0.0)
}

fn by_rating_desc(a: &Content, b: &Content) -> Ordering {
    let a = a.rating.unwrap_or(0.0);
    let b = b.rating.unwrap_or(0.0);
    b.total_cmp(&a)
}

/// Splits items into (in preferred genres, the rest), keeping input order
fn partition_by_genre<'a>(
    items: impl Iterator<Item = &'a Content>,
    genres: &GenreSet,
) -> (Vec<&'a Content>, Vec<&'a Content>) {
    items.partition(|c| c.genre_token().is_some_and(|g| genres.contains(g)))
}

/// The three strategies the selector can choose from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Trending,
    History,
    Rating,
}

static TRENDING: TrendingStrategy = TrendingStrategy;
static HISTORY: HistoryStrategy = HistoryStrategy;
static RATING: RatingStrategy = RatingStrategy;

impl StrategyKind {
    pub fn strategy(self) -> &'static dyn RecommendationStrategy {
        match self {
            StrategyKind::Trending => &TRENDING,
            StrategyKind::History => &HISTORY,
            StrategyKind::Rating => &RATING,
        }
    }

    pub fn name(self) -> &'static str {
        self.strategy().name()
    }

    /// This strategy followed by the ones tried when it yields nothing
    pub fn fallback_chain(self) -> &'static [StrategyKind] {
        match self {
            StrategyKind::Trending => &[StrategyKind::Trending],
            StrategyKind::History => &[
                StrategyKind::History,
                StrategyKind::Rating,
                StrategyKind::Trending,
            ],
            StrategyKind::Rating => &[
                StrategyKind::Rating,
                StrategyKind::History,
                StrategyKind::Trending,
            ],
        }
    }
}

/// Picks the primary strategy from the two preference signals
pub fn select_strategy(watch_count: i64, average_rating: Option<f64>) -> StrategyKind {
    match (watch_count, average_rating) {
        (count, _) if count <= 0 => StrategyKind::Trending,
        (_, None) => StrategyKind::History,
        (_, Some(_)) => StrategyKind::Rating,
    }
}

/// Runs the fallback chain of `primary` and returns the first non-empty
/// ranking with the strategy that produced it. When every strategy comes up
/// empty the primary is reported with no ids.
pub fn rank(
    primary: StrategyKind,
    preference: &UserPreference,
    catalog: &[Content],
    limit: usize,
) -> (StrategyKind, Vec<i64>) {
    for &kind in primary.fallback_chain() {
        let ids = kind.strategy().recommend(preference, catalog, limit);
        if !ids.is_empty() {
            if kind != primary {
                tracing::debug!(
                    user_id = preference.user_id,
                    primary = primary.name(),
                    used = kind.name(),
                    "Fell back to another strategy"
                );
            }
            return (kind, ids);
        }
    }
    (primary, Vec::new())
}
