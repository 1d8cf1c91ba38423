use serde::{Deserialize, Serialize};

/// Content item as served by the catalog (content service)
///
/// Ranking only reads `id`, `genre`, `rating` and `view_count`; the
/// per-variant payload is passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub view_count: Option<i64>,
    #[serde(flatten)]
    pub kind: ContentKind,
}

/// Variant-specific content fields, tagged by the catalog's `type` field
///
/// A missing, null or unrecognised `type` reads as [`ContentKind::Other`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    from = "TaggedFields"
)]
pub enum ContentKind {
    #[serde(rename_all = "camelCase")]
    Movie {
        duration: Option<i32>,
        director: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TvSeries {
        seasons: Option<i32>,
        episodes_per_season: Option<i32>,
    },
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaggedFields {
    #[serde(default, rename = "type")]
    tag: Option<String>,
    #[serde(default)]
    duration: Option<i32>,
    #[serde(default)]
    director: Option<String>,
    #[serde(default)]
    seasons: Option<i32>,
    #[serde(default)]
    episodes_per_season: Option<i32>,
}

impl From<TaggedFields> for ContentKind {
    fn from(fields: TaggedFields) -> Self {
        match fields.tag.as_deref() {
            Some("MOVIE") => ContentKind::Movie {
                duration: fields.duration,
                director: fields.director,
            },
            Some("TV_SERIES") => ContentKind::TvSeries {
                seasons: fields.seasons,
                episodes_per_season: fields.episodes_per_season,
            },
            _ => ContentKind::Other,
        }
    }
}

impl Content {
    /// Genre with surrounding whitespace removed, if any
    pub fn genre_token(&self) -> Option<&str> {
        self.genre
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    pub fn view_count_or_zero(&self) -> i64 {
        self.view_count.unwrap_or(0)
    }
}
