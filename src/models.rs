use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A movie as exposed by the media catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub added_at: DateTime<Utc>,
    pub poster_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySection {
    pub key: String,
    pub title: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MovieSummary {
    pub title: String,
    pub year: Option<i32>,
    pub plex_poster: Option<String>,
    pub tmdb_poster: Option<String>,
    #[serde(rename = "ratingKey")]
    pub rating_key: i64,
}

impl MovieSummary {
    pub fn from_item(item: CatalogItem, tmdb_poster: Option<String>) -> Self {
        Self {
            title: item.title,
            year: item.year,
            plex_poster: item.poster_url,
            tmdb_poster,
            rating_key: item.id,
        }
    }
}

/// Lookback window for the recently-added listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    OneWeek,
    TwoWeeks,
    OneMonth,
    All,
}

impl TimeRange {
    /// Unknown tokens fall back to the default week.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "1 week" => TimeRange::OneWeek,
            "2 weeks" => TimeRange::TwoWeeks,
            "1 month" => TimeRange::OneMonth,
            "all" => TimeRange::All,
            _ => TimeRange::default(),
        }
    }

    /// `None` means unbounded.
    pub fn lookback_days(&self) -> Option<i64> {
        match self {
            TimeRange::OneWeek => Some(7),
            TimeRange::TwoWeeks => Some(14),
            TimeRange::OneMonth => Some(30),
            TimeRange::All => None,
        }
    }

    /// Earliest accepted `added_at`, inclusive.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lookback_days().map(|days| now - Duration::days(days))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FetchPostersRequest {
    #[serde(default)]
    pub time_range: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApplyChangesRequest {
    /// `null` and a missing key both mean "nothing selected".
    #[serde(default)]
    pub selected_movies: Option<Vec<PosterSelection>>,
}

/// `[catalog_id, poster_url]` as posted by the UI. The id arrives as a number or a string.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(from = "(serde_json::Value, serde_json::Value)")]
pub struct PosterSelection {
    pub catalog_id: String,
    pub poster_url: String,
}

impl From<(serde_json::Value, serde_json::Value)> for PosterSelection {
    fn from((id, url): (serde_json::Value, serde_json::Value)) -> Self {
        Self {
            catalog_id: value_to_text(id),
            poster_url: value_to_text(url).trim().to_string(),
        }
    }
}

impl PosterSelection {
    pub fn parsed_id(&self) -> Option<i64> {
        self.catalog_id.trim().parse().ok()
    }
}

fn value_to_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Keeps items added at or after `since`; `None` keeps everything.
pub fn filter_added_since(items: Vec<CatalogItem>, since: Option<DateTime<Utc>>) -> Vec<CatalogItem> {
    match since {
        Some(since) => items.into_iter().filter(|i| i.added_at >= since).collect(),
        None => items,
    }
}

/// Newest first. `sort_by` is stable, so equal timestamps keep catalog order.
pub fn sort_newest_first(items: &mut [CatalogItem]) {
    items.sort_by(|a, b| b.added_at.cmp(&a.added_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: i64, added_at: DateTime<Utc>) -> CatalogItem {
        CatalogItem {
            id,
            title: format!("Movie {id}"),
            year: Some(2024),
            added_at,
            poster_url: None,
        }
    }

    #[test]
    fn maps_time_range_tokens() {
        assert_eq!(TimeRange::parse("1 week").lookback_days(), Some(7));
        assert_eq!(TimeRange::parse("2 weeks").lookback_days(), Some(14));
        assert_eq!(TimeRange::parse("1 month").lookback_days(), Some(30));
        assert_eq!(TimeRange::parse("all").lookback_days(), None);
        assert_eq!(TimeRange::parse("fortnight"), TimeRange::OneWeek);
        assert_eq!(TimeRange::parse("").lookback_days(), Some(7));
    }

    #[test]
    fn boundary_item_is_included() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let since = TimeRange::OneWeek.since(now);
        let boundary = now - Duration::days(7);
        let items = vec![
            item(1, boundary),
            item(2, boundary - Duration::seconds(1)),
            item(3, now),
        ];
        let kept: Vec<i64> = filter_added_since(items, since).iter().map(|i| i.id).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn all_keeps_old_items() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let ancient = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let kept = filter_added_since(vec![item(1, ancient)], TimeRange::All.since(now));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn sorts_newest_first_keeping_ties_in_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        let mut items = vec![item(1, t0), item(2, t1), item(3, t0), item(4, t1)];
        sort_newest_first(&mut items);
        let order: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn selection_accepts_numeric_and_string_ids() {
        let parsed: Vec<PosterSelection> =
            serde_json::from_str(r#"[[123, "http://x/p.jpg"], ["456", "https://y/q.jpg"], ["abc", "ftp://z"]]"#)
                .expect("selections deserialize");
        assert_eq!(parsed[0].parsed_id(), Some(123));
        assert_eq!(parsed[1].parsed_id(), Some(456));
        assert_eq!(parsed[2].parsed_id(), None);
        assert_eq!(parsed[2].poster_url, "ftp://z");
    }

    #[test]
    fn selection_trims_poster_url() {
        let parsed: PosterSelection =
            serde_json::from_str(r#"[7, "  https://image.tmdb.org/t/p/w500/a.jpg \n"]"#).unwrap();
        assert_eq!(parsed.poster_url, "https://image.tmdb.org/t/p/w500/a.jpg");
    }

    #[test]
    fn summary_serializes_with_ui_field_names() {
        let summary = MovieSummary {
            title: "Heat".to_string(),
            year: Some(1995),
            plex_poster: None,
            tmdb_poster: Some("https://image.tmdb.org/t/p/w500/heat.jpg".to_string()),
            rating_key: 42,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["ratingKey"], 42);
        assert!(value["plex_poster"].is_null());
        assert_eq!(value["year"], 1995);
    }
}
