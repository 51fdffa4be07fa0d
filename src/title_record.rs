//! Title identifiers and the metadata records cached for them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// Numeric streaming-site title id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct TitleId(pub u64);

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TitleId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|err| format!("invalid title id '{value}': {err}"))
    }
}

/// Service-assigned handle for one dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata for one title. Partial records are normal, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TitleRecord {
    /// Row id assigned by the metadata service.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub netflix_id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    /// `movie`, `show`, ... as reported by the service.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    /// Runtime in seconds.
    #[serde(default)]
    pub runtime: Option<u32>,
    /// Google users' score, 0-100.
    #[serde(default)]
    pub google_users_rating: Option<u32>,
}

impl TitleRecord {
    /// Rating text shown on a title card overlay.
    pub fn rating_label(&self) -> String {
        self.google_users_rating
            .map(|rating| rating.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Decoded `{ "<title id>": record }` mapping from one stream message or bulk reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleFragment {
    pub entries: Vec<(TitleId, TitleRecord)>,
}

impl TitleFragment {
    pub fn title_ids(&self) -> Vec<TitleId> {
        self.entries.iter().map(|(title_id, _)| *title_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses raw JSON text. See [`TitleFragment::from_value`].
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| format!("invalid JSON: {err}"))?;
        Self::from_value(value)
    }

    /// Converts a JSON object keyed by title id. Any bad key or record rejects
    /// the whole fragment; `null` values are dropped.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(object) = value else {
            return Err("expected a JSON object keyed by title id".to_string());
        };
        let mut ordered = BTreeMap::new();
        for (key, record_value) in object {
            let title_id = key.parse::<TitleId>()?;
            if record_value.is_null() {
                continue;
            }
            let record: TitleRecord = serde_json::from_value(record_value)
                .map_err(|err| format!("invalid record for title {title_id}: {err}"))?;
            ordered.insert(title_id, record);
        }
        Ok(Self {
            entries: ordered.into_iter().collect(),
        })
    }
}
