//! Read-only client for the Radiocult DJ roster and schedule API.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub const RADIOCULT_API_BASE_URL: &str = "https://api.radiocult.fm";

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("roster request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("roster API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("roster API error: {0}")]
    Api(String),
    #[error("invalid roster response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Rich-text document as stored by the roster API (TipTap JSON).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RichText {
    #[serde(default)]
    pub content: Vec<RichTextNode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RichTextNode {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Vec<RichTextNode>,
}

impl RichTextNode {
    fn push_plain_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
            return;
        }
        for child in &self.content {
            child.push_plain_text(out);
        }
        if !self.content.is_empty() && (self.kind == "paragraph" || self.kind == "heading") {
            out.push('\n');
        }
    }
}

impl RichText {
    /// Flatten to plain text: one line per paragraph/heading, trimmed.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for node in &self.content {
            node.push_plain_text(&mut out);
        }
        out.trim().to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ArtistSocials {
    #[serde(rename = "instagramHandle", default)]
    pub instagram_handle: Option<String>,
    #[serde(default)]
    pub soundcloud: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub station_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<RichText>,
    /// Logo URLs keyed by size (`"256x256"`, `"default"`, ...).
    #[serde(default)]
    pub logo: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub socials: ArtistSocials,
    #[serde(default)]
    pub schedule_ids: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub id: String,
    pub station_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<RichText>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub timezone: String,
}

/// Every response carries `success` plus an optional `error`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ArtistsBody {
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct ArtistBody {
    artist: Artist,
}

#[derive(Debug, Deserialize)]
struct SchedulesBody {
    schedules: Vec<ScheduleItem>,
}

#[derive(Clone)]
pub struct RosterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    station_id: String,
}

impl RosterClient {
    pub fn new(api_key: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self::with_base_url(RADIOCULT_API_BASE_URL, api_key, station_id)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        station_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            station_id: station_id.into(),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RosterError> {
        let url = format!("{}/api/station/{}/{}", self.base_url, self.station_id, path);
        debug!("roster: GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(RosterError::Status(status)),
            Err(e) => return Err(e.into()),
        };
        if !envelope.success {
            return Err(RosterError::Api(
                envelope.error.unwrap_or_else(|| "Request failed".to_string()),
            ));
        }
        envelope
            .body
            .ok_or_else(|| RosterError::Api("Request failed".to_string()))
    }

    pub async fn artists(&self) -> Result<Vec<Artist>, RosterError> {
        let body: ArtistsBody = self.request("artists", &[]).await?;
        Ok(body.artists)
    }

    pub async fn artist_by_slug(&self, slug: &str) -> Result<Artist, RosterError> {
        let body: ArtistBody = self.request(&format!("artists/{}", slug), &[]).await?;
        Ok(body.artist)
    }

    pub async fn artist_schedule(
        &self,
        artist_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduleItem>, RosterError> {
        let query = [
            ("startDate", start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("endDate", end.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ];
        let body: SchedulesBody = self
            .request(&format!("artists/{}/schedule", artist_id), &query)
            .await?;
        Ok(body.schedules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_text_plain_text() {
        let doc: RichText = serde_json::from_str(
            r#"{"type":"doc","content":[
                {"type":"heading","content":[{"type":"text","text":"Tasty"}]},
                {"type":"paragraph","content":[
                    {"type":"text","text":"Deep "},
                    {"type":"text","text":"cuts","marks":[{"type":"bold"}]}
                ]},
                {"type":"paragraph"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.plain_text(), "Tasty\nDeep cuts");
        assert_eq!(RichText::default().plain_text(), "");
    }

    #[test]
    fn test_artist_decodes_camel_case() {
        let artist: Artist = serde_json::from_str(
            r#"{"id":"a1","stationId":"s1","slug":"dj-x","name":"DJ X",
                "socials":{"instagramHandle":"djx"},"scheduleIds":["x"],
                "tags":[],"genres":["house"],"shareableLinkId":"l",
                "created":"2024-01-01T00:00:00Z","modified":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(artist.station_id, "s1");
        assert_eq!(artist.socials.instagram_handle.as_deref(), Some("djx"));
        assert_eq!(artist.genres, vec!["house".to_string()]);
    }

    #[test]
    fn test_failed_envelope() {
        let envelope: Envelope<ArtistsBody> =
            serde_json::from_str(r#"{"success":false,"error":"bad key"}"#).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("bad key"));
        assert!(envelope.body.is_none());
    }
}
