use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Playback status of the station stream.  Drives UI affordances and the
/// background metadata poll cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Loading,
    Playing,
    Error,
}

impl PlaybackStatus {
    /// Short label for badges / status bar.
    pub fn badge_label(&self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "STOP",
            PlaybackStatus::Loading => "LOAD",
            PlaybackStatus::Playing => "LIVE",
            PlaybackStatus::Error => "ERR",
        }
    }
}

/// Now-playing metadata.  Every field is optional: `None` means "unknown",
/// not "empty".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Cover art image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art: Option<String>,
    /// Seconds into the current song.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<u64>,
    /// Song length in seconds; absent for a continuous stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl StreamMetadata {
    /// True when any of the song fields (title, artist, album, art) is known.
    pub fn has_song(&self) -> bool {
        self.title.is_some() || self.artist.is_some() || self.album.is_some() || self.art.is_some()
    }
}

/// Authoritative snapshot of the station stream.  Consumers only ever see
/// clones of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamState {
    pub status: PlaybackStatus,
    /// Always within `0.0..=1.0`, see [`clamp_volume`].
    pub volume: f32,
    #[serde(default)]
    pub metadata: StreamMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            volume: 1.0,
            metadata: StreamMetadata::default(),
            error: None,
        }
    }
}

/// Delivered to observers on every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChangeEvent {
    pub state: StreamState,
    pub previous_state: StreamState,
}

/// Clamp a requested volume into `0.0..=1.0`.  NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

// ── AzuraCast now-playing payload ─────────────────────────────────────────────

/// Body of `GET /api/nowplaying/<station>`, and the `np` payload of every
/// push-channel publication.  Only the fields we use are modelled.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NowPlayingResponse {
    #[serde(default)]
    pub now_playing: Option<NowPlaying>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NowPlaying {
    #[serde(default)]
    pub song: Option<Song>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub elapsed: Option<u64>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub duration: Option<u64>,
}

/// A wrongly typed field reads as text or as absent; it never fails the body.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Song {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub artist: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub album: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub art: Option<String>,
}

/// Numbers and booleans become their JSON text; arrays and objects are dropped.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(text)) => Some(text),
        Some(value @ (Value::Number(_) | Value::Bool(_))) => Some(value.to_string()),
        _ => None,
    })
}

/// Seconds may come as ints, floats or numeric strings; negatives clamp to 0,
/// fractions truncate, anything else reads as absent.
fn lenient_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    let secs = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(secs.filter(|v| v.is_finite()).map(|v| v.max(0.0) as u64))
}

impl NowPlayingResponse {
    /// Returns `None` when the payload carries no song; the caller keeps the
    /// last known metadata in that case.
    pub fn metadata(&self) -> Option<StreamMetadata> {
        let now_playing = self.now_playing.as_ref()?;
        let song = now_playing.song.as_ref()?;
        Some(StreamMetadata {
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            art: song.art.clone(),
            elapsed: now_playing.elapsed,
            duration: now_playing.duration,
        })
    }
}

// ── AzuraCast push channel (Centrifugo) ───────────────────────────────────────

/// Any frame received on the live now-playing websocket.  Both shapes are
/// optional so keep-alive frames (`{}`) decode to an empty message.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PushMessage {
    #[serde(default)]
    pub connect: Option<PushConnect>,
    #[serde(default, rename = "pub")]
    pub publication: Option<Publication>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PushConnect {
    #[serde(default)]
    pub subs: BTreeMap<String, PushSubscription>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PushSubscription {
    #[serde(default)]
    pub publications: Vec<Publication>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Publication {
    #[serde(default)]
    pub data: Option<PublicationData>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PublicationData {
    #[serde(default)]
    pub np: Option<NowPlayingResponse>,
}

impl Publication {
    fn metadata(&self) -> Option<StreamMetadata> {
        self.data.as_ref()?.np.as_ref()?.metadata()
    }
}

impl PushMessage {
    /// Decode a text frame.  Malformed frames yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Metadata updates carried by this frame, in delivery order: the last
    /// cached publication of every recovered subscription, then the live
    /// publication.
    pub fn metadata_updates(&self) -> Vec<StreamMetadata> {
        let mut updates = Vec::new();
        if let Some(connect) = &self.connect {
            for sub in connect.subs.values() {
                if let Some(metadata) = sub.publications.last().and_then(Publication::metadata) {
                    updates.push(metadata);
                }
            }
        }
        if let Some(metadata) = self.publication.as_ref().and_then(Publication::metadata) {
            updates.push(metadata);
        }
        updates
    }
}

/// Subscribe frame sent right after the push channel opens.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeMessage {
    pub subs: BTreeMap<String, SubscribeOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeOptions {
    /// Ask the server to replay its cached publications on connect.
    pub recover: bool,
}

impl SubscribeMessage {
    pub fn station(station_name: &str) -> Self {
        let mut subs = BTreeMap::new();
        subs.insert(
            format!("station:{}", station_name),
            SubscribeOptions { recover: true },
        );
        Self { subs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_playing_extracts_song_and_timeline() {
        let body = r#"{"now_playing":{"song":{"title":"A","artist":"B"},"elapsed":10,"duration":200}}"#;
        let response: NowPlayingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.metadata(),
            Some(StreamMetadata {
                title: Some("A".into()),
                artist: Some("B".into()),
                elapsed: Some(10),
                duration: Some(200),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_now_playing_without_song_is_no_update() {
        let response: NowPlayingResponse =
            serde_json::from_str(r#"{"now_playing":{"elapsed":3}}"#).unwrap();
        assert!(response.metadata().is_none());
        let response: NowPlayingResponse = serde_json::from_str("{}").unwrap();
        assert!(response.metadata().is_none());
    }

    #[test]
    fn test_lenient_seconds() {
        let body = r#"{"now_playing":{"song":{},"elapsed":12.9,"duration":-4}}"#;
        let metadata = serde_json::from_str::<NowPlayingResponse>(body)
            .unwrap()
            .metadata()
            .unwrap();
        assert_eq!(metadata.elapsed, Some(12));
        assert_eq!(metadata.duration, Some(0));

        let body = r#"{"now_playing":{"song":{"title":"A"},"elapsed":"31","duration":{"s":1}}}"#;
        let metadata = serde_json::from_str::<NowPlayingResponse>(body)
            .unwrap()
            .metadata()
            .unwrap();
        assert_eq!(metadata.elapsed, Some(31));
        assert_eq!(metadata.duration, None);
    }

    #[test]
    fn test_odd_song_fields_keep_the_update() {
        let body = r#"{"now_playing":{"song":{"title":1999,"artist":"Prince","album":["x"],"art":null},"elapsed":5}}"#;
        let metadata = serde_json::from_str::<NowPlayingResponse>(body)
            .unwrap()
            .metadata()
            .unwrap();
        assert_eq!(
            metadata,
            StreamMetadata {
                title: Some("1999".into()),
                artist: Some("Prince".into()),
                elapsed: Some(5),
                ..Default::default()
            }
        );

        let push = PushMessage::parse(
            r#"{"pub":{"data":{"np":{"now_playing":{"song":{"title":"B","artist":true}}}}}}"#,
        )
        .unwrap();
        let updates = push.metadata_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].title.as_deref(), Some("B"));
        assert_eq!(updates[0].artist.as_deref(), Some("true"));
    }

    #[test]
    fn test_push_live_publication() {
        let msg = PushMessage::parse(
            r#"{"pub":{"data":{"np":{"now_playing":{"song":{"title":"Live"}}}}}}"#,
        )
        .unwrap();
        let updates = msg.metadata_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].title.as_deref(), Some("Live"));
        assert_eq!(updates[0].artist, None);
    }

    #[test]
    fn test_push_connect_takes_last_cached_publication() {
        let msg = PushMessage::parse(
            r#"{"connect":{"time":1,"subs":{"station:radio_tasty":{"publications":[
                {"data":{"np":{"now_playing":{"song":{"title":"old"}}}}},
                {"data":{"np":{"now_playing":{"song":{"title":"new"}}}}}
            ]}}}}"#,
        )
        .unwrap();
        let updates = msg.metadata_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].title.as_deref(), Some("new"));
    }

    #[test]
    fn test_push_keepalive_and_garbage() {
        assert!(PushMessage::parse("{}").unwrap().metadata_updates().is_empty());
        assert!(PushMessage::parse("").is_none());
        assert!(PushMessage::parse("not json").is_none());
        // `pub` present but without `np` is not an update
        assert!(PushMessage::parse(r#"{"pub":{"data":{}}}"#)
            .unwrap()
            .metadata_updates()
            .is_empty());
    }

    #[test]
    fn test_subscribe_message_shape() {
        let json = serde_json::to_value(SubscribeMessage::station("radio_tasty")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"subs": {"station:radio_tasty": {"recover": true}}})
        );
    }

    #[test]
    fn test_clamp_volume() {
        for (input, expected) in [(-1.0, 0.0), (0.0, 0.0), (0.42, 0.42), (1.0, 1.0), (7.5, 1.0)] {
            assert_eq!(clamp_volume(input), expected);
        }
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(f32::INFINITY), 1.0);
    }

    #[test]
    fn test_state_serializes_lowercase_status() {
        let json = serde_json::to_value(StreamState::default()).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["volume"], 1.0);
        assert!(json.get("error").is_none());
    }
}
