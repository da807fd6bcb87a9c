use serde::{Deserialize, Serialize};

/// Push-channel event type names.  Anything else on the wire is ignored.
pub const EVENT_TYPES: [&str; 8] = [
    "INIT",
    "QUEUE_UPDATE",
    "NAME_UPDATE",
    "CURRENT_TRACK",
    "THEME_UPDATE",
    "KARAOKE_QUEUE",
    "REACTION",
    "LYRICS_UPDATE",
];

/// Raw lyrics as stored on a track or pushed by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LyricsPayload {
    #[serde(default)]
    pub synced: Option<String>,
    #[serde(default)]
    pub plain: Option<String>,
}

impl LyricsPayload {
    /// Synced text if present and not blank.
    pub fn synced_text(&self) -> Option<&str> {
        self.synced.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Plain text if present and not blank.
    pub fn plain_text(&self) -> Option<&str> {
        self.plain.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.synced_text().is_none() && self.plain_text().is_none()
    }
}

/// Response of `GET /lyrics?track=&artist=`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsResponse {
    #[serde(default)]
    pub synced_lyrics: Option<String>,
    #[serde(default)]
    pub plain_lyrics: Option<String>,
}

impl From<LyricsResponse> for LyricsPayload {
    fn from(r: LyricsResponse) -> Self {
        Self {
            synced: r.synced_lyrics,
            plain: r.plain_lyrics,
        }
    }
}

/// A playable track as the backend describes it.
///
/// `uri` is the stable identity.  Payloads that carry neither `uri` nor `id`
/// are rejected at decode time, so a `Track` value always has an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTrack", rename_all = "camelCase")]
pub struct Track {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
    /// Server epoch milliseconds at which playback started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(rename = "duration_ms", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<LyricsPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub is_fallback: bool,
}

impl Track {
    /// Identity used for transition detection and de-duplication.
    pub fn identity(&self) -> &str {
        &self.uri
    }

    pub fn same_identity(&self, other: &Track) -> bool {
        self.uri == other.uri
    }

    /// Minimal constructor, mostly for tests and fixtures.
    pub fn new(uri: impl Into<String>, name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            id: None,
            name: name.into(),
            artist: artist.into(),
            album: None,
            album_art: None,
            started_at: None,
            duration_ms: None,
            lyrics: None,
            added_by: None,
            votes: 0,
            is_fallback: false,
        }
    }

    pub fn with_timing(mut self, started_at: i64, duration_ms: u64) -> Self {
        self.started_at = Some(started_at);
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_lyrics(mut self, lyrics: LyricsPayload) -> Self {
        self.lyrics = Some(lyrics);
        self
    }
}

/// Lenient wire shape.  The backend mixes naming conventions between its
/// Spotify and karaoke paths, and JS numbers may arrive as floats.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrack {
    uri: Option<String>,
    id: Option<String>,
    name: Option<String>,
    title: Option<String>,
    artist: Option<String>,
    singer: Option<String>,
    album: Option<String>,
    album_art: Option<String>,
    thumb: Option<String>,
    started_at: Option<f64>,
    #[serde(rename = "duration_ms")]
    duration_ms: Option<f64>,
    duration: Option<f64>,
    lyrics: Option<LyricsPayload>,
    added_by: Option<String>,
    votes: Option<f64>,
    is_fallback: Option<bool>,
}

impl TryFrom<RawTrack> for Track {
    type Error = String;

    fn try_from(raw: RawTrack) -> Result<Self, Self::Error> {
        let uri = raw
            .uri
            .filter(|u| !u.is_empty())
            .or_else(|| raw.id.clone().filter(|i| !i.is_empty()))
            .ok_or_else(|| "track has neither uri nor id".to_string())?;

        let duration_ms = raw
            .duration_ms
            .or(raw.duration)
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u64);

        Ok(Self {
            uri,
            id: raw.id,
            name: raw.name.or(raw.title).unwrap_or_default(),
            artist: raw.artist.or(raw.singer).unwrap_or_default(),
            album: raw.album,
            album_art: raw.album_art.or(raw.thumb),
            started_at: raw
                .started_at
                .filter(|t| t.is_finite())
                .map(|t| t.round() as i64),
            duration_ms,
            lyrics: raw.lyrics,
            added_by: raw.added_by,
            votes: raw
                .votes
                .filter(|v| v.is_finite())
                .map(|v| v.round().max(0.0) as u32)
                .unwrap_or(0),
            is_fallback: raw.is_fallback.unwrap_or(false),
        })
    }
}

/// One entry of the karaoke performance queue.  Only the fields the mirror
/// renders are typed; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub singer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Projector layout selected by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Standard,
    Monitor,
    Carousel,
}

impl ViewMode {
    /// Unknown theme names fall back to `Standard`.
    pub fn from_theme(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "monitor" => ViewMode::Monitor,
            "carousel" => ViewMode::Carousel,
            _ => ViewMode::Standard,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ViewMode::Standard => "standard",
            ViewMode::Monitor => "monitor",
            ViewMode::Carousel => "carousel",
        }
    }
}

/// Mode flags as returned by `GET /theme` and pushed in `THEME_UPDATE`.
/// Every field is optional: absent means "leave the mirror as it is".
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSnapshot {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub is_karaoke_mode: Option<bool>,
    /// `Some(None)` is an explicit null (video cleared).
    #[serde(default, deserialize_with = "explicit_null")]
    pub youtube_id: Option<Option<String>>,
    #[serde(default)]
    pub show_lyrics: Option<bool>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub lyrics_delay_ms: Option<i64>,
    #[serde(default)]
    pub karaoke_queue: Option<Vec<KaraokeEntry>>,
}

impl ThemeSnapshot {
    pub fn view_mode(&self) -> Option<ViewMode> {
        self.theme.as_deref().map(ViewMode::from_theme)
    }
}

/// Keeps a present-but-null field distinct from an absent one.
fn explicit_null<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Integer that may arrive as a JS float.
fn lenient_int<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(de)?
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64))
}

/// Response of `GET /name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameResponse {
    #[serde(default)]
    pub name: Option<String>,
}

/// Catch-up snapshot sent once per (re)connection.  The backend's frame
/// carries the mode flags and the playing track's lyrics but usually not
/// the track itself; an absent `currentTrack` leaves now-playing alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    #[serde(flatten)]
    pub theme: ThemeSnapshot,
    /// `Some(None)` is an explicit null (nothing playing).
    #[serde(default, deserialize_with = "explicit_null")]
    pub current_track: Option<Option<Track>>,
    #[serde(default)]
    pub current_lyrics: Option<LyricsPayload>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeQueuePayload {
    #[serde(default)]
    pub karaoke_queue: Vec<KaraokeEntry>,
}

/// `REACTION` payload.  The backend stamps `id` with its own clock; the
/// mirror assigns its own id, so this one is informational.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub emoji: String,
}

/// Push-channel message, one variant per event type.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Init(Box<InitPayload>),
    QueueUpdate(Vec<Track>),
    NameUpdate(String),
    CurrentTrack(Option<Track>),
    ThemeUpdate(ThemeSnapshot),
    KaraokeQueue(Vec<KaraokeEntry>),
    Reaction(ReactionPayload),
    /// `track` is the uri the lyrics belong to, when the backend says.
    LyricsUpdate {
        lyrics: Option<LyricsPayload>,
        track: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ChannelEvent {
    /// Decode one `{type, payload}` envelope.
    ///
    /// `Ok(None)` means a well-formed envelope of a type this client does not
    /// handle; callers drop it.  `Err` means the JSON or payload shape was
    /// malformed.
    pub fn decode(data: &str) -> anyhow::Result<Option<Self>> {
        let env: Envelope = serde_json::from_str(data)?;
        let payload = env.payload;
        let evt = match env.kind.as_str() {
            "INIT" => ChannelEvent::Init(Box::new(serde_json::from_value(payload)?)),
            "QUEUE_UPDATE" => ChannelEvent::QueueUpdate(serde_json::from_value(payload)?),
            "NAME_UPDATE" => {
                let name: NameResponse = serde_json::from_value(payload)?;
                match name.name {
                    Some(n) => ChannelEvent::NameUpdate(n),
                    None => anyhow::bail!("NAME_UPDATE without name"),
                }
            }
            "CURRENT_TRACK" => ChannelEvent::CurrentTrack(serde_json::from_value(payload)?),
            "THEME_UPDATE" => ChannelEvent::ThemeUpdate(serde_json::from_value(payload)?),
            "KARAOKE_QUEUE" => {
                let q: KaraokeQueuePayload = serde_json::from_value(payload)?;
                ChannelEvent::KaraokeQueue(q.karaoke_queue)
            }
            "REACTION" => ChannelEvent::Reaction(serde_json::from_value(payload)?),
            "LYRICS_UPDATE" => {
                // Arrives either wrapped (`{lyrics, trackUri}`) or bare.
                let (inner, track) = match payload {
                    serde_json::Value::Object(mut map) if map.contains_key("lyrics") => {
                        let track = map
                            .remove("trackUri")
                            .and_then(|v| v.as_str().map(str::to_string));
                        (map.remove("lyrics").unwrap_or_default(), track)
                    }
                    other => (other, None),
                };
                ChannelEvent::LyricsUpdate {
                    lyrics: serde_json::from_value(inner)?,
                    track,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(evt))
    }

    /// Wire name of this event, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Init(_) => EVENT_TYPES[0],
            ChannelEvent::QueueUpdate(_) => EVENT_TYPES[1],
            ChannelEvent::NameUpdate(_) => EVENT_TYPES[2],
            ChannelEvent::CurrentTrack(_) => EVENT_TYPES[3],
            ChannelEvent::ThemeUpdate(_) => EVENT_TYPES[4],
            ChannelEvent::KaraokeQueue(_) => EVENT_TYPES[5],
            ChannelEvent::Reaction(_) => EVENT_TYPES[6],
            ChannelEvent::LyricsUpdate { .. } => EVENT_TYPES[7],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_identity_falls_back_to_id() {
        let t: Track = serde_json::from_str(r#"{"id":"abc","name":"Song","artist":"X"}"#).unwrap();
        assert_eq!(t.identity(), "abc");

        let t: Track =
            serde_json::from_str(r#"{"uri":"spotify:track:1","id":"abc","name":"Song"}"#).unwrap();
        assert_eq!(t.identity(), "spotify:track:1");
    }

    #[test]
    fn test_track_without_identity_is_rejected() {
        assert!(serde_json::from_str::<Track>(r#"{"name":"Nameless"}"#).is_err());
    }

    #[test]
    fn test_track_duration_aliases() {
        let a: Track =
            serde_json::from_str(r#"{"uri":"u","duration_ms":215000,"startedAt":1700000000000}"#)
                .unwrap();
        assert_eq!(a.duration_ms, Some(215000));
        assert_eq!(a.started_at, Some(1_700_000_000_000));

        let b: Track = serde_json::from_str(r#"{"uri":"u","duration":180000.0}"#).unwrap();
        assert_eq!(b.duration_ms, Some(180000));
    }

    #[test]
    fn test_track_survives_store_roundtrip() {
        let t = Track::new("u1", "One", "Artist").with_timing(10, 20);
        let json = serde_json::to_string(&t).unwrap();
        let back: Track = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_theme_explicit_null_youtube() {
        let t: ThemeSnapshot = serde_json::from_str(r#"{"youtubeId":null}"#).unwrap();
        assert_eq!(t.youtube_id, Some(None));
        let t: ThemeSnapshot = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(t.youtube_id, None);
    }

    #[test]
    fn test_view_mode_from_theme() {
        assert_eq!(ViewMode::from_theme("monitor"), ViewMode::Monitor);
        assert_eq!(ViewMode::from_theme("Carousel"), ViewMode::Carousel);
        assert_eq!(ViewMode::from_theme("neon"), ViewMode::Standard);
    }

    #[test]
    fn test_decode_unknown_type_is_none() {
        let evt = ChannelEvent::decode(r#"{"type":"QUIZ_TICK","payload":{"n":1}}"#).unwrap();
        assert!(evt.is_none());
    }

    #[test]
    fn test_decode_malformed_is_err() {
        assert!(ChannelEvent::decode("not json").is_err());
        assert!(ChannelEvent::decode(r#"{"type":"QUEUE_UPDATE","payload":{"oops":1}}"#).is_err());
    }

    #[test]
    fn test_decode_lyrics_update_both_shapes() {
        let wrapped =
            ChannelEvent::decode(r#"{"type":"LYRICS_UPDATE","payload":{"lyrics":{"synced":"[00:01.00]a","plain":null},"trackUri":"spotify:track:1"}}"#)
                .unwrap();
        match wrapped {
            Some(ChannelEvent::LyricsUpdate {
                lyrics: Some(l),
                track,
            }) => {
                assert_eq!(l.synced.as_deref(), Some("[00:01.00]a"));
                assert_eq!(track.as_deref(), Some("spotify:track:1"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let bare = ChannelEvent::decode(r#"{"type":"LYRICS_UPDATE","payload":{"plain":"words"}}"#)
            .unwrap();
        match bare {
            Some(ChannelEvent::LyricsUpdate {
                lyrics: Some(l),
                track: None,
            }) => {
                assert_eq!(l.plain.as_deref(), Some("words"));
                assert!(l.synced.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lyrics_update_with_null_lyrics() {
        let evt = ChannelEvent::decode(
            r#"{"type":"LYRICS_UPDATE","payload":{"lyrics":null,"trackUri":"spotify:track:9"}}"#,
        )
        .unwrap();
        match evt {
            Some(ChannelEvent::LyricsUpdate { lyrics: None, track }) => {
                assert_eq!(track.as_deref(), Some("spotify:track:9"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_init_current_track_absent_vs_null() {
        let absent: InitPayload = serde_json::from_str(r#"{"theme":"standard"}"#).unwrap();
        assert_eq!(absent.current_track, None);

        let null: InitPayload = serde_json::from_str(r#"{"currentTrack":null}"#).unwrap();
        assert_eq!(null.current_track, Some(None));

        let some: InitPayload =
            serde_json::from_str(r#"{"currentTrack":{"uri":"u","name":"N"}}"#).unwrap();
        assert_eq!(some.current_track.flatten().map(|t| t.uri), Some("u".to_string()));
    }

    #[test]
    fn test_float_numbers_do_not_fail_decode() {
        let theme: ThemeSnapshot = serde_json::from_str(r#"{"lyricsDelayMs":1500.5}"#).unwrap();
        assert_eq!(theme.lyrics_delay_ms, Some(1501));
        let theme: ThemeSnapshot = serde_json::from_str(r#"{"lyricsDelayMs":null}"#).unwrap();
        assert_eq!(theme.lyrics_delay_ms, None);

        let t: Track = serde_json::from_str(r#"{"uri":"u","votes":-2}"#).unwrap();
        assert_eq!(t.votes, 0);
        let t: Track = serde_json::from_str(r#"{"uri":"u","votes":2.0}"#).unwrap();
        assert_eq!(t.votes, 2);
    }

    #[test]
    fn test_decode_current_track_null() {
        match ChannelEvent::decode(r#"{"type":"CURRENT_TRACK","payload":null}"#).unwrap() {
            Some(ChannelEvent::CurrentTrack(None)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
