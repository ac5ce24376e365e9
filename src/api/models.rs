use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// Tidal domain types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub duration: f64,
    pub track_number: Option<u32>,
    pub volume_number: Option<u32>,
    pub isrc: Option<String>,
    pub artist_name: String,
    pub artist_id: Option<String>,
    /// Ordered credit list; the first entry is the primary artist.
    #[serde(default)]
    pub artists: Vec<String>,
    pub album_name: String,
    pub album_id: Option<String>,
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub media_tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Track {
    pub fn artist_names(&self) -> Vec<String> {
        if self.artists.is_empty() {
            vec![self.artist_name.clone()]
        } else {
            self.artists.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub duration: Option<f64>,
    pub number_of_tracks: Option<u32>,
    pub number_of_volumes: Option<u32>,
    pub release_date: Option<String>,
    pub artwork_url: Option<String>,
    pub media_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration: Option<f64>,
    pub number_of_items: Option<u32>,
    pub playlist_type: Option<String>,
    pub artwork_url: Option<String>,
    pub creator_id: Option<String>,
}

/// Personalized mix. Mix metadata only exists on the v1 surface and in the
/// recommendations envelope, so some fields may be placeholders until a
/// recommendations fetch fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mix {
    pub id: String,
    pub title: String,
    pub sub_title: Option<String>,
    pub artwork_url: Option<String>,
}

/// A catalog entity behind a shared handle, tagged by kind.
#[derive(Debug, Clone)]
pub enum Entity {
    Track(Arc<Track>),
    Album(Arc<Album>),
    Playlist(Arc<Playlist>),
    Mix(Arc<Mix>),
    Artist(Arc<Artist>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Track(_) => EntityKind::Track,
            Entity::Album(_) => EntityKind::Album,
            Entity::Playlist(_) => EntityKind::Playlist,
            Entity::Mix(_) => EntityKind::Mix,
            Entity::Artist(_) => EntityKind::Artist,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Track(t) => &t.id,
            Entity::Album(a) => &a.id,
            Entity::Playlist(p) => &p.id,
            Entity::Mix(m) => &m.id,
            Entity::Artist(a) => &a.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Track,
    Album,
    Playlist,
    Mix,
    Artist,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Track => "track",
            EntityKind::Album => "album",
            EntityKind::Playlist => "playlist",
            EntityKind::Mix => "mix",
            EntityKind::Artist => "artist",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "track" => Some(EntityKind::Track),
            "album" => Some(EntityKind::Album),
            "playlist" => Some(EntityKind::Playlist),
            "mix" => Some(EntityKind::Mix),
            "artist" => Some(EntityKind::Artist),
            _ => None,
        }
    }
}

/// Streaming quality tiers. Persisted settings store the index; the API
/// speaks the screaming-snake strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioQuality {
    Low,
    High,
    Lossless,
    HiResLossless,
}

impl AudioQuality {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => AudioQuality::Low,
            1 => AudioQuality::High,
            3 => AudioQuality::HiResLossless,
            _ => AudioQuality::Lossless,
        }
    }

    pub fn as_index(&self) -> u8 {
        match self {
            AudioQuality::Low => 0,
            AudioQuality::High => 1,
            AudioQuality::Lossless => 2,
            AudioQuality::HiResLossless => 3,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            AudioQuality::Low => "LOW",
            AudioQuality::High => "HIGH",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::HiResLossless => "HI_RES_LOSSLESS",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(AudioQuality::Low),
            "HIGH" => Some(AudioQuality::High),
            "LOSSLESS" => Some(AudioQuality::Lossless),
            // Older playbackinfo responses report HI_RES for MQA-era tiers.
            "HI_RES" | "HI_RES_LOSSLESS" => Some(AudioQuality::HiResLossless),
            _ => None,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Stream properties resolved per playback attempt. Never cached across
/// attempts; the URL expires server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub url: String,
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub quality: AudioQuality,
}

impl StreamDescriptor {
    pub fn new(
        url: String,
        raw_codec: &str,
        sample_rate: Option<u32>,
        bit_depth: Option<u32>,
        quality: AudioQuality,
    ) -> Self {
        let codec = display_codec(raw_codec);
        // Bit depth and sample rate are meaningless noise on lossy AAC.
        let (sample_rate, bit_depth) = if codec == "AAC" {
            (None, None)
        } else {
            (sample_rate, bit_depth)
        };
        Self {
            url,
            codec,
            sample_rate,
            bit_depth,
            quality,
        }
    }
}

/// Normalize a wire codec identifier to its display name. All MP4A
/// variants present as AAC.
pub fn display_codec(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.starts_with("mp4a") {
        return "AAC".to_string();
    }
    match lower.as_str() {
        "flac" | "flac_hires" => "FLAC".to_string(),
        "aac" | "aaclc" | "heaacv1" => "AAC".to_string(),
        "mp3" => "MP3".to_string(),
        "eac3_joc" => "Atmos".to_string(),
        _ => raw.to_uppercase(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritesPage {
    pub tracks: Vec<Track>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSection {
    pub title: String,
    pub subtitle: Option<String>,
    /// Set when the section is backed by a playable mix container.
    pub mix: Option<Mix>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub tracks: Vec<Track>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub playlists: Vec<Playlist>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lyrics {
    pub track_id: String,
    pub lyrics: Option<String>,
    pub subtitles: Option<String>,
}

// Auth types
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user_id: Option<serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub country_code: String,
}

/// Resolve `{width}` and `{height}` placeholders in an artwork URL.
/// Returns the URL with placeholders replaced by the given dimensions.
pub fn resolve_artwork_url(url: &str, width: u32, height: u32) -> String {
    url.replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
}

// Artwork helpers
impl Track {
    pub fn artwork_url_sized(&self, width: u32, height: u32) -> Option<String> {
        self.artwork_url
            .as_ref()
            .map(|url| resolve_artwork_url(url, width, height))
    }

    /// Resolve artwork URL placeholders in-place with a default size.
    pub fn resolve_artwork(&mut self) {
        if let Some(ref url) = self.artwork_url {
            if url.contains("{width}") || url.contains("{height}") {
                self.artwork_url = Some(resolve_artwork_url(url, 480, 480));
            }
        }
    }
}

impl Album {
    pub fn artwork_url_sized(&self, width: u32, height: u32) -> Option<String> {
        self.artwork_url
            .as_ref()
            .map(|url| resolve_artwork_url(url, width, height))
    }

    pub fn resolve_artwork(&mut self) {
        if let Some(ref url) = self.artwork_url {
            if url.contains("{width}") || url.contains("{height}") {
                self.artwork_url = Some(resolve_artwork_url(url, 480, 480));
            }
        }
    }
}

impl Artist {
    pub fn resolve_artwork(&mut self) {
        if let Some(ref url) = self.picture_url {
            if url.contains("{width}") || url.contains("{height}") {
                self.picture_url = Some(resolve_artwork_url(url, 480, 480));
            }
        }
    }
}

impl Playlist {
    pub fn resolve_artwork(&mut self) {
        if let Some(ref url) = self.artwork_url {
            if url.contains("{width}") || url.contains("{height}") {
                self.artwork_url = Some(resolve_artwork_url(url, 480, 480));
            }
        }
    }
}

impl SearchResults {
    /// Resolve all artwork URL placeholders in search results.
    pub fn resolve_all_artwork(&mut self) {
        for track in &mut self.tracks {
            track.resolve_artwork();
        }
        for album in &mut self.albums {
            album.resolve_artwork();
        }
        for artist in &mut self.artists {
            artist.resolve_artwork();
        }
        for playlist in &mut self.playlists {
            playlist.resolve_artwork();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp4a_variants_display_as_aac() {
        assert_eq!(display_codec("mp4a.40.2"), "AAC");
        assert_eq!(display_codec("MP4A.40.5"), "AAC");
        assert_eq!(display_codec("aaclc"), "AAC");
        assert_eq!(display_codec("heaacv1"), "AAC");
        assert_eq!(display_codec("flac"), "FLAC");
        assert_eq!(display_codec("FLAC_HIRES"), "FLAC");
        assert_eq!(display_codec("mp3"), "MP3");
    }

    #[test]
    fn aac_descriptor_suppresses_lossless_fields() {
        let aac = StreamDescriptor::new(
            "https://example/stream".to_string(),
            "mp4a.40.2",
            Some(44100),
            Some(16),
            AudioQuality::High,
        );
        assert_eq!(aac.codec, "AAC");
        assert!(aac.sample_rate.is_none());
        assert!(aac.bit_depth.is_none());

        let flac = StreamDescriptor::new(
            "https://example/stream".to_string(),
            "flac",
            Some(96000),
            Some(24),
            AudioQuality::HiResLossless,
        );
        assert_eq!(flac.codec, "FLAC");
        assert_eq!(flac.sample_rate, Some(96000));
        assert_eq!(flac.bit_depth, Some(24));
    }

    #[test]
    fn quality_indices_round_trip() {
        for index in 0..=3u8 {
            assert_eq!(AudioQuality::from_index(index).as_index(), index);
        }
        assert_eq!(AudioQuality::from_index(9), AudioQuality::Lossless);
        assert_eq!(
            AudioQuality::from_api_str("HI_RES"),
            Some(AudioQuality::HiResLossless)
        );
        assert_eq!(AudioQuality::Lossless.to_string(), "LOSSLESS");
    }

    #[test]
    fn entity_kind_strings_round_trip() {
        for kind in [
            EntityKind::Track,
            EntityKind::Album,
            EntityKind::Playlist,
            EntityKind::Mix,
            EntityKind::Artist,
        ] {
            assert_eq!(EntityKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::from_str("video"), None);
    }

    #[test]
    fn artwork_placeholders_resolve() {
        let url = "https://resources.tidal.com/images/abc/{width}x{height}.jpg";
        assert_eq!(
            resolve_artwork_url(url, 320, 320),
            "https://resources.tidal.com/images/abc/320x320.jpg"
        );
        let mut track = Track {
            id: "1".to_string(),
            title: "t".to_string(),
            duration: 1.0,
            track_number: None,
            volume_number: None,
            isrc: None,
            artist_name: "a".to_string(),
            artist_id: None,
            artists: vec![],
            album_name: "al".to_string(),
            album_id: None,
            artwork_url: Some(url.to_string()),
            explicit: false,
            available: true,
            media_tags: vec![],
        };
        track.resolve_artwork();
        assert_eq!(
            track.artwork_url.as_deref(),
            Some("https://resources.tidal.com/images/abc/480x480.jpg")
        );
    }
}
