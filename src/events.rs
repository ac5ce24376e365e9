use crate::api::models::{StreamDescriptor, Track};
use crate::audio::queue::RepeatMode;
use serde::Serialize;

pub const PLAYBACK_PROGRESS: &str = "playback:progress";
pub const PLAYBACK_TRACK_CHANGED: &str = "playback:track-changed";
pub const PLAYBACK_STATE_CHANGED: &str = "playback:state-changed";
pub const PLAYBACK_TRACK_ENDED: &str = "playback:track-ended";
pub const PLAYBACK_QUEUE_CHANGED: &str = "playback:queue-changed";
pub const PLAYBACK_QUEUE_ADDED: &str = "playback:queue-added";
pub const PLAYBACK_DURATION_CHANGED: &str = "playback:duration-changed";
pub const PLAYBACK_BUFFERING: &str = "playback:buffering";
pub const PLAYBACK_VOLUME_CHANGED: &str = "playback:volume-changed";
pub const PLAYBACK_SHUFFLE_CHANGED: &str = "playback:shuffle-changed";
pub const PLAYBACK_REPEAT_CHANGED: &str = "playback:repeat-changed";
pub const AUTH_STATE_CHANGED: &str = "auth:state-changed";
pub const APP_TOAST: &str = "app:toast";
pub const APP_RAISE_REQUESTED: &str = "app:raise-requested";
pub const APP_QUIT_REQUESTED: &str = "app:quit-requested";

/// Everything observers can learn from the player. Frontends subscribe
/// through [`crate::player::Player::subscribe`] and forward what they need
/// onto their own event plumbing, keyed by [`PlayerEvent::name`].
///
/// Serializes as an `{"event": ..., "payload": ...}` envelope so events
/// without a payload stay distinguishable on the wire.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Progress(ProgressPayload),
    SongChanged(TrackChangedPayload),
    StateChanged(StateChangedPayload),
    TrackEnded,
    QueueChanged(QueueChangedPayload),
    SongAddedToQueue(Track),
    DurationChanged { duration: f64 },
    Buffering { percent: u8 },
    VolumeChanged { volume: f32 },
    ShuffleChanged { shuffle: bool },
    RepeatChanged { repeat: RepeatMode },
    AuthChanged(AuthStatePayload),
    Toast { message: String },
    RaiseRequested,
    QuitRequested,
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Progress(_) => PLAYBACK_PROGRESS,
            PlayerEvent::SongChanged(_) => PLAYBACK_TRACK_CHANGED,
            PlayerEvent::StateChanged(_) => PLAYBACK_STATE_CHANGED,
            PlayerEvent::TrackEnded => PLAYBACK_TRACK_ENDED,
            PlayerEvent::QueueChanged(_) => PLAYBACK_QUEUE_CHANGED,
            PlayerEvent::SongAddedToQueue(_) => PLAYBACK_QUEUE_ADDED,
            PlayerEvent::DurationChanged { .. } => PLAYBACK_DURATION_CHANGED,
            PlayerEvent::Buffering { .. } => PLAYBACK_BUFFERING,
            PlayerEvent::VolumeChanged { .. } => PLAYBACK_VOLUME_CHANGED,
            PlayerEvent::ShuffleChanged { .. } => PLAYBACK_SHUFFLE_CHANGED,
            PlayerEvent::RepeatChanged { .. } => PLAYBACK_REPEAT_CHANGED,
            PlayerEvent::AuthChanged(_) => AUTH_STATE_CHANGED,
            PlayerEvent::Toast { .. } => APP_TOAST,
            PlayerEvent::RaiseRequested => APP_RAISE_REQUESTED,
            PlayerEvent::QuitRequested => APP_QUIT_REQUESTED,
        }
    }
}

impl Serialize for PlayerEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("event", self.name())?;
        match self {
            PlayerEvent::Progress(payload) => map.serialize_entry("payload", payload)?,
            PlayerEvent::SongChanged(payload) => map.serialize_entry("payload", payload)?,
            PlayerEvent::StateChanged(payload) => map.serialize_entry("payload", payload)?,
            PlayerEvent::QueueChanged(payload) => map.serialize_entry("payload", payload)?,
            PlayerEvent::SongAddedToQueue(track) => map.serialize_entry("payload", track)?,
            PlayerEvent::AuthChanged(payload) => map.serialize_entry("payload", payload)?,
            PlayerEvent::DurationChanged { duration } => {
                map.serialize_entry("payload", duration)?
            }
            PlayerEvent::Buffering { percent } => map.serialize_entry("payload", percent)?,
            PlayerEvent::VolumeChanged { volume } => map.serialize_entry("payload", volume)?,
            PlayerEvent::ShuffleChanged { shuffle } => map.serialize_entry("payload", shuffle)?,
            PlayerEvent::RepeatChanged { repeat } => map.serialize_entry("payload", repeat)?,
            PlayerEvent::Toast { message } => map.serialize_entry("payload", message)?,
            PlayerEvent::TrackEnded
            | PlayerEvent::RaiseRequested
            | PlayerEvent::QuitRequested => {}
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    pub position: f64,
    pub duration: f64,
    pub position_fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackChangedPayload {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: Option<String>,
    pub duration: f64,
    pub artwork_url: Option<String>,
    pub codec: Option<String>,
    pub quality: Option<String>,
}

impl TrackChangedPayload {
    pub fn new(track: &Track, stream: Option<&StreamDescriptor>) -> Self {
        Self {
            track_id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist_name.clone(),
            album: track.album_name.clone(),
            album_id: track.album_id.clone(),
            duration: track.duration,
            artwork_url: track.artwork_url.clone(),
            codec: stream.map(|s| s.codec.clone()),
            quality: stream.map(|s| s.quality.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChangedPayload {
    pub state: PlaybackState,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Buffering,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueChangedPayload {
    pub can_go_next: bool,
    pub can_go_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatePayload {
    pub authenticated: bool,
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_as_named_envelopes() {
        let value =
            serde_json::to_value(PlayerEvent::DurationChanged { duration: 3.5 }).unwrap();
        assert_eq!(
            value,
            json!({"event": "playback:duration-changed", "payload": 3.5})
        );
    }

    #[test]
    fn payload_free_events_stay_distinguishable() {
        let ended = serde_json::to_value(PlayerEvent::TrackEnded).unwrap();
        let quit = serde_json::to_value(PlayerEvent::QuitRequested).unwrap();
        assert_ne!(ended, quit);
        assert_eq!(ended, json!({"event": "playback:track-ended"}));
        assert_eq!(quit, json!({"event": "app:quit-requested"}));
    }
}
