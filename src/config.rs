use crate::api::models::AudioQuality;
use crate::audio::queue::RepeatMode;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted player settings. Keys are kebab-case in the JSON file so the
/// file stays compatible across client frontends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_client_secret")]
    pub client_secret: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Output device index; negative or out of range selects the system
    /// default sink.
    #[serde(default = "default_preferred_sink")]
    pub preferred_sink: i32,
    #[serde(default)]
    pub normalize: bool,
    #[serde(default)]
    pub quadratic_volume: bool,
    /// Requested quality tier index, 0..=3.
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Volume on a 0..=100 integer scale.
    #[serde(default = "default_last_volume")]
    pub last_volume: u8,
    /// Repeat mode index, 0..=2.
    #[serde(default)]
    pub repeat: u8,

    #[serde(default)]
    pub last_playing_thing_type: Option<String>,
    #[serde(default)]
    pub last_playing_thing_id: Option<String>,
    #[serde(default)]
    pub last_playing_index: usize,
}

fn default_client_id() -> String {
    "fX2JxdmntZWK0ixT".to_string()
}

fn default_client_secret() -> String {
    "1Nn9AfDAjxrgJFJbKNWLeAyKGVGmINuXPPLHVXAvxAg=".to_string()
}

fn default_country_code() -> String {
    "US".to_string()
}

fn default_preferred_sink() -> i32 {
    -1
}

fn default_quality() -> u8 {
    AudioQuality::Lossless.as_index()
}

fn default_last_volume() -> u8 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            user_id: None,
            display_name: None,
            country_code: default_country_code(),
            preferred_sink: default_preferred_sink(),
            normalize: false,
            quadratic_volume: false,
            quality: default_quality(),
            last_volume: default_last_volume(),
            repeat: 0,
            last_playing_thing_type: None,
            last_playing_thing_id: None,
            last_playing_index: 0,
        }
    }
}

impl Settings {
    pub fn config_dir() -> AppResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".tidalcore"))
    }

    pub fn config_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Directory the frontend fills with `<album_id>_320.jpg` covers;
    /// the MPRIS bridge only ever constructs paths into it.
    pub fn images_dir() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("images"))
    }

    pub fn crash_log_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("crash.log"))
    }

    pub fn load() -> AppResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Err(AppError::Config(
                "Config file not found. Please run setup.".into(),
            ));
        }
        let content = std::fs::read_to_string(&path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self) -> AppResult<()> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)?;
        let path = Self::config_path()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn quality_tier(&self) -> AudioQuality {
        AudioQuality::from_index(self.quality)
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        RepeatMode::from_index(self.repeat)
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat = mode.as_index();
    }

    /// Volume as the [0,1] fraction the pipeline consumes.
    pub fn volume_fraction(&self) -> f32 {
        f32::from(self.last_volume.min(100)) / 100.0
    }

    pub fn set_volume_fraction(&mut self, volume: f32) {
        self.last_volume = (volume.clamp(0.0, 1.0) * 100.0).round() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.country_code, "US");
        assert_eq!(settings.quality, 2);
        assert_eq!(settings.last_volume, 100);
        assert_eq!(settings.repeat, 0);
        assert_eq!(settings.preferred_sink, -1);
        assert!(!settings.normalize);
        assert!(settings.last_playing_thing_type.is_none());
    }

    #[test]
    fn keys_are_kebab_case() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert!(json.get("quadratic-volume").is_some());
        assert!(json.get("last-playing-thing-type").is_some());
        assert!(json.get("preferred-sink").is_some());
        assert!(json.get("quadratic_volume").is_none());
    }

    #[test]
    fn quality_and_repeat_round_trip_through_indices() {
        let mut settings = Settings::default();
        settings.quality = 3;
        assert_eq!(settings.quality_tier(), AudioQuality::HiResLossless);
        settings.set_repeat_mode(RepeatMode::Song);
        assert_eq!(settings.repeat, 2);
        assert_eq!(settings.repeat_mode(), RepeatMode::Song);
    }

    #[test]
    fn volume_fraction_clamps_both_directions() {
        let mut settings = Settings::default();
        settings.set_volume_fraction(1.7);
        assert_eq!(settings.last_volume, 100);
        settings.set_volume_fraction(-0.3);
        assert_eq!(settings.last_volume, 0);
        settings.last_volume = 45;
        assert!((settings.volume_fraction() - 0.45).abs() < f32::EPSILON);
    }
}
