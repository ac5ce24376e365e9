use crate::api::client::TidalClient;
use crate::api::models::{Mix, Track};
use crate::error::{AppError, AppResult};

const V1_BASE_URL: &str = "https://api.tidal.com/v1";

impl TidalClient {
    /// Items of a personalized mix. Mixes only exist on the v1 surface.
    pub async fn get_mix_tracks(&self, mix_id: &str) -> AppResult<Vec<Track>> {
        let client_id = self.settings().read().await.client_id.clone();
        let token = self.access_token().await?;
        let country = self.country_code().await;

        let url = format!("{}/mixes/{}/items", V1_BASE_URL, mix_id);
        let response = self
            .http_client()
            .get(&url)
            .bearer_auth(&token)
            .header("x-tidal-token", &client_id)
            .query(&[("countryCode", country.as_str()), ("limit", "100")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            log::warn!("v1 mix items for {} failed ({})", mix_id, status);
            return Err(AppError::TidalApi {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response.json().await?;
        Ok(parse_v1_mix_items(&body))
    }
}

/// Turn a v1 cover UUID into the resources image URL template. Dashes in
/// the UUID become path segments.
pub(crate) fn cover_uuid_to_artwork_url(cover: &str) -> String {
    let cover_path = cover.replace('-', "/");
    format!(
        "https://resources.tidal.com/images/{}/{{width}}x{{height}}.jpg",
        cover_path
    )
}

/// Parse a mix resource from a v2 recommendations included entry.
pub(crate) fn parse_mix(id: &str, attrs: &serde_json::Value) -> Option<Mix> {
    let title = attrs.get("title")?.as_str()?.to_string();
    Some(Mix {
        id: id.to_string(),
        title,
        sub_title: attrs
            .get("subTitle")
            .and_then(|v| v.as_str())
            .map(String::from),
        artwork_url: attrs
            .get("images")
            .and_then(|v| v.get("MEDIUM"))
            .and_then(|v| v.get("url"))
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

/// Parse tracks from a v1 mix items response. The v1 shape wraps each
/// track as { item: {...}, type: "track" } with inline artist and album
/// objects rather than JSON:API relationships.
pub(crate) fn parse_v1_mix_items(body: &serde_json::Value) -> Vec<Track> {
    let mut tracks = Vec::new();
    let items = match body.get("items").and_then(|v| v.as_array()) {
        Some(items) => items,
        None => return tracks,
    };

    for entry in items {
        let item_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if item_type != "track" {
            continue;
        }
        let item = match entry.get("item") {
            Some(i) => i,
            None => continue,
        };

        // v1 ids come back as numbers.
        let id = match item.get("id") {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => continue,
        };

        let title = item
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let duration = item.get("duration").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let track_number = item
            .get("trackNumber")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);
        let volume_number = item
            .get("volumeNumber")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);

        let credits: Vec<(String, Option<String>)> = item
            .get("artists")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| {
                        let name = a.get("name").and_then(|v| v.as_str())?.to_string();
                        let id = match a.get("id") {
                            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                            Some(serde_json::Value::String(s)) => Some(s.clone()),
                            _ => None,
                        };
                        Some((name, id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let (artist_name, artist_id) = credits
            .first()
            .cloned()
            .unwrap_or(("Unknown Artist".to_string(), None));
        let artists: Vec<String> = credits.into_iter().map(|(name, _)| name).collect();

        let album = item.get("album");
        let album_name = album
            .and_then(|a| a.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let album_id = album.and_then(|a| match a.get("id") {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        });

        let artwork_url = album
            .and_then(|a| a.get("cover"))
            .and_then(|v| v.as_str())
            .map(cover_uuid_to_artwork_url);

        // v1 marks regional gaps with streamReady/allowStreaming flags.
        let available = item
            .get("streamReady")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
            && item
                .get("allowStreaming")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

        tracks.push(Track {
            id,
            title,
            duration,
            track_number,
            volume_number,
            isrc: item.get("isrc").and_then(|v| v.as_str()).map(String::from),
            artist_name,
            artist_id,
            artists,
            album_name,
            album_id,
            artwork_url,
            explicit: item
                .get("explicit")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            available,
            media_tags: Vec::new(),
        });
    }

    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cover_uuid_maps_to_image_path() {
        assert_eq!(
            cover_uuid_to_artwork_url("aaaa-bb-cc"),
            "https://resources.tidal.com/images/aaaa/bb/cc/{width}x{height}.jpg"
        );
    }

    #[test]
    fn v1_mix_items_parse_tracks_and_skip_other_kinds() {
        let body = json!({
            "items": [
                {
                    "type": "track",
                    "item": {
                        "id": 4321,
                        "title": "Mix Cut",
                        "duration": 215.0,
                        "trackNumber": 2,
                        "explicit": true,
                        "streamReady": true,
                        "allowStreaming": true,
                        "artists": [
                            { "id": 7, "name": "Lead" },
                            { "id": 8, "name": "Feature" }
                        ],
                        "album": { "id": 99, "title": "The LP", "cover": "ab-cd-ef" }
                    }
                },
                { "type": "video", "item": { "id": 1, "title": "clip" } }
            ]
        });

        let tracks = parse_v1_mix_items(&body);
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.id, "4321");
        assert_eq!(track.artist_name, "Lead");
        assert_eq!(track.artists, vec!["Lead", "Feature"]);
        assert_eq!(track.album_id, Some("99".to_string()));
        assert!(track.explicit);
        assert!(track.available);
        assert_eq!(
            track.artwork_url.as_deref(),
            Some("https://resources.tidal.com/images/ab/cd/ef/{width}x{height}.jpg")
        );
    }

    #[test]
    fn stream_blocked_items_are_marked_unavailable() {
        let body = json!({
            "items": [{
                "type": "track",
                "item": {
                    "id": 1, "title": "Gone", "duration": 100.0,
                    "streamReady": false, "allowStreaming": true
                }
            }]
        });
        let tracks = parse_v1_mix_items(&body);
        assert!(!tracks[0].available);
    }

    #[test]
    fn mix_resources_parse_with_subtitle() {
        let attrs = json!({
            "title": "My Daily Mix",
            "subTitle": "Artist A, Artist B and more",
            "images": { "MEDIUM": { "url": "https://img/mix.jpg" } }
        });
        let mix = parse_mix("mix-1", &attrs).unwrap();
        assert_eq!(mix.title, "My Daily Mix");
        assert_eq!(mix.sub_title.as_deref(), Some("Artist A, Artist B and more"));
        assert_eq!(mix.artwork_url.as_deref(), Some("https://img/mix.jpg"));
        assert!(parse_mix("m", &json!({})).is_none());
    }
}
