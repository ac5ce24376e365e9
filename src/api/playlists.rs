use crate::api::client::TidalClient;
use crate::api::models::{Playlist, Track};
use crate::api::search::{
    build_lookup_maps, get_first_relationship_id, parse_playlist, parse_tracks_from_included,
};
use crate::error::{AppError, AppResult};

impl TidalClient {
    /// Playlists owned by the authenticated user.
    pub async fn get_playlists(&self) -> AppResult<Vec<Playlist>> {
        let country = self.country_code().await;

        let response = self
            .get_with_query(
                "/playlists",
                &[
                    ("countryCode", country.as_str()),
                    ("filter[owners.id]", "me"),
                    ("include", "coverArt,owners"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let data = body.get("data").and_then(|v| v.as_array());
        let included = body.get("included").and_then(|v| v.as_array());

        let empty = Vec::new();
        let (_artist_map, _album_map, artwork_map) = build_lookup_maps(included.unwrap_or(&empty));

        let mut playlists = Vec::new();
        if let Some(items) = data {
            for item in items {
                let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
                let attrs = item.get("attributes").cloned().unwrap_or_default();
                let rels = item.get("relationships");
                if let Some(mut playlist) = parse_playlist(id, &attrs) {
                    if playlist.artwork_url.is_none() {
                        playlist.artwork_url = get_first_relationship_id(rels, "coverArt")
                            .and_then(|art_id| artwork_map.get(&art_id).cloned());
                    }
                    playlist.creator_id = get_first_relationship_id(rels, "owners");
                    playlists.push(playlist);
                }
            }
        }

        Ok(playlists)
    }

    pub async fn get_playlist(&self, playlist_id: &str) -> AppResult<Playlist> {
        let country = self.country_code().await;

        let path = format!("/playlists/{}", playlist_id);
        let response = self
            .get_with_query(
                &path,
                &[("countryCode", country.as_str()), ("include", "coverArt")],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let data = body.get("data");
        let included = body.get("included").and_then(|v| v.as_array());

        let id = data
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or(playlist_id);
        let attrs = data
            .and_then(|d| d.get("attributes"))
            .cloned()
            .unwrap_or_default();
        let rels = data.and_then(|d| d.get("relationships"));

        let mut playlist = parse_playlist(id, &attrs)
            .ok_or_else(|| AppError::NotFound(format!("Playlist {} not found", playlist_id)))?;

        if playlist.artwork_url.is_none() {
            let empty = Vec::new();
            let (_artists, _albums, artwork_map) = build_lookup_maps(included.unwrap_or(&empty));
            playlist.artwork_url = get_first_relationship_id(rels, "coverArt")
                .and_then(|art_id| artwork_map.get(&art_id).cloned());
        }

        Ok(playlist)
    }

    /// Playlist items in playlist order, with artists and cover art
    /// resolved from the included resources.
    pub async fn get_playlist_tracks(&self, playlist_id: &str) -> AppResult<Vec<Track>> {
        let country = self.country_code().await;

        let path = format!("/playlists/{}/relationships/items", playlist_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    (
                        "include",
                        "items,items.artists,items.albums,items.albums.coverArt",
                    ),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());
        let mut tracks = parse_tracks_from_included(included);

        // Included resources arrive unordered; restore playlist order from
        // the relationship data array when present.
        if let Some(order) = body.get("data").and_then(|v| v.as_array()) {
            let positions: Vec<String> = order
                .iter()
                .filter_map(|item| item.get("id").and_then(|v| v.as_str()))
                .map(String::from)
                .collect();
            if !positions.is_empty() {
                tracks.sort_by_key(|t| {
                    positions
                        .iter()
                        .position(|id| id == &t.id)
                        .unwrap_or(usize::MAX)
                });
            }
        }

        Ok(tracks)
    }
}
