use crate::api::client::TidalClient;
use crate::api::models::{Album, Track};
use crate::api::search::{
    build_lookup_maps, get_first_relationship_id, parse_album, parse_tracks_from_included,
};
use crate::error::{AppError, AppResult};

impl TidalClient {
    pub async fn get_album(&self, album_id: &str) -> AppResult<Album> {
        let country = self.country_code().await;

        let path = format!("/albums/{}", album_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("include", "artists,coverArt"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let data = body.get("data");
        let id = data
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or(album_id);
        let attrs = data
            .and_then(|d| d.get("attributes"))
            .cloned()
            .unwrap_or_default();
        let rels = data.and_then(|d| d.get("relationships"));

        let mut album = parse_album(id, &attrs)
            .ok_or_else(|| AppError::NotFound(format!("Album {} not found", album_id)))?;

        if let Some(items) = body.get("included").and_then(|v| v.as_array()) {
            let (artist_map, _album_map, artwork_map) = build_lookup_maps(items);

            if let Some(artist_id) = get_first_relationship_id(rels, "artists") {
                if let Some(name) = artist_map.get(&artist_id) {
                    album.artist_name = name.clone();
                    album.artist_id = Some(artist_id);
                }
            }

            if album.artwork_url.is_none() {
                album.artwork_url = get_first_relationship_id(rels, "coverArt")
                    .and_then(|art_id| artwork_map.get(&art_id).cloned());
            }
        }

        Ok(album)
    }

    /// Album items in disc/track order, with artists and cover art resolved.
    pub async fn get_album_tracks(&self, album_id: &str) -> AppResult<Vec<Track>> {
        let country = self.country_code().await;

        let path = format!("/albums/{}/relationships/items", album_id);
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

        // Included resources arrive unordered; restore disc/track order.
        tracks.sort_by_key(|t| (t.volume_number.unwrap_or(1), t.track_number.unwrap_or(0)));

        Ok(tracks)
    }
}
