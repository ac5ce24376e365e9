use crate::api::client::TidalClient;
use crate::api::models::{Album, Artist, Track};
use crate::api::search::{
    build_lookup_maps, get_first_relationship_id, parse_album, parse_artist,
    parse_tracks_from_included,
};
use crate::error::{AppError, AppResult};

const V1_BASE_URL: &str = "https://api.tidal.com/v1";

impl TidalClient {
    pub async fn get_artist(&self, artist_id: &str) -> AppResult<Artist> {
        let country = self.country_code().await;

        let path = format!("/artists/{}", artist_id);
        let response = self
            .get_with_query(
                &path,
                &[("countryCode", country.as_str()), ("include", "profileArt")],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let data = body.get("data");
        let id = data
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or(artist_id);
        let attrs = data
            .and_then(|d| d.get("attributes"))
            .cloned()
            .unwrap_or_default();
        let rels = data.and_then(|d| d.get("relationships"));

        let mut artist = parse_artist(id, &attrs)
            .ok_or_else(|| AppError::NotFound(format!("Artist {} not found", artist_id)))?;

        if artist.picture_url.is_none() {
            if let Some(items) = body.get("included").and_then(|v| v.as_array()) {
                let (_artists, _albums, artwork_map) = build_lookup_maps(items);
                artist.picture_url = get_first_relationship_id(rels, "profileArt")
                    .and_then(|art_id| artwork_map.get(&art_id).cloned());
            }
        }

        Ok(artist)
    }

    pub async fn get_artist_albums(&self, artist_id: &str) -> AppResult<Vec<Album>> {
        let country = self.country_code().await;

        let path = format!("/artists/{}/relationships/albums", artist_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("include", "albums,albums.coverArt,albums.artists"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());

        let empty = Vec::new();
        let items = included.unwrap_or(&empty);
        let (artist_map, _album_map, artwork_map) = build_lookup_maps(items);

        let mut albums = Vec::new();
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) != Some("albums") {
                continue;
            }
            let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let attrs = item.get("attributes").cloned().unwrap_or_default();
            let rels = item.get("relationships");
            if let Some(mut album) = parse_album(id, &attrs) {
                if let Some(aid) = get_first_relationship_id(rels, "artists") {
                    if let Some(name) = artist_map.get(&aid) {
                        album.artist_name = name.clone();
                        album.artist_id = Some(aid);
                    }
                }
                if album.artwork_url.is_none() {
                    album.artwork_url = get_first_relationship_id(rels, "coverArt")
                        .and_then(|art_id| artwork_map.get(&art_id).cloned());
                }
                albums.push(album);
            }
        }

        Ok(albums)
    }

    pub async fn get_artist_top_tracks(&self, artist_id: &str) -> AppResult<Vec<Track>> {
        let country = self.country_code().await;

        let path = format!("/artists/{}/relationships/tracks", artist_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("collapseBy", "FINGERPRINT"),
                    (
                        "include",
                        "tracks,tracks.artists,tracks.albums,tracks.albums.coverArt",
                    ),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());

        Ok(parse_tracks_from_included(included))
    }

    pub async fn get_similar_artists(&self, artist_id: &str) -> AppResult<Vec<Artist>> {
        let country = self.country_code().await;

        let path = format!("/artists/{}/relationships/similarArtists", artist_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("include", "similarArtists,similarArtists.profileArt"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());

        let empty = Vec::new();
        let items = included.unwrap_or(&empty);
        let (_artist_map, _album_map, artwork_map) = build_lookup_maps(items);

        let mut artists = Vec::new();
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) != Some("artists") {
                continue;
            }
            let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let attrs = item.get("attributes").cloned().unwrap_or_default();
            let rels = item.get("relationships");
            if let Some(mut artist) = parse_artist(id, &attrs) {
                if artist.picture_url.is_none() {
                    artist.picture_url = get_first_relationship_id(rels, "profileArt")
                        .and_then(|art_id| artwork_map.get(&art_id).cloned());
                }
                artists.push(artist);
            }
        }

        Ok(artists)
    }

    /// Artist biography from the v1 surface; the v2 API has no equivalent.
    pub async fn get_artist_bio(&self, artist_id: &str) -> AppResult<String> {
        let client_id = self.settings().read().await.client_id.clone();
        let token = self.access_token().await?;
        let country = self.country_code().await;

        let url = format!("{}/artists/{}/bio", V1_BASE_URL, artist_id);
        let response = self
            .http_client()
            .get(&url)
            .bearer_auth(&token)
            .header("x-tidal-token", &client_id)
            .query(&[("countryCode", country.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!(
                "No bio for artist {}",
                artist_id
            )));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::TidalApi {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response.json().await?;
        body.get("text")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| AppError::NotFound(format!("No bio for artist {}", artist_id)))
    }
}
