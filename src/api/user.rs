use crate::api::client::TidalClient;
use crate::api::mixes::{parse_mix, parse_v1_mix_items};
use crate::api::models::{
    Album, Artist, EntityKind, FavoritesPage, Mix, Playlist, RecommendationSection, Track,
};
use crate::api::search::{
    build_lookup_maps, get_first_relationship_id, parse_album, parse_artist, parse_playlist,
    parse_tracks_from_included,
};
use crate::error::{AppError, AppResult};
use std::collections::HashMap;

/// JSON:API collection relationship name for a collectable kind.
fn collection_relationship(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Track => Some("tracks"),
        EntityKind::Album => Some("albums"),
        EntityKind::Artist => Some("artists"),
        EntityKind::Playlist => Some("playlists"),
        EntityKind::Mix => None,
    }
}

impl TidalClient {
    async fn user_id(&self) -> AppResult<String> {
        self.settings()
            .read()
            .await
            .user_id
            .clone()
            .ok_or(AppError::AuthRequired)
    }

    /// GET /users/me. Returns (username, firstName, lastName).
    pub async fn get_user_profile(
        &self,
    ) -> AppResult<(Option<String>, Option<String>, Option<String>)> {
        let response = self.get("/users/me").await?;
        let body: serde_json::Value = response.json().await?;

        let attrs = body.get("data").and_then(|d| d.get("attributes"));
        let field = |name: &str| {
            attrs
                .and_then(|a| a.get(name))
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        Ok((field("username"), field("firstName"), field("lastName")))
    }

    /// One page of the user's favorite tracks, fully resolved. `cursor` is
    /// None for the first page.
    pub async fn get_favorite_tracks(&self, cursor: Option<&str>) -> AppResult<FavoritesPage> {
        let user_id = self.user_id().await?;
        let country = self.country_code().await;

        let path = format!("/userCollections/{}/relationships/tracks", user_id);
        let mut params: Vec<(&str, &str)> = vec![
            ("countryCode", country.as_str()),
            (
                "include",
                "tracks,tracks.artists,tracks.albums,tracks.albums.coverArt",
            ),
        ];
        if let Some(c) = cursor {
            params.push(("page[cursor]", c));
        }
        let response = self.get_with_query(&path, &params).await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());
        let tracks = parse_tracks_from_included(included);

        let next_cursor = extract_next_cursor(&body);
        let has_more = next_cursor.is_some();

        Ok(FavoritesPage {
            tracks,
            next_cursor,
            has_more,
        })
    }

    /// Ids only, one page of a kind's collection listing. Cheaper than the
    /// resolved listings; this is what the favorites index walks.
    pub async fn get_favorite_ids(
        &self,
        kind: EntityKind,
        cursor: Option<&str>,
    ) -> AppResult<(Vec<String>, Option<String>)> {
        let relationship = collection_relationship(kind).ok_or_else(|| {
            AppError::Config(format!("{} is not a collectable kind", kind.as_str()))
        })?;
        let user_id = self.user_id().await?;
        let country = self.country_code().await;

        let path = format!("/userCollections/{}/relationships/{}", user_id, relationship);
        let mut params: Vec<(&str, &str)> = vec![("countryCode", country.as_str())];
        if let Some(c) = cursor {
            params.push(("page[cursor]", c));
        }
        let response = self.get_with_query(&path, &params).await?;

        let body: serde_json::Value = response.json().await?;
        let ids = body
            .get("data")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| item.get("id").and_then(|v| v.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok((ids, extract_next_cursor(&body)))
    }

    /// Add or remove one entity from the user's collection.
    pub async fn set_favorite(&self, kind: EntityKind, id: &str, favorite: bool) -> AppResult<()> {
        let relationship = collection_relationship(kind).ok_or_else(|| {
            AppError::Config(format!("{} is not a collectable kind", kind.as_str()))
        })?;
        let user_id = self.user_id().await?;
        let country = self.country_code().await;

        let path = format!("/userCollections/{}/relationships/{}", user_id, relationship);
        let body = serde_json::json!({
            "data": [{
                "type": relationship,
                "id": id
            }]
        });
        if favorite {
            self.post_with_query(&path, &[("countryCode", country.as_str())], &body)
                .await?;
        } else {
            self.delete_with_body(&path, &body).await?;
        }
        Ok(())
    }

    pub async fn get_favorite_albums(&self) -> AppResult<Vec<Album>> {
        let body = self.favorite_collection_page("albums", "albums,albums.artists,albums.coverArt").await?;
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
                albums.push(album);
            }
        }
        Ok(albums)
    }

    pub async fn get_favorite_artists(&self) -> AppResult<Vec<Artist>> {
        let body = self
            .favorite_collection_page("artists", "artists,artists.profileArt")
            .await?;
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

    pub async fn get_favorite_playlists(&self) -> AppResult<Vec<Playlist>> {
        let body = self
            .favorite_collection_page("playlists", "playlists,playlists.coverArt")
            .await?;
        let included = body.get("included").and_then(|v| v.as_array());
        let empty = Vec::new();
        let items = included.unwrap_or(&empty);
        let (_artist_map, _album_map, artwork_map) = build_lookup_maps(items);

        let mut playlists = Vec::new();
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) != Some("playlists") {
                continue;
            }
            let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let attrs = item.get("attributes").cloned().unwrap_or_default();
            let rels = item.get("relationships");
            if let Some(mut playlist) = parse_playlist(id, &attrs) {
                if playlist.artwork_url.is_none() {
                    playlist.artwork_url = get_first_relationship_id(rels, "coverArt")
                        .and_then(|art_id| artwork_map.get(&art_id).cloned());
                }
                playlists.push(playlist);
            }
        }
        Ok(playlists)
    }

    async fn favorite_collection_page(
        &self,
        relationship: &str,
        include: &str,
    ) -> AppResult<serde_json::Value> {
        let user_id = self.user_id().await?;
        let country = self.country_code().await;
        let path = format!("/userCollections/{}/relationships/{}", user_id, relationship);
        let response = self
            .get_with_query(
                &path,
                &[("countryCode", country.as_str()), ("include", include)],
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Personalized home feed as ordered sections. Tries the
    /// userRecommendations mixes first and falls back to discovery built
    /// from the user's favorites.
    pub async fn home(&self) -> AppResult<Vec<RecommendationSection>> {
        let sections = self.fetch_recommendation_mixes().await;
        if !sections.is_empty() {
            return Ok(sections);
        }

        log::info!("no recommendation mixes available, building discovery from favorites");
        self.build_discovery_from_favorites().await
    }

    /// Mix-backed sections from userRecommendations plus the v1 items API.
    /// Returns empty on any failure so the caller can fall back.
    async fn fetch_recommendation_mixes(&self) -> Vec<RecommendationSection> {
        let country = self.country_code().await;

        let response = self
            .get_with_query(
                "/userRecommendations/me",
                &[
                    ("countryCode", country.as_str()),
                    ("include", "discoveryMixes,myMixes,newArrivalMixes"),
                ],
            )
            .await;

        let body: serde_json::Value = match response {
            Ok(r) => match r.json().await {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("failed to parse userRecommendations response: {}", e);
                    return Vec::new();
                }
            },
            Err(e) => {
                log::warn!("userRecommendations request failed: {}", e);
                return Vec::new();
            }
        };

        let mut mix_info: HashMap<String, Mix> = HashMap::new();
        if let Some(included) = body.get("included").and_then(|v| v.as_array()) {
            for item in included {
                let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
                if id.is_empty() {
                    continue;
                }
                let attrs = item.get("attributes").cloned().unwrap_or_default();
                if let Some(mix) = parse_mix(id, &attrs) {
                    mix_info.insert(id.to_string(), mix);
                }
            }
        }

        // Category order from the relationships, de-duplicated.
        let mut mix_ids: Vec<String> = Vec::new();
        if let Some(data) = body.get("data") {
            for rel_key in &["myMixes", "discoveryMixes", "newArrivalMixes"] {
                if let Some(refs) = data
                    .get("relationships")
                    .and_then(|r| r.get(*rel_key))
                    .and_then(|r| r.get("data"))
                    .and_then(|d| d.as_array())
                {
                    for r in refs {
                        if let Some(id) = r.get("id").and_then(|v| v.as_str()) {
                            if !mix_ids.contains(&id.to_string()) {
                                mix_ids.push(id.to_string());
                            }
                        }
                    }
                }
            }
        }
        if mix_ids.is_empty() {
            mix_ids = mix_info.keys().cloned().collect();
        }
        if mix_ids.is_empty() {
            return Vec::new();
        }

        let max_mixes = mix_ids.len().min(6);
        let mut sections: Vec<RecommendationSection> = Vec::new();

        for (i, mix_id) in mix_ids[..max_mixes].iter().enumerate() {
            match self.get_mix_items_limited(mix_id, &country).await {
                Some(tracks) if !tracks.is_empty() => {
                    let mix = mix_info.get(mix_id).cloned().unwrap_or_else(|| Mix {
                        id: mix_id.clone(),
                        title: format!("Mix {}", i + 1),
                        sub_title: None,
                        artwork_url: None,
                    });
                    sections.push(RecommendationSection {
                        title: mix.title.clone(),
                        subtitle: mix.sub_title.clone(),
                        mix: Some(mix),
                        tracks,
                    });
                }
                _ => {}
            }
        }

        sections
    }

    /// Short v1 items fetch used for home section previews.
    async fn get_mix_items_limited(&self, mix_id: &str, country: &str) -> Option<Vec<Track>> {
        let token = self.access_token().await.ok()?;
        let url = format!("https://api.tidal.com/v1/mixes/{}/items", mix_id);
        let resp = self
            .http_client()
            .get(&url)
            .bearer_auth(&token)
            .query(&[("countryCode", country), ("limit", "15")])
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => r
                .json::<serde_json::Value>()
                .await
                .ok()
                .map(|body| parse_v1_mix_items(&body)),
            Ok(r) => {
                log::warn!("v1 mix items for {} failed: {}", mix_id, r.status());
                None
            }
            Err(e) => {
                log::warn!("v1 mix items for {} failed: {}", mix_id, e);
                None
            }
        }
    }

    /// Discovery sections seeded by similar-track lookups on a spread of
    /// the user's favorites.
    async fn build_discovery_from_favorites(&self) -> AppResult<Vec<RecommendationSection>> {
        let page = self.get_favorite_tracks(None).await?;
        let favorites = page.tracks;

        if favorites.is_empty() {
            return Ok(Vec::new());
        }

        let seed_count = favorites.len().min(4);
        let step = if favorites.len() > seed_count {
            favorites.len() / seed_count
        } else {
            1
        };
        let seeds: Vec<&Track> = favorites.iter().step_by(step).take(seed_count).collect();

        let mut sections: Vec<RecommendationSection> = Vec::new();

        for seed in &seeds {
            match self.get_similar_tracks(&seed.id).await {
                Ok(similar) if !similar.is_empty() => {
                    sections.push(RecommendationSection {
                        title: format!("Because you like {}", seed.title),
                        subtitle: Some(seed.artist_name.clone()),
                        mix: None,
                        tracks: similar.into_iter().take(10).collect(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("failed to get similar tracks for {}: {}", seed.id, e);
                }
            }
        }

        let teaser_len = if sections.is_empty() { 20 } else { 10 };
        let teaser: Vec<Track> = favorites.into_iter().take(teaser_len).collect();
        if !teaser.is_empty() {
            sections.push(RecommendationSection {
                title: "Your Favorites".to_string(),
                subtitle: None,
                mix: None,
                tracks: teaser,
            });
        }

        Ok(sections)
    }
}

fn extract_next_cursor(body: &serde_json::Value) -> Option<String> {
    body.get("links")
        .and_then(|l| l.get("meta"))
        .and_then(|m| m.get("nextCursor"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collectable_kinds_map_to_relationships() {
        assert_eq!(collection_relationship(EntityKind::Track), Some("tracks"));
        assert_eq!(collection_relationship(EntityKind::Album), Some("albums"));
        assert_eq!(collection_relationship(EntityKind::Artist), Some("artists"));
        assert_eq!(
            collection_relationship(EntityKind::Playlist),
            Some("playlists")
        );
        assert_eq!(collection_relationship(EntityKind::Mix), None);
    }

    #[test]
    fn next_cursor_comes_from_links_meta() {
        let body = json!({
            "data": [],
            "links": { "meta": { "nextCursor": "abc123" } }
        });
        assert_eq!(extract_next_cursor(&body), Some("abc123".to_string()));
        assert_eq!(extract_next_cursor(&json!({ "data": [] })), None);
    }
}
