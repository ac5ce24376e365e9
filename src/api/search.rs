use crate::api::client::TidalClient;
use crate::api::models::{Album, Artist, Playlist, SearchResults, Track};
use crate::error::AppResult;
use std::collections::HashMap;

impl TidalClient {
    pub async fn search(&self, query: &str) -> AppResult<SearchResults> {
        let country = self.country_code().await;

        // Tidal v2 API: the query is the resource identifier in the path.
        let encoded_query = urlencoding::encode(query);
        let path = format!("/searchResults/{}", encoded_query);

        // Nested includes pull tracks with their artists/albums, albums with
        // artists/coverArt, artists with profileArt and playlists with
        // coverArt in one round trip. Servers that ignore dot-notation still
        // return the first-level includes; the batch fetch below covers the
        // rest.
        let response = self
            .get_with_query(
                &path,
                &[
                    (
                        "include",
                        "tracks,tracks.artists,tracks.albums,albums,albums.artists,albums.coverArt,artists,artists.profileArt,playlists,playlists.coverArt",
                    ),
                    ("countryCode", &country),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let mut results = parse_search_results(&body);

        // Tracks whose artist could not be resolved from the included
        // resources get a second chance through a filtered batch fetch.
        let unresolved: Vec<String> = results
            .tracks
            .iter()
            .filter(|t| t.artist_name == "Unknown Artist")
            .map(|t| t.id.clone())
            .collect();

        if !unresolved.is_empty() && !unresolved.iter().all(|id| id.is_empty()) {
            log::debug!(
                "search: batch-fetching {} tracks with unresolved artists",
                unresolved.len()
            );
            let ids_param = unresolved.join(",");
            match self
                .get_with_query(
                    "/tracks",
                    &[
                        ("filter[id]", &ids_param),
                        ("include", "artists,albums"),
                        ("countryCode", &country),
                    ],
                )
                .await
            {
                Ok(response) => {
                    let batch_body: serde_json::Value = response.json().await?;
                    let enriched = parse_tracks_batch(&batch_body);
                    for enriched_track in enriched {
                        if let Some(existing) = results
                            .tracks
                            .iter_mut()
                            .find(|t| t.id == enriched_track.id)
                        {
                            *existing = enriched_track;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("search: batch track fetch failed: {}", e);
                }
            }
        }

        log::debug!(
            "search '{}': {} tracks, {} albums, {} artists, {} playlists",
            query,
            results.tracks.len(),
            results.albums.len(),
            results.artists.len(),
            results.playlists.len()
        );
        Ok(results)
    }

    pub async fn search_suggestions(&self, query: &str) -> AppResult<Vec<String>> {
        let country = self.country_code().await;

        let encoded_query = urlencoding::encode(query);
        let path = format!("/searchSuggestions/{}", encoded_query);
        let response = self
            .get_with_query(&path, &[("countryCode", &country)])
            .await?;

        let body: serde_json::Value = response.json().await?;

        // searchSuggestions returns attributes.suggestions with query strings
        let mut suggestions = Vec::new();
        if let Some(data) = body.get("data") {
            if let Some(attrs) = data.get("attributes") {
                if let Some(suggestion_list) = attrs.get("suggestions").and_then(|v| v.as_array()) {
                    for s in suggestion_list.iter().take(5) {
                        if let Some(query_str) = s.get("query").and_then(|v| v.as_str()) {
                            suggestions.push(query_str.to_string());
                        }
                    }
                }
            }
        }

        // Fall back to search results when the suggestions endpoint is empty
        if suggestions.is_empty() {
            let search_path = format!("/searchResults/{}", encoded_query);
            let response = self
                .get_with_query(
                    &search_path,
                    &[("include", "tracks,artists"), ("countryCode", &country)],
                )
                .await?;
            let body: serde_json::Value = response.json().await?;
            let results = parse_search_results(&body);
            suggestions = results
                .tracks
                .iter()
                .take(5)
                .map(|t| format!("{} - {}", t.title, t.artist_name))
                .collect();
        }

        Ok(suggestions)
    }
}

/// Parse ISO 8601 duration string (e.g., "PT2M58S") to seconds as f64.
/// Handles hours (H), minutes (M), and seconds (S).
pub fn parse_iso8601_duration(duration: &str) -> f64 {
    let mut seconds = 0.0;
    let mut num_buf = String::new();

    for ch in duration.chars() {
        match ch {
            'P' | 'T' => {
                num_buf.clear();
            }
            '0'..='9' | '.' => {
                num_buf.push(ch);
            }
            'H' => {
                if let Ok(h) = num_buf.parse::<f64>() {
                    seconds += h * 3600.0;
                }
                num_buf.clear();
            }
            'M' => {
                if let Ok(m) = num_buf.parse::<f64>() {
                    seconds += m * 60.0;
                }
                num_buf.clear();
            }
            'S' => {
                if let Ok(s) = num_buf.parse::<f64>() {
                    seconds += s;
                }
                num_buf.clear();
            }
            _ => {}
        }
    }

    seconds
}

/// Extract the first relationship ID from a JSON:API relationships object.
/// Handles both to-one (single object) and to-many (array) relationships.
pub fn get_first_relationship_id(
    rels: Option<&serde_json::Value>,
    rel_name: &str,
) -> Option<String> {
    let data = rels?.get(rel_name)?.get("data")?;
    if let Some(arr) = data.as_array() {
        arr.first()?.get("id")?.as_str().map(|s| s.to_string())
    } else {
        data.get("id")?.as_str().map(|s| s.to_string())
    }
}

/// All relationship IDs in document order, for to-many relationships like
/// track credits.
pub(crate) fn get_relationship_ids(
    rels: Option<&serde_json::Value>,
    rel_name: &str,
) -> Vec<String> {
    let data = match rels.and_then(|r| r.get(rel_name)).and_then(|r| r.get("data")) {
        Some(d) => d,
        None => return Vec::new(),
    };
    if let Some(arr) = data.as_array() {
        arr.iter()
            .filter_map(|item| item.get("id").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect()
    } else {
        data.get("id")
            .and_then(|v| v.as_str())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    }
}

/// Extract artwork URL from an artworks resource's attributes.files array.
fn extract_artwork_href(attrs: &serde_json::Value) -> Option<String> {
    attrs
        .get("files")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            // The last entry in files tends to be the largest rendition
            arr.last()
                .or(arr.first())
                .and_then(|f| f.get("href").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
        })
}

/// Try to extract an image URL from various possible attribute locations.
/// Falls back through multiple patterns since the response format varies
/// between endpoints.
fn extract_image_url(attrs: &serde_json::Value) -> Option<String> {
    if let Some(url) = extract_artwork_href(attrs) {
        return Some(url);
    }

    if let Some(url) = attrs
        .get("imageLinks")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("href"))
        .and_then(|v| v.as_str())
    {
        return Some(url.to_string());
    }

    if let Some(url) = attrs
        .get("image")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("href"))
        .and_then(|v| v.as_str())
    {
        return Some(url.to_string());
    }

    if let Some(url) = attrs.get("imageUrl").and_then(|v| v.as_str()) {
        return Some(url.to_string());
    }

    None
}

/// Build lookup maps from a JSON:API included array.
/// Returns (artist_map, album_map, artwork_map).
pub(crate) fn build_lookup_maps(
    included: &[serde_json::Value],
) -> (
    HashMap<String, String>,                   // artist_id -> name
    HashMap<String, (String, Option<String>)>, // album_id -> (title, artwork_url)
    HashMap<String, String>,                   // artwork_id -> href URL
) {
    let mut artist_map: HashMap<String, String> = HashMap::new();
    let mut album_map: HashMap<String, (String, Option<String>)> = HashMap::new();
    let mut artwork_map: HashMap<String, String> = HashMap::new();

    // Artworks first, so album entries can resolve their coverArt ids
    for item in included {
        if item.get("type").and_then(|v| v.as_str()) == Some("artworks") {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if let Some(attrs) = item.get("attributes") {
                if let Some(href) = extract_artwork_href(attrs) {
                    artwork_map.insert(id, href);
                }
            }
        }
    }

    for item in included {
        let resource_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let attrs = item.get("attributes");
        let rels = item.get("relationships");

        match resource_type {
            "artists" => {
                if let Some(name) = attrs.and_then(|a| a.get("name")).and_then(|v| v.as_str()) {
                    artist_map.insert(id, name.to_string());
                }
            }
            "albums" => {
                if let Some(title) = attrs.and_then(|a| a.get("title")).and_then(|v| v.as_str()) {
                    let artwork = get_first_relationship_id(rels, "coverArt")
                        .and_then(|art_id| artwork_map.get(&art_id).cloned())
                        .or_else(|| extract_image_url(&attrs.cloned().unwrap_or_default()));
                    album_map.insert(id, (title.to_string(), artwork));
                }
            }
            _ => {}
        }
    }

    (artist_map, album_map, artwork_map)
}

/// Fill a track's artist credits and album fields from relationship ids
/// resolved against the lookup maps.
fn apply_track_lookups(
    track: &mut Track,
    rels: Option<&serde_json::Value>,
    artist_map: &HashMap<String, String>,
    album_map: &HashMap<String, (String, Option<String>)>,
) {
    let artist_ids = get_relationship_ids(rels, "artists");
    let names: Vec<String> = artist_ids
        .iter()
        .filter_map(|id| artist_map.get(id).cloned())
        .collect();
    if !names.is_empty() {
        track.artist_name = names[0].clone();
        track.artist_id = artist_ids.first().cloned();
        track.artists = names;
    }

    if let Some(album_id) = get_first_relationship_id(rels, "albums") {
        if let Some((title, artwork)) = album_map.get(&album_id) {
            track.album_name = title.clone();
            track.album_id = Some(album_id);
            if track.artwork_url.is_none() {
                track.artwork_url = artwork.clone();
            }
        }
    }
}

fn parse_search_results(body: &serde_json::Value) -> SearchResults {
    let included = body.get("included").and_then(|v| v.as_array());

    let empty_vec = Vec::new();
    let items = included.unwrap_or(&empty_vec);

    let (artist_map, album_map, artwork_map) = build_lookup_maps(items);

    let mut tracks = Vec::new();
    let mut albums = Vec::new();
    let mut artists = Vec::new();
    let mut playlists = Vec::new();

    for item in items {
        let resource_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let attrs = item.get("attributes").cloned().unwrap_or_default();
        let rels = item.get("relationships");

        match resource_type {
            "tracks" => {
                if let Some(mut track) = parse_track(&id, &attrs) {
                    apply_track_lookups(&mut track, rels, &artist_map, &album_map);
                    tracks.push(track);
                }
            }
            "albums" => {
                if let Some(mut album) = parse_album(&id, &attrs) {
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
            "artists" => {
                if let Some(mut artist) = parse_artist(&id, &attrs) {
                    if artist.picture_url.is_none() {
                        artist.picture_url = get_first_relationship_id(rels, "profileArt")
                            .and_then(|art_id| artwork_map.get(&art_id).cloned());
                    }
                    artists.push(artist);
                }
            }
            "playlists" => {
                if let Some(mut playlist) = parse_playlist(&id, &attrs) {
                    if playlist.artwork_url.is_none() {
                        playlist.artwork_url = get_first_relationship_id(rels, "coverArt")
                            .and_then(|art_id| artwork_map.get(&art_id).cloned());
                    }
                    playlists.push(playlist);
                }
            }
            _ => {}
        }
    }

    SearchResults {
        tracks,
        albums,
        artists,
        playlists,
    }
}

/// Parse a batch response from GET /tracks?filter[id]=... with
/// include=artists,albums. Returns fully resolved tracks.
fn parse_tracks_batch(body: &serde_json::Value) -> Vec<Track> {
    let data = body.get("data").and_then(|v| v.as_array());
    let included = body.get("included").and_then(|v| v.as_array());

    let empty_vec = Vec::new();
    let inc_items = included.unwrap_or(&empty_vec);
    let (artist_map, album_map, _artwork_map) = build_lookup_maps(inc_items);

    let mut tracks = Vec::new();
    if let Some(items) = data {
        for item in items {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let attrs = item.get("attributes").cloned().unwrap_or_default();
            let rels = item.get("relationships");

            if let Some(mut track) = parse_track(&id, &attrs) {
                apply_track_lookups(&mut track, rels, &artist_map, &album_map);
                tracks.push(track);
            }
        }
    }

    tracks
}

/// Parse tracks from a JSON:API included array, resolving artist and album
/// relationships against the other included resources. The listing
/// endpoints (album items, playlist items, favorites, similar tracks) all
/// share this response shape.
pub(crate) fn parse_tracks_from_included(included: Option<&Vec<serde_json::Value>>) -> Vec<Track> {
    let items = match included {
        Some(items) => items,
        None => return Vec::new(),
    };

    let (artist_map, album_map, _artwork_map) = build_lookup_maps(items);

    let mut tracks = Vec::new();
    for item in items {
        let resource_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if resource_type == "tracks" {
            let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
            let attrs = item.get("attributes").cloned().unwrap_or_default();
            let rels = item.get("relationships");
            if let Some(mut track) = parse_track(id, &attrs) {
                apply_track_lookups(&mut track, rels, &artist_map, &album_map);
                tracks.push(track);
            }
        }
    }

    tracks
}

/// Parse a track from its attributes. Artist/album names default to
/// "Unknown" and are overridden from relationships by the caller when the
/// included resources carry them.
pub fn parse_track(id: &str, attrs: &serde_json::Value) -> Option<Track> {
    let title = attrs.get("title")?.as_str()?.to_string();

    // Tidal v2 uses ISO 8601 duration strings (e.g., "PT2M58S"), but
    // some surfaces still hand back plain seconds
    let duration = attrs
        .get("duration")
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().map(parse_iso8601_duration))
        })
        .unwrap_or(0.0);

    let artist_name = attrs
        .get("artistName")
        .or_else(|| attrs.get("artist"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Artist")
        .to_string();

    let album_name = attrs
        .get("albumName")
        .or_else(|| attrs.get("album"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Album")
        .to_string();

    let artwork_url = extract_image_url(attrs);

    let media_tags = attrs
        .get("mediaTags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    // An availability array that omits STREAM marks the track unplayable
    // in the active region; a missing array means available.
    let available = attrs
        .get("availability")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().any(|x| x.as_str() == Some("STREAM")))
        .unwrap_or(true);

    Some(Track {
        id: id.to_string(),
        title,
        duration,
        track_number: attrs
            .get("trackNumber")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        volume_number: attrs
            .get("volumeNumber")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        isrc: attrs
            .get("isrc")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        artist_name,
        artist_id: None,
        artists: Vec::new(),
        album_name,
        album_id: None,
        artwork_url,
        explicit: attrs
            .get("explicit")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        available,
        media_tags,
    })
}

/// Resolve a track's artist/album from a JSON:API included array.
/// Used by get_track and similar single-resource endpoints.
pub fn resolve_track_relationships(
    track: &mut Track,
    rels: Option<&serde_json::Value>,
    included: Option<&Vec<serde_json::Value>>,
) {
    let items = match included {
        Some(items) => items,
        None => return,
    };

    let (artist_map, album_map, _artwork_map) = build_lookup_maps(items);
    apply_track_lookups(track, rels, &artist_map, &album_map);
}

pub fn parse_album(id: &str, attrs: &serde_json::Value) -> Option<Album> {
    let title = attrs.get("title")?.as_str()?.to_string();

    let artist_name = attrs
        .get("artistName")
        .or_else(|| attrs.get("artist"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Artist")
        .to_string();

    let artwork_url = extract_image_url(attrs);

    let duration = attrs.get("duration").and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().map(parse_iso8601_duration))
    });

    let media_tags = attrs
        .get("mediaTags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Some(Album {
        id: id.to_string(),
        title,
        artist_name,
        artist_id: None,
        duration,
        number_of_tracks: attrs
            .get("numberOfTracks")
            .or_else(|| attrs.get("numberOfItems"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        number_of_volumes: attrs
            .get("numberOfVolumes")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        release_date: attrs
            .get("releaseDate")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        artwork_url,
        media_tags,
    })
}

pub fn parse_artist(id: &str, attrs: &serde_json::Value) -> Option<Artist> {
    let name = attrs.get("name")?.as_str()?.to_string();

    let picture_url = extract_image_url(attrs);

    Some(Artist {
        id: id.to_string(),
        name,
        picture_url,
    })
}

pub fn parse_playlist(id: &str, attrs: &serde_json::Value) -> Option<Playlist> {
    let name = attrs.get("name")?.as_str()?.to_string();

    let artwork_url = extract_image_url(attrs);

    let duration = attrs.get("duration").and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().map(parse_iso8601_duration))
    });

    Some(Playlist {
        id: id.to_string(),
        name,
        description: attrs
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        duration,
        number_of_items: attrs
            .get("numberOfItems")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        playlist_type: attrs
            .get("playlistType")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        artwork_url,
        creator_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso8601_durations_parse_to_seconds() {
        assert_eq!(parse_iso8601_duration("PT2M58S"), 178.0);
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), 3723.0);
        assert_eq!(parse_iso8601_duration("PT45S"), 45.0);
        assert_eq!(parse_iso8601_duration("PT0S"), 0.0);
        assert_eq!(parse_iso8601_duration("garbage"), 0.0);
    }

    #[test]
    fn first_relationship_id_handles_to_one_and_to_many() {
        let rels = json!({
            "artists": { "data": [{ "type": "artists", "id": "a1" }, { "type": "artists", "id": "a2" }] },
            "albums": { "data": { "type": "albums", "id": "al9" } }
        });
        assert_eq!(
            get_first_relationship_id(Some(&rels), "artists"),
            Some("a1".to_string())
        );
        assert_eq!(
            get_first_relationship_id(Some(&rels), "albums"),
            Some("al9".to_string())
        );
        assert_eq!(get_first_relationship_id(Some(&rels), "coverArt"), None);
        assert_eq!(
            get_relationship_ids(Some(&rels), "artists"),
            vec!["a1".to_string(), "a2".to_string()]
        );
    }

    #[test]
    fn track_parses_iso_duration_and_flags() {
        let attrs = json!({
            "title": "Song",
            "duration": "PT3M30S",
            "explicit": true,
            "isrc": "USX123",
            "trackNumber": 4,
            "availability": ["STREAM", "DJ"]
        });
        let track = parse_track("77", &attrs).unwrap();
        assert_eq!(track.id, "77");
        assert_eq!(track.duration, 210.0);
        assert!(track.explicit);
        assert!(track.available);
        assert_eq!(track.track_number, Some(4));
        assert_eq!(track.artist_name, "Unknown Artist");

        let gone = parse_track("78", &json!({"title": "Gone", "availability": ["DJ"]})).unwrap();
        assert!(!gone.available);
    }

    #[test]
    fn included_resources_resolve_credits_and_artwork() {
        let included = vec![
            json!({
                "type": "tracks", "id": "t1",
                "attributes": { "title": "Song", "duration": "PT2M0S" },
                "relationships": {
                    "artists": { "data": [{ "type": "artists", "id": "a1" }, { "type": "artists", "id": "a2" }] },
                    "albums": { "data": [{ "type": "albums", "id": "al1" }] }
                }
            }),
            json!({ "type": "artists", "id": "a1", "attributes": { "name": "Lead" } }),
            json!({ "type": "artists", "id": "a2", "attributes": { "name": "Feature" } }),
            json!({
                "type": "albums", "id": "al1",
                "attributes": { "title": "The Album" },
                "relationships": { "coverArt": { "data": [{ "type": "artworks", "id": "art1" }] } }
            }),
            json!({
                "type": "artworks", "id": "art1",
                "attributes": { "files": [{ "href": "https://img/s.jpg" }, { "href": "https://img/l.jpg" }] }
            }),
        ];

        let tracks = parse_tracks_from_included(Some(&included));
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.artist_name, "Lead");
        assert_eq!(track.artists, vec!["Lead", "Feature"]);
        assert_eq!(track.album_name, "The Album");
        assert_eq!(track.album_id, Some("al1".to_string()));
        // Largest rendition wins
        assert_eq!(track.artwork_url, Some("https://img/l.jpg".to_string()));
    }

    #[test]
    fn search_results_parse_every_kind() {
        let body = json!({
            "data": { "type": "searchResults", "id": "q" },
            "included": [
                { "type": "tracks", "id": "t1", "attributes": { "title": "Hit", "duration": "PT3M0S" } },
                { "type": "albums", "id": "al1", "attributes": { "title": "LP" } },
                { "type": "artists", "id": "a1", "attributes": { "name": "Band" } },
                { "type": "playlists", "id": "p1", "attributes": { "name": "Road Trip" } }
            ]
        });
        let results = parse_search_results(&body);
        assert_eq!(results.tracks.len(), 1);
        assert_eq!(results.albums.len(), 1);
        assert_eq!(results.artists.len(), 1);
        assert_eq!(results.playlists.len(), 1);
        assert_eq!(results.playlists[0].name, "Road Trip");
    }
}
