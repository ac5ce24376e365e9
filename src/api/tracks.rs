use crate::api::client::TidalClient;
use crate::api::models::{AudioQuality, Lyrics, Track};
use crate::api::search::{parse_track, parse_tracks_from_included, resolve_track_relationships};
use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// v1 API base URL for playback endpoints
const V1_BASE_URL: &str = "https://api.tidal.com/v1";

impl TidalClient {
    pub async fn get_track(&self, track_id: &str) -> AppResult<Track> {
        let country = self.country_code().await;

        let path = format!("/tracks/{}", track_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("include", "artists,albums,albums.coverArt"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let data = body.get("data");
        let id = data
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or(track_id);
        let attrs = data
            .and_then(|d| d.get("attributes"))
            .cloned()
            .unwrap_or_default();
        let rels = data.and_then(|d| d.get("relationships"));
        let included = body.get("included").and_then(|v| v.as_array());

        let mut track = parse_track(id, &attrs)
            .ok_or_else(|| AppError::NotFound(format!("Track {} not found", track_id)))?;

        resolve_track_relationships(&mut track, rels, included);

        Ok(track)
    }

    /// Fetch playback manifest for a track.
    ///
    /// Tries the v2 trackManifests endpoint with uriScheme=DATA first, then
    /// falls back to the v1 /tracks/{id}/playbackinfo endpoint. Only the v1
    /// response carries replay gain and sample format details.
    pub async fn get_track_manifest(&self, track_id: &str) -> AppResult<TrackManifestData> {
        match self.get_track_manifest_v2(track_id).await {
            Ok(data) => return Ok(data),
            Err(e) => {
                log::info!("v2 trackManifests failed for {}: {}, trying v1", track_id, e);
            }
        }

        self.get_track_manifest_v1(track_id).await
    }

    /// v2 API: GET /trackManifests/{id} with uriScheme=DATA.
    /// Returns a data URL containing the manifest (DASH XML or HLS).
    async fn get_track_manifest_v2(&self, track_id: &str) -> AppResult<TrackManifestData> {
        let quality = self.settings().read().await.quality_tier();

        let formats = match quality {
            AudioQuality::HiResLossless => "FLAC_HIRES,FLAC,AACLC,HEAACV1",
            AudioQuality::Lossless => "FLAC,AACLC,HEAACV1",
            _ => "AACLC,HEAACV1",
        };

        let path = format!("/trackManifests/{}", track_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("manifestType", "MPEG_DASH"),
                    ("formats", formats),
                    ("uriScheme", "DATA"),
                    ("usage", "PLAYBACK"),
                    ("adaptive", "false"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;

        let attrs = body
            .get("data")
            .and_then(|d| d.get("attributes"))
            .ok_or_else(|| AppError::NotFound("No manifest data in v2 response".into()))?;

        let data_uri = attrs
            .get("uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::NotFound("No URI in v2 manifest".into()))?;

        let codec_from_formats = attrs
            .get("formats")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .unwrap_or("AACLC");

        parse_data_url_manifest(data_uri, codec_from_formats, quality)
    }

    /// v1 API: GET /tracks/{id}/playbackinfo.
    /// Returns a base64 BTS/EMU/DASH manifest plus replay gain, peak,
    /// sample rate and bit depth.
    async fn get_track_manifest_v1(&self, track_id: &str) -> AppResult<TrackManifestData> {
        let (quality, client_id) = {
            let settings = self.settings().read().await;
            (settings.quality_tier(), settings.client_id.clone())
        };
        let token = self.access_token().await?;

        let audio_quality = match quality {
            AudioQuality::HiResLossless => "HI_RES_LOSSLESS",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::Low => "LOW",
            AudioQuality::High => "HIGH",
        };

        let url = format!("{}/tracks/{}/playbackinfo", V1_BASE_URL, track_id);
        log::debug!("fetching v1 playback info for {} quality={}", track_id, audio_quality);

        let response = self
            .http_client()
            .get(&url)
            .bearer_auth(&token)
            .header("x-tidal-token", &client_id)
            .query(&[
                ("playbackmode", "STREAM"),
                ("assetpresentation", "FULL"),
                ("audioquality", audio_quality),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AppError::AuthRequired);
            }
            let message = response.text().await.unwrap_or_default();
            log::error!("v1 playback info failed ({}): {}", status, message);
            return Err(AppError::TidalApi {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response.json().await?;

        let manifest_mime = body
            .get("manifestMimeType")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let manifest_b64 = body
            .get("manifest")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::NotFound("No manifest in v1 playback info".into()))?;

        let manifest_bytes = STANDARD
            .decode(manifest_b64)
            .map_err(|e| AppError::Decode(format!("Base64 decode failed: {}", e)))?;
        let manifest_str = String::from_utf8(manifest_bytes)
            .map_err(|e| AppError::Decode(format!("UTF-8 decode failed: {}", e)))?;

        let served_quality = body
            .get("audioQuality")
            .and_then(|v| v.as_str())
            .and_then(AudioQuality::from_api_str)
            .unwrap_or(quality);

        let sample_rate = body
            .get("sampleRate")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        let bit_depth = body
            .get("bitDepth")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        let replay_gain = body
            .get("trackReplayGain")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32);
        let peak_amplitude = body
            .get("trackPeakAmplitude")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32);

        let fallback_codec = served_quality.as_param();
        let (uri, codec) = match manifest_mime {
            "application/vnd.tidal.bts" | "application/vnd.tidal.emu" => {
                parse_bts_manifest(&manifest_str, fallback_codec)?
            }
            "application/dash+xml" => {
                let uri = extract_dash_base_url(&manifest_str).ok_or_else(|| {
                    AppError::Decode("Could not extract URL from DASH manifest".into())
                })?;
                let codec = extract_dash_codec(&manifest_str)
                    .unwrap_or_else(|| fallback_codec.to_string());
                (uri, codec)
            }
            other => {
                log::error!("unsupported manifest type: {}", other);
                return Err(AppError::Decode(format!(
                    "Unsupported manifest type: {}",
                    other
                )));
            }
        };

        log::debug!(
            "v1 manifest: codec={} quality={} gain={:?}",
            codec,
            served_quality,
            replay_gain
        );

        Ok(TrackManifestData {
            uri,
            codec,
            quality: served_quality,
            sample_rate,
            bit_depth,
            replay_gain,
            peak_amplitude,
        })
    }

    /// v1 API lyrics. Not every track has them; a 404 maps to NotFound.
    pub async fn get_track_lyrics(&self, track_id: &str) -> AppResult<Lyrics> {
        let client_id = self.settings().read().await.client_id.clone();
        let token = self.access_token().await?;
        let country = self.country_code().await;

        let url = format!("{}/tracks/{}/lyrics", V1_BASE_URL, track_id);
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
                "No lyrics for track {}",
                track_id
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
        Ok(Lyrics {
            track_id: track_id.to_string(),
            lyrics: body
                .get("lyrics")
                .and_then(|v| v.as_str())
                .map(String::from),
            subtitles: body
                .get("subtitles")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }

    pub async fn get_similar_tracks(&self, track_id: &str) -> AppResult<Vec<Track>> {
        let country = self.country_code().await;

        let path = format!("/tracks/{}/relationships/similarTracks", track_id);
        let response = self
            .get_with_query(
                &path,
                &[
                    ("countryCode", country.as_str()),
                    ("include", "similarTracks,similarTracks.artists,similarTracks.albums,similarTracks.albums.coverArt"),
                ],
            )
            .await?;

        let body: serde_json::Value = response.json().await?;
        let included = body.get("included").and_then(|v| v.as_array());

        Ok(parse_tracks_from_included(included))
    }

    /// Track radio: resolve the track's station mix on the v1 surface and
    /// return its items. Falls back to similar tracks when the station is
    /// unavailable.
    pub async fn get_track_radio(&self, track_id: &str) -> AppResult<Vec<Track>> {
        let client_id = self.settings().read().await.client_id.clone();
        let token = self.access_token().await?;
        let country = self.country_code().await;

        let url = format!("{}/tracks/{}/mix", V1_BASE_URL, track_id);
        let response = self
            .http_client()
            .get(&url)
            .bearer_auth(&token)
            .header("x-tidal-token", &client_id)
            .query(&[("countryCode", country.as_str())])
            .send()
            .await;

        let mix_id = match response {
            Ok(r) if r.status().is_success() => r
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("id").and_then(|v| v.as_str()).map(String::from)),
            Ok(r) => {
                log::warn!("v1 track mix for {} failed: {}", track_id, r.status());
                None
            }
            Err(e) => {
                log::warn!("v1 track mix for {} failed: {}", track_id, e);
                None
            }
        };

        match mix_id {
            Some(id) => self.get_mix_tracks(&id).await,
            None => self.get_similar_tracks(track_id).await,
        }
    }
}

/// Manifest data resolved for one playback attempt. The URI expires
/// server-side, so none of this is cached.
#[derive(Debug, Clone)]
pub struct TrackManifestData {
    pub uri: String,
    pub codec: String,
    pub quality: AudioQuality,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub replay_gain: Option<f32>,
    pub peak_amplitude: Option<f32>,
}

/// Pull the first streaming URL and codec out of a BTS/EMU manifest body.
fn parse_bts_manifest(manifest_str: &str, fallback_codec: &str) -> AppResult<(String, String)> {
    let bts: serde_json::Value = serde_json::from_str(manifest_str)?;

    let encryption = bts
        .get("encryptionType")
        .and_then(|v| v.as_str())
        .unwrap_or("NONE");
    if encryption != "NONE" {
        log::warn!("track is DRM-encrypted ({}), playback may fail", encryption);
    }

    let uri = bts
        .get("urls")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::NotFound("No URL in BTS manifest".into()))?
        .to_string();

    let codec = bts
        .get("codecs")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_codec)
        .to_string();

    Ok((uri, codec))
}

/// Parse a data URL (data:{mime};base64,{content}) from the v2 manifest
/// endpoint into TrackManifestData.
fn parse_data_url_manifest(
    data_uri: &str,
    fallback_codec: &str,
    quality: AudioQuality,
) -> AppResult<TrackManifestData> {
    let descriptor = |uri: String, codec: String| TrackManifestData {
        uri,
        codec,
        quality,
        sample_rate: None,
        bit_depth: None,
        replay_gain: None,
        peak_amplitude: None,
    };

    let (mime, b64_content) = if let Some(rest) = data_uri.strip_prefix("data:") {
        if let Some((mime_part, b64_part)) = rest.split_once(";base64,") {
            (mime_part, b64_part)
        } else {
            return Err(AppError::Decode("Data URL missing ;base64, separator".into()));
        }
    } else if data_uri.starts_with("https://") {
        // Direct HTTPS URL instead of a data URL: use it as-is
        return Ok(descriptor(
            data_uri.to_string(),
            fallback_codec.to_string(),
        ));
    } else {
        return Err(AppError::Decode(
            "Could not parse data URL from v2 response".into(),
        ));
    };

    let manifest_bytes = STANDARD
        .decode(b64_content)
        .map_err(|e| AppError::Decode(format!("Base64 decode of data URL failed: {}", e)))?;
    let manifest_str = String::from_utf8(manifest_bytes)
        .map_err(|e| AppError::Decode(format!("UTF-8 decode of data URL failed: {}", e)))?;

    match mime {
        "application/vnd.tidal.bts" | "application/vnd.tidal.emu" => {
            let (uri, codec) = parse_bts_manifest(&manifest_str, fallback_codec)?;
            Ok(descriptor(uri, codec))
        }
        "application/dash+xml" => {
            let uri = extract_dash_base_url(&manifest_str)
                .ok_or_else(|| AppError::Decode("Could not extract BaseURL from DASH MPD".into()))?;
            let codec =
                extract_dash_codec(&manifest_str).unwrap_or_else(|| fallback_codec.to_string());
            Ok(descriptor(uri, codec))
        }
        "application/vnd.apple.mpegurl" => {
            let uri = extract_hls_url(&manifest_str)
                .ok_or_else(|| AppError::Decode("Could not extract URL from HLS manifest".into()))?;
            Ok(descriptor(uri, fallback_codec.to_string()))
        }
        _ => Err(AppError::Decode(format!(
            "Unsupported data URL mime type: {}",
            mime
        ))),
    }
}

/// Extract the first BaseURL from a DASH MPD XML manifest.
fn extract_dash_base_url(mpd_xml: &str) -> Option<String> {
    let start_tag = "<BaseURL>";
    let end_tag = "</BaseURL>";
    let start = mpd_xml.find(start_tag)? + start_tag.len();
    let end = mpd_xml[start..].find(end_tag)? + start;
    Some(mpd_xml[start..end].trim().to_string())
}

/// Extract codec from a DASH Representation element.
fn extract_dash_codec(mpd_xml: &str) -> Option<String> {
    let codecs_start = mpd_xml.find("codecs=\"")? + 8;
    let codecs_end = mpd_xml[codecs_start..].find('"')? + codecs_start;
    Some(mpd_xml[codecs_start..codecs_end].to_string())
}

/// Extract a stream URL from an HLS playlist.
fn extract_hls_url(hls: &str) -> Option<String> {
    for line in hls.lines() {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            return Some(line.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bts_data_url_yields_first_stream_url() {
        let bts = serde_json::json!({
            "mimeType": "audio/flac",
            "codecs": "flac",
            "encryptionType": "NONE",
            "urls": ["https://sp-ad.example/a.flac", "https://sp-ad.example/b.flac"]
        });
        let b64 = STANDARD.encode(bts.to_string());
        let data_uri = format!("data:application/vnd.tidal.bts;base64,{}", b64);

        let manifest =
            parse_data_url_manifest(&data_uri, "AACLC", AudioQuality::Lossless).unwrap();
        assert_eq!(manifest.uri, "https://sp-ad.example/a.flac");
        assert_eq!(manifest.codec, "flac");
        assert_eq!(manifest.quality, AudioQuality::Lossless);
        assert!(manifest.replay_gain.is_none());
    }

    #[test]
    fn direct_https_uri_passes_through() {
        let manifest = parse_data_url_manifest(
            "https://sp-ad.example/direct.m4a",
            "AACLC",
            AudioQuality::High,
        )
        .unwrap();
        assert_eq!(manifest.uri, "https://sp-ad.example/direct.m4a");
        assert_eq!(manifest.codec, "AACLC");
    }

    #[test]
    fn malformed_data_url_is_a_decode_error() {
        let err = parse_data_url_manifest("data:application/vnd.tidal.bts,nope", "AACLC", AudioQuality::High)
            .unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn dash_mpd_base_url_and_codec_extract() {
        let mpd = r#"<?xml version="1.0"?>
            <MPD><Period><AdaptationSet>
              <Representation codecs="flac" bandwidth="1411000">
                <BaseURL> https://sp-ad.example/seg.flac </BaseURL>
              </Representation>
            </AdaptationSet></Period></MPD>"#;
        assert_eq!(
            extract_dash_base_url(mpd),
            Some("https://sp-ad.example/seg.flac".to_string())
        );
        assert_eq!(extract_dash_codec(mpd), Some("flac".to_string()));
    }

    #[test]
    fn hls_first_non_comment_line_is_the_url() {
        let hls = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:4.0,\nhttps://sp-ad.example/seg0.ts\n";
        assert_eq!(
            extract_hls_url(hls),
            Some("https://sp-ad.example/seg0.ts".to_string())
        );
        assert_eq!(extract_hls_url("#EXTM3U\n"), None);
    }
}
