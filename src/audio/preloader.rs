use crate::api::models::StreamDescriptor;
use crate::audio::pipeline::Pipeline;
use crate::audio::stream_source::HttpStreamSource;

/// A next-track download started ahead of time, ready to hand straight to
/// the pipeline when the current track ends.
///
/// Holds the stream source with its download already in flight; dropping
/// the struct aborts nothing (the writer just loses its reader), so a
/// stale preload is cheap to discard when the queue changes.
pub struct PreloadedTrack {
    pub source: HttpStreamSource,
    pub codec_hint: Option<String>,
    pub track_id: String,
    pub duration: f64,
    pub replay_gain: f32,
    pub descriptor: StreamDescriptor,
    /// Keep the download task alive.
    _download_handle: tokio::task::JoinHandle<()>,
}

impl PreloadedTrack {
    pub fn new(
        track_id: String,
        codec_hint: Option<String>,
        duration: f64,
        replay_gain: f32,
        descriptor: StreamDescriptor,
        client: reqwest::Client,
    ) -> Self {
        let (source, writer) = HttpStreamSource::new();

        let handle = Pipeline::start_download(writer, descriptor.url.clone(), client);

        Self {
            source,
            codec_hint,
            track_id,
            duration,
            replay_gain,
            descriptor,
            _download_handle: handle,
        }
    }
}
