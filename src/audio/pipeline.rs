use crate::audio::decoder::AudioDecoder;
use crate::audio::normalize::Limiter;
use crate::audio::stream_source::{HttpStreamSource, StreamWriter};
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Notifications from the audio threads back to the orchestrator. Sent
/// over an unbounded channel so the decode thread and output callback
/// never block on the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Initial buffering progress, 0..=100.
    Buffering(u8),
    /// The ring drained after the decoder finished; the track is over.
    Finished,
    /// Decoding failed mid-track.
    Failed(String),
}

/// Shared ring buffer between the decode thread and the cpal callback.
struct SampleRingBuffer {
    buffer: VecDeque<f32>,
    finished: bool,
}

/// Wrapper to make cpal::Stream Send+Sync. This is safe because the
/// stream only has a single logical owner (Pipeline) and is created and
/// dropped on the same thread, which is the pattern macOS CoreAudio
/// requires.
struct SendStream(Option<cpal::Stream>);
unsafe impl Send for SendStream {}
unsafe impl Sync for SendStream {}

/// Sentinel value meaning "no seek requested".
const NO_SEEK: u64 = u64::MAX;

/// Decode-thread back-pressure limit (~1s of 44.1kHz stereo).
const MAX_RING_SAMPLES: usize = 176_400;

/// One decoded track's worth of audio plumbing: a decode thread feeding a
/// ring buffer drained by a cpal output stream.
///
/// `load` leaves the graph primed and paused; `play`/`pause` only flip the
/// playing flag, so both are idempotent and cheap. Rebinding the output
/// device rebuilds only the cpal stream and leaves the decoder and ring
/// untouched.
pub struct Pipeline {
    stream: SendStream,
    ring: Arc<(Mutex<SampleRingBuffer>, Condvar)>,
    /// Linear volume [0.0, 1.0]; the callback optionally applies a
    /// quadratic taper.
    volume: Arc<Mutex<f32>>,
    samples_played: Arc<AtomicU64>,
    sample_rate: Arc<Mutex<u32>>,
    channels: Arc<Mutex<usize>>,
    playing: Arc<AtomicBool>,
    decode_handle: Option<std::thread::JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    total_duration: Arc<Mutex<f64>>,
    /// Seek target in milliseconds; the decode thread reads and clears it.
    seek_target_ms: Arc<AtomicU64>,
    normalization: Arc<AtomicBool>,
    quadratic_taper: Arc<AtomicBool>,
    /// Output device index, -1 for the system default.
    sink_index: Mutex<i32>,
    eos_sent: Arc<AtomicBool>,
    events: UnboundedSender<PipelineEvent>,
}

impl Pipeline {
    pub fn new(
        events: UnboundedSender<PipelineEvent>,
        normalization: bool,
        quadratic_taper: bool,
    ) -> Self {
        Self {
            stream: SendStream(None),
            ring: Arc::new((
                Mutex::new(SampleRingBuffer {
                    buffer: VecDeque::with_capacity(88_200),
                    finished: false,
                }),
                Condvar::new(),
            )),
            volume: Arc::new(Mutex::new(1.0)),
            samples_played: Arc::new(AtomicU64::new(0)),
            sample_rate: Arc::new(Mutex::new(44_100)),
            channels: Arc::new(Mutex::new(2)),
            playing: Arc::new(AtomicBool::new(false)),
            decode_handle: None,
            stop_signal: Arc::new(AtomicBool::new(false)),
            total_duration: Arc::new(Mutex::new(0.0)),
            seek_target_ms: Arc::new(AtomicU64::new(NO_SEEK)),
            normalization: Arc::new(AtomicBool::new(normalization)),
            quadratic_taper: Arc::new(AtomicBool::new(quadratic_taper)),
            sink_index: Mutex::new(-1),
            eos_sent: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Builds the graph for a new track and leaves it paused at zero.
    /// Probing the container blocks on network reads, so call this off the
    /// async runtime.
    pub fn load(
        &mut self,
        source: HttpStreamSource,
        codec_hint: Option<&str>,
        duration: f64,
        replay_gain: f32,
    ) -> AppResult<()> {
        self.stop_internal();

        let mut decoder = AudioDecoder::new(source, codec_hint)?;
        let sr = decoder.sample_rate();
        let ch = decoder.channels();

        *self.sample_rate.lock().unwrap() = sr;
        *self.channels.lock().unwrap() = ch;
        *self.total_duration.lock().unwrap() = duration;
        self.samples_played.store(0, Ordering::SeqCst);
        self.seek_target_ms.store(NO_SEEK, Ordering::SeqCst);
        self.eos_sent.store(false, Ordering::SeqCst);

        {
            let (lock, cvar) = &*self.ring;
            let mut ring = lock.lock().unwrap();
            ring.buffer.clear();
            ring.finished = false;
            cvar.notify_all();
        }

        self.build_output_stream(sr, ch)?;
        self.playing.store(false, Ordering::SeqCst);

        let ring_clone = Arc::clone(&self.ring);
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Arc::clone(&stop_signal);
        let seek_target = Arc::clone(&self.seek_target_ms);
        let samples_played = Arc::clone(&self.samples_played);
        let normalization = Arc::clone(&self.normalization);
        let events = self.events.clone();

        let handle = std::thread::spawn(move || {
            let mut limiter = Limiter::new(replay_gain, sr, ch);
            let mut buffering_done = false;
            let mut last_percent = 0u8;

            loop {
                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }

                let pending_seek = seek_target.swap(NO_SEEK, Ordering::SeqCst);
                if pending_seek != NO_SEEK {
                    let seek_seconds = pending_seek as f64 / 1000.0;
                    log::debug!("decode thread: seeking to {:.2}s", seek_seconds);

                    {
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.buffer.clear();
                        cvar.notify_all();
                    }

                    if let Err(e) = decoder.seek(seek_seconds) {
                        log::error!("decode thread: seek failed: {}", e);
                    }
                    limiter.reset();

                    // Keep the position counter honest even on a failed seek.
                    let new_samples = (seek_seconds * sr as f64 * ch as f64) as u64;
                    samples_played.store(new_samples, Ordering::SeqCst);
                    continue;
                }

                {
                    let (lock, cvar) = &*ring_clone;
                    let mut ring = lock.lock().unwrap();
                    while ring.buffer.len() >= MAX_RING_SAMPLES
                        && !stop_signal.load(Ordering::Relaxed)
                        && seek_target.load(Ordering::Relaxed) == NO_SEEK
                    {
                        if !buffering_done {
                            buffering_done = true;
                            let _ = events.send(PipelineEvent::Buffering(100));
                        }
                        ring = cvar.wait(ring).unwrap();
                    }
                }

                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }
                if seek_target.load(Ordering::Relaxed) != NO_SEEK {
                    continue;
                }

                match decoder.decode_next() {
                    Ok(Some(mut decoded)) => {
                        if normalization.load(Ordering::Relaxed) {
                            limiter.process(&mut decoded.samples);
                        }
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.buffer.extend(decoded.samples.iter());
                        if !buffering_done {
                            let percent =
                                ((ring.buffer.len() * 100) / MAX_RING_SAMPLES).min(100) as u8;
                            if percent >= last_percent.saturating_add(10) || percent == 100 {
                                last_percent = percent;
                                let _ = events.send(PipelineEvent::Buffering(percent));
                            }
                            if percent == 100 {
                                buffering_done = true;
                            }
                        }
                        cvar.notify_all();
                    }
                    Ok(None) => {
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.finished = true;
                        if !buffering_done {
                            let _ = events.send(PipelineEvent::Buffering(100));
                        }
                        cvar.notify_all();
                        break;
                    }
                    Err(e) => {
                        log::error!("decode error: {}", e);
                        let _ = events.send(PipelineEvent::Failed(e.to_string()));
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.finished = true;
                        cvar.notify_all();
                        break;
                    }
                }
            }
        });

        self.decode_handle = Some(handle);
        Ok(())
    }

    /// (Re)creates the cpal output stream against the selected sink.
    fn build_output_stream(&mut self, sr: u32, ch: usize) -> AppResult<()> {
        let device = self.select_device()?;

        let stream_config = cpal::StreamConfig {
            channels: ch as u16,
            sample_rate: cpal::SampleRate(sr),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_clone = Arc::clone(&self.ring);
        let volume_clone = Arc::clone(&self.volume);
        let samples_played_clone = Arc::clone(&self.samples_played);
        let playing_clone = Arc::clone(&self.playing);
        let quadratic = Arc::clone(&self.quadratic_taper);
        let eos_sent = Arc::clone(&self.eos_sent);
        let events = self.events.clone();

        let cpal_stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !playing_clone.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }

                    let vol = *volume_clone.lock().unwrap();
                    let gain = if quadratic.load(Ordering::Relaxed) {
                        vol * vol
                    } else {
                        vol
                    };
                    let (lock, cvar) = &*ring_clone;
                    let mut ring = lock.lock().unwrap();

                    let available = ring.buffer.len().min(data.len());
                    for (i, sample) in data.iter_mut().enumerate() {
                        if i < available {
                            *sample = ring.buffer.pop_front().unwrap_or(0.0) * gain;
                        } else {
                            *sample = 0.0;
                        }
                    }

                    samples_played_clone.fetch_add(available as u64, Ordering::Relaxed);

                    if ring.finished
                        && ring.buffer.is_empty()
                        && !eos_sent.swap(true, Ordering::SeqCst)
                    {
                        let _ = events.send(PipelineEvent::Finished);
                    }

                    cvar.notify_all();
                },
                |err| {
                    log::error!("cpal output error: {}", err);
                },
                None,
            )
            .map_err(|e| AppError::Audio(format!("Failed to build output stream: {}", e)))?;

        cpal_stream
            .play()
            .map_err(|e| AppError::Audio(format!("Failed to start output stream: {}", e)))?;

        self.stream = SendStream(Some(cpal_stream));
        Ok(())
    }

    fn select_device(&self) -> AppResult<cpal::Device> {
        let host = cpal::default_host();
        let index = *self.sink_index.lock().unwrap();

        if index >= 0 {
            let devices = host
                .output_devices()
                .map_err(|e| AppError::Audio(format!("Failed to list output devices: {}", e)))?;
            for (i, device) in devices.enumerate() {
                if i as i32 == index {
                    return Ok(device);
                }
            }
            log::warn!("output device {} not found, falling back to default", index);
        }

        host.default_output_device()
            .ok_or_else(|| AppError::Audio("No output device available".into()))
    }

    /// Names of the available output devices, in sink-index order.
    pub fn list_sinks() -> Vec<String> {
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => devices
                .map(|d| d.name().unwrap_or_else(|_| "Unknown device".into()))
                .collect(),
            Err(e) => {
                log::warn!("failed to list output devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Rebinds playback to another output device. The decode thread and
    /// ring keep running; only the cpal stream is rebuilt.
    pub fn set_sink(&mut self, index: i32) -> AppResult<()> {
        *self.sink_index.lock().unwrap() = index;
        if self.decode_handle.is_some() {
            let sr = *self.sample_rate.lock().unwrap();
            let ch = *self.channels.lock().unwrap();
            self.build_output_stream(sr, ch)?;
        }
        Ok(())
    }

    /// Takes effect from the next decoded packet onward.
    pub fn set_normalization(&self, enabled: bool) {
        self.normalization.store(enabled, Ordering::SeqCst);
    }

    /// Perceptual volume taper; linear when off.
    pub fn set_quadratic_taper(&self, enabled: bool) {
        self.quadratic_taper.store(enabled, Ordering::SeqCst);
    }

    fn stop_internal(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);

        {
            let (_lock, cvar) = &*self.ring;
            cvar.notify_all();
        }

        if let Some(handle) = self.decode_handle.take() {
            let _ = handle.join();
        }

        self.stream = SendStream(None);
        self.stop_signal = Arc::new(AtomicBool::new(false));
    }

    pub fn stop(&mut self) {
        self.stop_internal();
        self.samples_played.store(0, Ordering::SeqCst);
        *self.total_duration.lock().unwrap() = 0.0;
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self) -> bool {
        self.decode_handle.is_some() || self.stream.0.is_some()
    }

    pub fn set_volume(&self, vol: f32) {
        *self.volume.lock().unwrap() = vol.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn position_seconds(&self) -> f64 {
        let samples = self.samples_played.load(Ordering::Relaxed) as f64;
        let sr = *self.sample_rate.lock().unwrap() as f64;
        let ch = *self.channels.lock().unwrap() as f64;
        if sr > 0.0 && ch > 0.0 {
            samples / (sr * ch)
        } else {
            0.0
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        *self.total_duration.lock().unwrap()
    }

    /// Seeks to a fraction of the track. Rejected while the duration is
    /// unknown, since there is nothing to scale the fraction against.
    pub fn seek_fraction(&self, fraction: f64) -> AppResult<()> {
        let duration = self.duration_seconds();
        if duration <= 0.0 {
            return Err(AppError::Audio("Cannot seek: duration unknown".into()));
        }
        self.seek_seconds(fraction.clamp(0.0, 1.0) * duration);
        Ok(())
    }

    pub fn seek_seconds(&self, position_seconds: f64) {
        let position_seconds = position_seconds.max(0.0);
        let ms = (position_seconds * 1000.0) as u64;
        self.seek_target_ms.store(ms, Ordering::SeqCst);

        // Wake the decode thread if it is parked on back-pressure.
        let (_lock, cvar) = &*self.ring;
        cvar.notify_all();

        // Update the counter immediately so progress stays responsive.
        let sr = *self.sample_rate.lock().unwrap() as f64;
        let ch = *self.channels.lock().unwrap() as f64;
        let sample_position = (position_seconds * sr * ch) as u64;
        self.samples_played.store(sample_position, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        let (lock, _) = &*self.ring;
        let ring = lock.lock().unwrap();
        ring.finished && ring.buffer.is_empty()
    }

    /// Streams a manifest URL into the writer end of an HttpStreamSource.
    pub fn start_download(
        writer: StreamWriter,
        url: String,
        client: reqwest::Client,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("starting audio download: {}...", &url[..url.len().min(100)]);
            match client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        log::error!(
                            "audio download failed ({}): {}",
                            status,
                            &body[..body.len().min(500)]
                        );
                        writer.set_error(format!("Download failed: HTTP {}", status));
                        return;
                    }

                    use futures_util::StreamExt;
                    let mut stream = response.bytes_stream();
                    let mut total_bytes = 0u64;
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(bytes) => {
                                total_bytes += bytes.len() as u64;
                                if !writer.write_bytes(&bytes) {
                                    log::debug!(
                                        "audio download: reader gone after {} bytes",
                                        total_bytes
                                    );
                                    break;
                                }
                            }
                            Err(e) => {
                                log::error!(
                                    "audio download stream error after {} bytes: {}",
                                    total_bytes,
                                    e
                                );
                                writer.set_error(format!("Download error: {}", e));
                                return;
                            }
                        }
                    }
                    log::debug!("audio download complete: {} bytes", total_bytes);
                    writer.finish();
                }
                Err(e) => {
                    log::error!("failed to start audio download: {}", e);
                    writer.set_error(format!("Failed to start download: {}", e));
                }
            }
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_internal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pipeline() -> (Pipeline, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Pipeline::new(tx, false, false), rx)
    }

    #[test]
    fn unloaded_pipeline_reports_idle_state() {
        let (pipeline, _rx) = test_pipeline();
        assert!(!pipeline.is_playing());
        assert!(!pipeline.is_loaded());
        assert_eq!(pipeline.position_seconds(), 0.0);
        assert_eq!(pipeline.duration_seconds(), 0.0);
    }

    #[test]
    fn seek_fraction_requires_a_known_duration() {
        let (pipeline, _rx) = test_pipeline();
        assert!(pipeline.seek_fraction(0.5).is_err());

        *pipeline.total_duration.lock().unwrap() = 200.0;
        assert!(pipeline.seek_fraction(0.5).is_ok());
        // Counter updates immediately, before the decode thread catches up.
        assert!((pipeline.position_seconds() - 100.0).abs() < 0.01);
    }

    #[test]
    fn seek_fraction_is_clamped() {
        let (pipeline, _rx) = test_pipeline();
        *pipeline.total_duration.lock().unwrap() = 100.0;
        pipeline.seek_fraction(7.0).unwrap();
        assert!((pipeline.position_seconds() - 100.0).abs() < 0.01);
        pipeline.seek_fraction(-3.0).unwrap();
        assert_eq!(pipeline.position_seconds(), 0.0);
    }

    #[test]
    fn volume_is_clamped_to_unit_range() {
        let (pipeline, _rx) = test_pipeline();
        pipeline.set_volume(1.7);
        assert_eq!(pipeline.volume(), 1.0);
        pipeline.set_volume(-0.2);
        assert_eq!(pipeline.volume(), 0.0);
        pipeline.set_volume(0.35);
        assert!((pipeline.volume() - 0.35).abs() < 1e-6);
    }

    #[test]
    fn play_and_pause_are_idempotent() {
        let (pipeline, _rx) = test_pipeline();
        pipeline.play();
        pipeline.play();
        assert!(pipeline.is_playing());
        pipeline.pause();
        pipeline.pause();
        assert!(!pipeline.is_playing());
    }

    #[test]
    fn position_tracks_the_sample_counter() {
        let (pipeline, _rx) = test_pipeline();
        // 2 seconds of 44.1kHz stereo.
        pipeline.samples_played.store(176_400, Ordering::SeqCst);
        assert!((pipeline.position_seconds() - 2.0).abs() < 1e-9);
    }
}
