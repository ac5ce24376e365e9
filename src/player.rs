use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::api::client::TidalClient;
use crate::api::models::{AudioQuality, Entity, StreamDescriptor, Track};
use crate::audio::pipeline::{Pipeline, PipelineEvent};
use crate::audio::preloader::PreloadedTrack;
use crate::audio::queue::{PlayQueue, RepeatMode};
use crate::audio::stream_source::HttpStreamSource;
use crate::cache::CatalogCache;
use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::events::{
    PlaybackState, PlayerEvent, ProgressPayload, QueueChangedPayload, StateChangedPayload,
    TrackChangedPayload,
};

/// Progress tick interval.
const TICK: Duration = Duration::from_millis(250);

/// Preload the next track once this little of the current one remains.
const PRELOAD_WINDOW_SECS: f64 = 30.0;

/// A previous-track request this far into the track restarts it instead.
const RESTART_THRESHOLD_SECS: f64 = 3.0;

/// No progress for this long while playing raises a stall toast.
const STALL_TOAST_SECS: f64 = 30.0;

/// What the user asked to play.
pub enum PlayTarget {
    /// One track on its own; the auto lane holds just it.
    Single(Arc<Track>),
    /// An ad-hoc flat list (search results, a home section).
    List {
        tracks: Vec<Arc<Track>>,
        start_index: usize,
    },
    /// A container resolved to its items before playback starts.
    Container { entity: Entity, start_index: usize },
}

/// Playback orchestrator: owns the queue, drives the pipeline, resolves
/// stream URLs, and broadcasts [`PlayerEvent`]s to every subscriber.
///
/// All mutation goes through `&self`; the struct is shared as an `Arc` so
/// resolution and the tick loop can run as spawned tasks.
pub struct Player {
    client: Arc<TidalClient>,
    cache: Arc<CatalogCache>,
    settings: Arc<RwLock<Settings>>,
    pipeline: Arc<StdMutex<Pipeline>>,
    queue: Mutex<PlayQueue>,
    events: broadcast::Sender<PlayerEvent>,
    /// Bumped on every track start; stale resolutions check it and drop
    /// their results instead of clobbering a newer track.
    generation: AtomicU64,
    /// Whether the user wants audio rolling once the pipeline is ready.
    intent_playing: AtomicBool,
    current_stream: RwLock<Option<StreamDescriptor>>,
    preloaded: Mutex<Option<PreloadedTrack>>,
    preload_triggered: AtomicBool,
    pipeline_events: StdMutex<Option<tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>>>,
}

impl Player {
    pub fn new(
        client: Arc<TidalClient>,
        cache: Arc<CatalogCache>,
        settings: Arc<RwLock<Settings>>,
        initial: &Settings,
    ) -> Arc<Self> {
        let (pipe_tx, pipe_rx) = tokio::sync::mpsc::unbounded_channel();
        let pipeline = Pipeline::new(pipe_tx, initial.normalize, initial.quadratic_volume);
        pipeline.set_volume(initial.volume_fraction());

        let mut queue = PlayQueue::new();
        queue.set_repeat(initial.repeat_mode());

        let (events, _) = broadcast::channel(64);

        Arc::new(Self {
            client,
            cache,
            settings,
            pipeline: Arc::new(StdMutex::new(pipeline)),
            queue: Mutex::new(queue),
            events,
            generation: AtomicU64::new(0),
            intent_playing: AtomicBool::new(false),
            current_stream: RwLock::new(None),
            preloaded: Mutex::new(None),
            preload_triggered: AtomicBool::new(false),
            pipeline_events: StdMutex::new(Some(pipe_rx)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn client(&self) -> &Arc<TidalClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.cache
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self, state: PlaybackState) {
        self.emit(PlayerEvent::StateChanged(StateChangedPayload { state }));
    }

    async fn emit_queue_changed(&self) {
        let queue = self.queue.lock().await;
        self.emit(PlayerEvent::QueueChanged(QueueChangedPayload {
            can_go_next: queue.can_advance(),
            can_go_prev: queue.can_retreat() || queue.current().is_some(),
        }));
    }

    /// Spawns the event pump and the progress tick loop. Call once.
    pub fn run(self: &Arc<Self>) {
        let receiver = self
            .pipeline_events
            .lock()
            .unwrap()
            .take()
            .expect("player event loop started twice");

        let player = Arc::clone(self);
        tokio::spawn(async move {
            player.pump_pipeline_events(receiver).await;
        });

        let player = Arc::clone(self);
        tokio::spawn(async move {
            player.tick_loop().await;
        });
    }

    async fn pump_pipeline_events(
        self: Arc<Self>,
        mut receiver: tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>,
    ) {
        while let Some(event) = receiver.recv().await {
            match event {
                PipelineEvent::Buffering(percent) => {
                    self.emit(PlayerEvent::Buffering { percent });
                }
                PipelineEvent::Finished => {
                    self.emit(PlayerEvent::TrackEnded);
                    self.advance_internal().await;
                }
                PipelineEvent::Failed(message) => {
                    log::error!("playback failed: {}", message);
                    self.emit(PlayerEvent::Toast {
                        message: format!("Playback error: {}", message),
                    });
                    self.advance_internal().await;
                }
            }
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK);
        let mut last_position = 0.0f64;
        let mut stalled_for = Duration::ZERO;
        let mut stall_toasted = false;

        loop {
            interval.tick().await;

            let (position, duration, playing, loaded) = {
                let pipeline = self.pipeline.lock().unwrap();
                (
                    pipeline.position_seconds(),
                    pipeline.duration_seconds(),
                    pipeline.is_playing(),
                    pipeline.is_loaded(),
                )
            };

            if !loaded {
                continue;
            }

            self.emit(PlayerEvent::Progress(ProgressPayload {
                position,
                duration,
                position_fraction: if duration > 0.0 {
                    (position / duration).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            }));

            // Stall detection: playing but the counter is not moving.
            if playing {
                if (position - last_position).abs() < f64::EPSILON {
                    stalled_for += TICK;
                    if stalled_for.as_secs_f64() >= STALL_TOAST_SECS && !stall_toasted {
                        stall_toasted = true;
                        self.emit(PlayerEvent::Toast {
                            message: "Playback is buffering longer than usual".to_string(),
                        });
                    }
                } else {
                    stalled_for = Duration::ZERO;
                    stall_toasted = false;
                }
            }
            last_position = position;

            // Kick off the next-track preload near the end.
            if playing
                && duration > 0.0
                && duration - position <= PRELOAD_WINDOW_SECS
                && !self.preload_triggered.swap(true, Ordering::SeqCst)
            {
                let next = self.queue.lock().await.peek_next();
                if let Some(next) = next {
                    let player = Arc::clone(&self);
                    tokio::spawn(async move {
                        player.preload_track(next).await;
                    });
                } else {
                    self.preload_triggered.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    async fn preload_track(self: Arc<Self>, track: Arc<Track>) {
        {
            let preloaded = self.preloaded.lock().await;
            if preloaded
                .as_ref()
                .map_or(false, |p| p.track_id == track.id)
            {
                return;
            }
        }

        log::debug!("preloading next track {}", track.id);
        match self.resolve_descriptor(&track.id).await {
            Ok((descriptor, replay_gain, codec_hint)) => {
                let preload = PreloadedTrack::new(
                    track.id.clone(),
                    codec_hint,
                    track.duration,
                    replay_gain,
                    descriptor,
                    self.client.http_client().clone(),
                );
                *self.preloaded.lock().await = Some(preload);
            }
            Err(e) => {
                log::warn!("preload of {} failed: {}", track.id, e);
                // Leave the flag set; playback start will resolve fresh.
            }
        }
    }

    async fn clear_preload(&self) {
        *self.preloaded.lock().await = None;
        self.preload_triggered.store(false, Ordering::SeqCst);
    }

    /// Resolve a track's manifest into (descriptor, replay gain, codec
    /// hint), retrying once on a transient failure.
    async fn resolve_descriptor(
        &self,
        track_id: &str,
    ) -> AppResult<(StreamDescriptor, f32, Option<String>)> {
        let manifest = match self.client.get_track_manifest(track_id).await {
            Ok(m) => m,
            Err(e) if e.is_transient() => {
                log::warn!("manifest fetch for {} failed ({}), retrying once", track_id, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.client.get_track_manifest(track_id).await?
            }
            Err(e) => return Err(e),
        };

        let descriptor = StreamDescriptor::new(
            manifest.uri.clone(),
            &manifest.codec,
            manifest.sample_rate,
            manifest.bit_depth,
            manifest.quality,
        );
        let codec_hint = Some(manifest.codec.to_lowercase());
        Ok((descriptor, manifest.replay_gain.unwrap_or(0.0), codec_hint))
    }

    /// Replace the play source and start at its first (or requested) track.
    pub async fn play_this(self: &Arc<Self>, target: PlayTarget) -> AppResult<()> {
        self.play_this_with_intent(target, true).await
    }

    /// As [`play_this`], but leaves the track loaded and paused when
    /// `play` is false. Startup restore uses this.
    pub async fn play_this_with_intent(
        self: &Arc<Self>,
        target: PlayTarget,
        play: bool,
    ) -> AppResult<()> {
        let (source, tracks, start_index) = self.normalize_target(target).await?;

        {
            let mut queue = self.queue.lock().await;
            queue.set_source(source, tracks, start_index);
        }
        self.clear_preload().await;
        self.emit_queue_changed().await;

        self.start_current(play).await;
        Ok(())
    }

    async fn normalize_target(
        &self,
        target: PlayTarget,
    ) -> AppResult<(Option<Entity>, Vec<Arc<Track>>, usize)> {
        match target {
            PlayTarget::Single(track) => Ok((None, vec![track], 0)),
            PlayTarget::List {
                tracks,
                start_index,
            } => Ok((None, tracks, start_index)),
            PlayTarget::Container {
                entity,
                start_index,
            } => {
                let raw = match &entity {
                    Entity::Album(album) => self.client.get_album_tracks(&album.id).await?,
                    Entity::Playlist(playlist) => {
                        self.client.get_playlist_tracks(&playlist.id).await?
                    }
                    Entity::Mix(mix) => self.client.get_mix_tracks(&mix.id).await?,
                    Entity::Artist(artist) => {
                        self.client.get_artist_top_tracks(&artist.id).await?
                    }
                    Entity::Track(track) => {
                        return Ok((None, vec![Arc::clone(track)], 0));
                    }
                };
                if raw.is_empty() {
                    return Err(AppError::NotFound(format!(
                        "{} {} has no playable tracks",
                        entity.kind().as_str(),
                        entity.id()
                    )));
                }
                let tracks = self.cache.prime_tracks(raw).await;
                Ok((Some(entity), tracks, start_index))
            }
        }
    }

    /// Record what is playing so the next launch can restore it. Runs on
    /// every track start, so the index tracks advances too.
    async fn persist_markers(&self, source: Option<&Entity>, index: usize) {
        let snapshot = {
            let mut settings = self.settings.write().await;
            settings.last_playing_thing_type =
                source.map(|entity| entity.kind().as_str().to_string());
            settings.last_playing_thing_id = source.map(|entity| entity.id().to_string());
            settings.last_playing_index = index;
            settings.clone()
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = snapshot.save() {
                log::warn!("failed to persist settings: {}", e);
            }
        });
    }

    /// Start (or restart) playback of the queue's current track.
    async fn start_current(self: &Arc<Self>, play: bool) {
        let snapshot = {
            let queue = self.queue.lock().await;
            queue
                .current()
                .map(|track| (track, queue.source().cloned(), queue.current_index()))
        };
        let (track, source, index) = match snapshot {
            Some(parts) => parts,
            None => {
                self.stop().await;
                return;
            }
        };

        self.persist_markers(source.as_ref(), index).await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.intent_playing.store(play, Ordering::SeqCst);
        *self.current_stream.write().await = None;

        // Let observers switch immediately; codec details follow once the
        // stream resolves.
        self.emit(PlayerEvent::SongChanged(TrackChangedPayload::new(
            &track, None,
        )));
        self.emit_state(PlaybackState::Buffering);

        let player = Arc::clone(self);
        tokio::spawn(async move {
            player.resolve_and_start(track, generation).await;
        });
    }

    async fn resolve_and_start(self: Arc<Self>, track: Arc<Track>, generation: u64) {
        // One pass over the remaining queue at most when tracks turn out
        // unavailable; beyond that give up instead of spinning.
        let mut skips_left = {
            let queue = self.queue.lock().await;
            queue.upcoming().len() + 1
        };
        let mut track = track;
        let mut generation = generation;

        loop {
            if !track.available {
                log::info!("track {} is not streamable, skipping", track.id);
                self.emit(PlayerEvent::Toast {
                    message: format!("{} is not available", track.title),
                });
            } else {
                match self.try_start_track(&track, generation).await {
                    Ok(()) => return,
                    Err(e) if e.is_unavailable() => {
                        log::warn!("track {} unavailable: {}", track.id, e);
                        self.emit(PlayerEvent::Toast {
                            message: format!("{} is not available", track.title),
                        });
                    }
                    Err(e) => {
                        log::error!("failed to start track {}: {}", track.id, e);
                        self.emit(PlayerEvent::Toast {
                            message: format!("Playback failed: {}", e),
                        });
                        self.emit_state(PlaybackState::Stopped);
                        return;
                    }
                }
            }

            // Skip forward, bounded.
            skips_left = skips_left.saturating_sub(1);
            if skips_left == 0 {
                self.emit_state(PlaybackState::Stopped);
                return;
            }
            let (next, source, index) = {
                let mut queue = self.queue.lock().await;
                // Skipping an unavailable track must not loop on itself.
                let next = if queue.repeat() == RepeatMode::Song {
                    queue.set_repeat(RepeatMode::None);
                    let next = queue.advance();
                    queue.set_repeat(RepeatMode::Song);
                    next
                } else {
                    queue.advance()
                };
                (next, queue.source().cloned(), queue.current_index())
            };
            match next {
                Some(next) => {
                    generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit(PlayerEvent::SongChanged(TrackChangedPayload::new(
                        &next, None,
                    )));
                    self.persist_markers(source.as_ref(), index).await;
                    track = next;
                }
                None => {
                    self.emit_state(PlaybackState::Stopped);
                    return;
                }
            }
        }
    }

    /// Resolve, download, and load one track into the pipeline. Applies
    /// the current playing intent on success.
    async fn try_start_track(&self, track: &Arc<Track>, generation: u64) -> AppResult<()> {
        // A preload for this exact track skips the resolution round trip.
        let preloaded = {
            let mut slot = self.preloaded.lock().await;
            if slot.as_ref().map_or(false, |p| p.track_id == track.id) {
                slot.take()
            } else {
                None
            }
        };

        let (source, codec_hint, replay_gain, descriptor) = match preloaded {
            Some(preload) => (
                preload.source,
                preload.codec_hint,
                preload.replay_gain,
                preload.descriptor,
            ),
            None => {
                let (descriptor, replay_gain, codec_hint) =
                    self.resolve_descriptor(&track.id).await?;
                if self.generation.load(Ordering::SeqCst) != generation {
                    return Ok(());
                }
                let (source, writer) = HttpStreamSource::new();
                let _download = Pipeline::start_download(
                    writer,
                    descriptor.url.clone(),
                    self.client.http_client().clone(),
                );
                (source, codec_hint, replay_gain, descriptor)
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(());
        }

        // Container probing blocks on the download; keep it off the
        // async workers.
        let pipeline = Arc::clone(&self.pipeline);
        let duration = track.duration;
        let hint = codec_hint.clone();
        tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline.lock().unwrap();
            pipeline.load(source, hint.as_deref(), duration, replay_gain)
        })
        .await
        .map_err(|e| AppError::Audio(format!("Pipeline load task failed: {}", e)))??;

        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(());
        }

        let playing = self.intent_playing.load(Ordering::SeqCst);
        {
            let pipeline = self.pipeline.lock().unwrap();
            if playing {
                pipeline.play();
            } else {
                pipeline.pause();
            }
        }

        *self.current_stream.write().await = Some(descriptor.clone());
        self.preload_triggered.store(false, Ordering::SeqCst);

        self.emit(PlayerEvent::SongChanged(TrackChangedPayload::new(
            track,
            Some(&descriptor),
        )));
        self.emit(PlayerEvent::DurationChanged { duration });
        self.emit(PlayerEvent::Progress(ProgressPayload {
            position: 0.0,
            duration,
            position_fraction: 0.0,
        }));
        self.emit_state(if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        });
        self.emit_queue_changed().await;

        Ok(())
    }

    async fn advance_internal(self: &Arc<Self>) {
        let next = self.queue.lock().await.advance();
        match next {
            Some(_) => {
                self.start_current(self.intent_playing.load(Ordering::SeqCst))
                    .await;
            }
            None => {
                // Terminal: the last track stays current, playback stops.
                self.intent_playing.store(false, Ordering::SeqCst);
                self.pipeline.lock().unwrap().pause();
                self.emit_state(PlaybackState::Stopped);
                self.emit_queue_changed().await;
            }
        }
    }

    pub async fn play_next(self: &Arc<Self>) {
        self.advance_internal().await;
    }

    /// Restart the current track when well into it; otherwise step back
    /// through history.
    pub async fn play_previous(self: &Arc<Self>) {
        let position = self.pipeline.lock().unwrap().position_seconds();
        if position > RESTART_THRESHOLD_SECS {
            self.pipeline.lock().unwrap().seek_seconds(0.0);
            return;
        }

        let (went_back, has_current) = {
            let mut queue = self.queue.lock().await;
            let can = queue.can_retreat();
            let current = queue.retreat();
            (can, current.is_some())
        };

        if went_back && has_current {
            self.start_current(self.intent_playing.load(Ordering::SeqCst))
                .await;
        } else if has_current {
            // Nothing to go back to; restart from the top.
            self.pipeline.lock().unwrap().seek_seconds(0.0);
        }
    }

    pub async fn play_pause(self: &Arc<Self>) {
        let loaded = self.pipeline.lock().unwrap().is_loaded();
        if !loaded {
            let has_current = self.queue.lock().await.current().is_some();
            if has_current {
                self.start_current(true).await;
            }
            return;
        }

        let playing = {
            let pipeline = self.pipeline.lock().unwrap();
            if pipeline.is_playing() {
                pipeline.pause();
                false
            } else {
                pipeline.play();
                true
            }
        };
        self.intent_playing.store(playing, Ordering::SeqCst);
        self.emit_state(if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        });
    }

    /// Ensure playback is rolling; a no-op when already playing.
    pub async fn play(self: &Arc<Self>) {
        if self.is_playing() {
            return;
        }
        self.play_pause().await;
    }

    /// Ensure playback is paused. Also clears the playing intent, so a
    /// pause issued while a track is still resolving leaves it loaded but
    /// silent.
    pub async fn pause(&self) {
        self.intent_playing.store(false, Ordering::SeqCst);
        let was_playing = {
            let pipeline = self.pipeline.lock().unwrap();
            let was = pipeline.is_playing();
            pipeline.pause();
            was
        };
        if was_playing {
            self.emit_state(PlaybackState::Paused);
        }
    }

    /// Announce a session change to observers.
    pub fn notify_auth(&self, authenticated: bool, user_id: Option<String>) {
        self.emit(PlayerEvent::AuthChanged(crate::events::AuthStatePayload {
            authenticated,
            user_id,
        }));
    }

    /// Forward a bring-to-front request from an external controller.
    pub fn request_raise(&self) {
        self.emit(PlayerEvent::RaiseRequested);
    }

    /// Forward a shutdown request from an external controller.
    pub fn request_quit(&self) {
        self.emit(PlayerEvent::QuitRequested);
    }

    pub async fn stop(&self) {
        self.intent_playing.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.current_stream.write().await = None;
        self.clear_preload().await;
        self.pipeline.lock().unwrap().stop();
        self.emit_state(PlaybackState::Stopped);
    }

    pub fn seek(&self, fraction: f64) -> AppResult<()> {
        let (position, duration) = {
            let pipeline = self.pipeline.lock().unwrap();
            pipeline.seek_fraction(fraction)?;
            (pipeline.position_seconds(), pipeline.duration_seconds())
        };
        self.emit(PlayerEvent::Progress(ProgressPayload {
            position,
            duration,
            position_fraction: fraction.clamp(0.0, 1.0),
        }));
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.pipeline.lock().unwrap().set_volume(volume);
        {
            let mut settings = self.settings.write().await;
            settings.set_volume_fraction(volume);
        }
        self.save_settings().await;
        self.emit(PlayerEvent::VolumeChanged { volume });
    }

    pub async fn set_shuffle(self: &Arc<Self>, shuffle: bool) {
        self.queue.lock().await.set_shuffle(shuffle);
        self.clear_preload().await;
        self.emit(PlayerEvent::ShuffleChanged { shuffle });
        self.emit_queue_changed().await;
    }

    pub async fn shuffle(&self) -> bool {
        self.queue.lock().await.shuffle()
    }

    pub async fn set_repeat(self: &Arc<Self>, repeat: RepeatMode) {
        self.queue.lock().await.set_repeat(repeat);
        self.clear_preload().await;
        {
            let mut settings = self.settings.write().await;
            settings.set_repeat_mode(repeat);
        }
        self.save_settings().await;
        self.emit(PlayerEvent::RepeatChanged { repeat });
        self.emit_queue_changed().await;
    }

    pub async fn repeat(&self) -> RepeatMode {
        self.queue.lock().await.repeat()
    }

    /// Put a track at the front of the manual lane.
    pub async fn add_next(self: &Arc<Self>, track: Arc<Track>) {
        self.queue.lock().await.enqueue_next(Arc::clone(&track));
        self.clear_preload().await;
        self.emit(PlayerEvent::SongAddedToQueue(track.as_ref().clone()));
        self.emit_queue_changed().await;
    }

    /// Append a track to the manual lane.
    pub async fn add_to_queue(self: &Arc<Self>, track: Arc<Track>) {
        self.queue.lock().await.enqueue_end(Arc::clone(&track));
        self.clear_preload().await;
        self.emit(PlayerEvent::SongAddedToQueue(track.as_ref().clone()));
        self.emit_queue_changed().await;
    }

    pub async fn set_normalization(&self, enabled: bool) {
        self.pipeline.lock().unwrap().set_normalization(enabled);
        {
            let mut settings = self.settings.write().await;
            settings.normalize = enabled;
        }
        self.save_settings().await;
    }

    pub async fn set_quadratic_volume(&self, enabled: bool) {
        self.pipeline.lock().unwrap().set_quadratic_taper(enabled);
        {
            let mut settings = self.settings.write().await;
            settings.quadratic_volume = enabled;
        }
        self.save_settings().await;
    }

    pub async fn set_sink(&self, index: i32) -> AppResult<()> {
        self.pipeline.lock().unwrap().set_sink(index)?;
        {
            let mut settings = self.settings.write().await;
            settings.preferred_sink = index;
        }
        self.save_settings().await;
        Ok(())
    }

    /// Takes effect on the next stream resolution; the current track keeps
    /// the quality it started with.
    pub async fn set_quality(&self, quality: AudioQuality) {
        {
            let mut settings = self.settings.write().await;
            settings.quality = quality.as_index();
        }
        self.save_settings().await;
        self.clear_preload().await;
    }

    async fn save_settings(&self) {
        let snapshot = self.settings.read().await.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = snapshot.save() {
                log::warn!("failed to persist settings: {}", e);
            }
        });
    }

    pub async fn current_track(&self) -> Option<Arc<Track>> {
        self.queue.lock().await.current()
    }

    pub async fn current_stream(&self) -> Option<StreamDescriptor> {
        self.current_stream.read().await.clone()
    }

    pub async fn upcoming(&self) -> Vec<Arc<Track>> {
        self.queue.lock().await.upcoming()
    }

    pub fn is_playing(&self) -> bool {
        self.pipeline.lock().unwrap().is_playing()
    }

    pub fn position_seconds(&self) -> f64 {
        self.pipeline.lock().unwrap().position_seconds()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.pipeline.lock().unwrap().duration_seconds()
    }

    pub fn volume(&self) -> f32 {
        self.pipeline.lock().unwrap().volume()
    }

    pub async fn can_go_next(&self) -> bool {
        self.queue.lock().await.can_advance()
    }

    pub async fn can_go_prev(&self) -> bool {
        let queue = self.queue.lock().await;
        queue.can_retreat() || queue.current().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::TokenStore;

    fn test_player() -> Arc<Player> {
        let settings = Settings::default();
        let shared = Arc::new(RwLock::new(settings.clone()));
        let store = Arc::new(TokenStore::default());
        let client = Arc::new(
            TidalClient::new(Arc::clone(&shared), store).expect("client should build offline"),
        );
        let cache = Arc::new(CatalogCache::new(Arc::clone(&client)));
        Player::new(client, cache, shared, &settings)
    }

    fn track(id: &str) -> Arc<Track> {
        Arc::new(Track {
            id: id.to_string(),
            title: format!("Track {}", id),
            duration: 180.0,
            track_number: None,
            volume_number: None,
            isrc: None,
            artist_name: "Artist".to_string(),
            artist_id: None,
            artists: vec!["Artist".to_string()],
            album_name: "Album".to_string(),
            album_id: Some("al".to_string()),
            artwork_url: None,
            explicit: false,
            available: true,
            media_tags: Vec::new(),
        })
    }

    #[tokio::test]
    async fn fresh_player_has_nothing_current() {
        let player = test_player();
        assert!(player.current_track().await.is_none());
        assert!(player.current_stream().await.is_none());
        assert!(!player.is_playing());
        assert!(!player.can_go_next().await);
        assert!(!player.can_go_prev().await);
    }

    #[tokio::test]
    async fn enqueue_emits_queue_events() {
        let player = test_player();
        let mut events = player.subscribe();

        player.add_to_queue(track("7")).await;

        let first = events.recv().await.unwrap();
        assert_eq!(first.name(), crate::events::PLAYBACK_QUEUE_ADDED);
        let second = events.recv().await.unwrap();
        assert_eq!(second.name(), crate::events::PLAYBACK_QUEUE_CHANGED);
        assert!(player.can_go_next().await);
    }

    #[tokio::test]
    async fn flat_list_target_normalizes_without_network() {
        let player = test_player();
        let (source, tracks, start) = player
            .normalize_target(PlayTarget::List {
                tracks: vec![track("1"), track("2")],
                start_index: 1,
            })
            .await
            .unwrap();
        assert!(source.is_none());
        assert_eq!(tracks.len(), 2);
        assert_eq!(start, 1);

        let (source, tracks, start) = player
            .normalize_target(PlayTarget::Single(track("9")))
            .await
            .unwrap();
        assert!(source.is_none());
        assert_eq!(tracks[0].id, "9");
        assert_eq!(start, 0);
    }

    #[tokio::test]
    async fn advancing_updates_the_persisted_index() {
        let player = test_player();
        player
            .play_this_with_intent(
                PlayTarget::List {
                    tracks: vec![track("1"), track("2"), track("3")],
                    start_index: 0,
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(player.settings.read().await.last_playing_index, 0);

        player.play_next().await;
        assert_eq!(player.settings.read().await.last_playing_index, 1);

        player.play_previous().await;
        assert_eq!(player.settings.read().await.last_playing_index, 0);
    }

    #[tokio::test]
    async fn seek_without_a_track_is_rejected() {
        let player = test_player();
        assert!(player.seek(0.5).is_err());
    }
}
