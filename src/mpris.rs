//! org.mpris.MediaPlayer2 bridge for desktop media controls.
//!
//! The server object from `mpris_server` is not `Send`, so the bridge
//! runs on its own thread with a current-thread runtime and a `LocalSet`.
//! Inbound D-Bus calls are turned into [`MprisCommand`]s and shipped back
//! to the main runtime; outbound property updates are driven by the
//! player's event broadcast.

use std::rc::Rc;
use std::sync::Arc;

use mpris_server::{LoopStatus, Metadata, PlaybackStatus, Time, TrackId};
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::queue::RepeatMode;
use crate::config::Settings;
use crate::events::{PlaybackState, PlayerEvent, TrackChangedPayload};
use crate::player::Player;

const BUS_NAME: &str = "tidalcore";

/// Inbound control requests, applied to the player on the main runtime.
#[derive(Debug, Clone, PartialEq)]
enum MprisCommand {
    PlayPause,
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    SetVolume(f64),
    SetShuffle(bool),
    SetRepeat(RepeatMode),
    Raise,
    Quit,
}

/// Starts the bridge. Registration failure is logged and playback simply
/// continues without media controls.
pub fn spawn(player: Arc<Player>) {
    let events = player.subscribe();
    let (commands, mut command_rx) = tokio::sync::mpsc::unbounded_channel::<MprisCommand>();

    let target = Arc::clone(&player);
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            apply_command(&target, command).await;
        }
    });

    let spawned = std::thread::Builder::new()
        .name("mpris".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::warn!("failed to build MPRIS runtime: {}", e);
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, serve(player, commands, events));
        });

    if let Err(e) = spawned {
        log::warn!("failed to spawn MPRIS thread: {}", e);
    }
}

async fn apply_command(player: &Arc<Player>, command: MprisCommand) {
    match command {
        MprisCommand::PlayPause => player.play_pause().await,
        MprisCommand::Play => player.play().await,
        // Stop has no queue-clearing meaning here; treat it as pause.
        MprisCommand::Pause | MprisCommand::Stop => player.pause().await,
        MprisCommand::Next => player.play_next().await,
        MprisCommand::Previous => player.play_previous().await,
        MprisCommand::SetVolume(volume) => player.set_volume(volume as f32).await,
        MprisCommand::SetShuffle(shuffle) => player.set_shuffle(shuffle).await,
        MprisCommand::SetRepeat(mode) => player.set_repeat(mode).await,
        MprisCommand::Raise => player.request_raise(),
        MprisCommand::Quit => player.request_quit(),
    }
}

async fn serve(
    player: Arc<Player>,
    commands: UnboundedSender<MprisCommand>,
    mut events: broadcast::Receiver<PlayerEvent>,
) {
    let server = match mpris_server::Player::builder(BUS_NAME)
        .identity("TIDAL Core")
        .can_play(true)
        .can_pause(true)
        .can_go_next(true)
        .can_go_previous(true)
        .can_seek(false)
        .can_raise(true)
        .can_quit(true)
        .can_control(true)
        .build()
        .await
    {
        Ok(server) => server,
        Err(e) => {
            log::warn!("MPRIS registration failed, continuing without it: {}", e);
            return;
        }
    };
    log::info!("MPRIS server registered as org.mpris.MediaPlayer2.{}", BUS_NAME);

    // Clients read properties before our first change event lands; seed
    // them with the live values.
    let seeded = async {
        server.set_volume(f64::from(player.volume())).await?;
        server.set_shuffle(player.shuffle().await).await?;
        server
            .set_loop_status(loop_status_from_repeat(player.repeat().await))
            .await
    }
    .await;
    if let Err(e) = seeded {
        log::warn!("seeding MPRIS properties failed: {}", e);
    }

    let send = |command: MprisCommand| {
        let tx = commands.clone();
        move |_: &mpris_server::Player| {
            let _ = tx.send(command.clone());
        }
    };
    server.connect_play_pause(send(MprisCommand::PlayPause));
    server.connect_play(send(MprisCommand::Play));
    server.connect_pause(send(MprisCommand::Pause));
    server.connect_stop(send(MprisCommand::Stop));
    server.connect_next(send(MprisCommand::Next));
    server.connect_previous(send(MprisCommand::Previous));
    server.connect_raise(send(MprisCommand::Raise));
    server.connect_quit(send(MprisCommand::Quit));

    let tx = commands.clone();
    server.connect_set_volume(move |_, volume| {
        let _ = tx.send(MprisCommand::SetVolume(volume));
    });
    let tx = commands.clone();
    server.connect_set_shuffle(move |_, shuffle| {
        let _ = tx.send(MprisCommand::SetShuffle(shuffle));
    });
    let tx = commands.clone();
    server.connect_set_loop_status(move |_, status| {
        let _ = tx.send(MprisCommand::SetRepeat(repeat_from_loop_status(status)));
    });

    let server = Rc::new(server);
    let runner = Rc::clone(&server);
    tokio::task::spawn_local(async move {
        runner.run().await;
    });

    loop {
        match events.recv().await {
            Ok(event) => forward_event(&server, event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("MPRIS bridge lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_event(server: &mpris_server::Player, event: PlayerEvent) {
    let result = match event {
        PlayerEvent::Progress(payload) => {
            // Position is polled, not signalled; the tick cadence is fine.
            server.set_position(position_time(payload.position));
            Ok(())
        }
        PlayerEvent::SongChanged(payload) => server.set_metadata(build_metadata(&payload)).await,
        PlayerEvent::StateChanged(payload) => {
            server
                .set_playback_status(playback_status(payload.state))
                .await
        }
        PlayerEvent::VolumeChanged { volume } => server.set_volume(f64::from(volume)).await,
        PlayerEvent::ShuffleChanged { shuffle } => server.set_shuffle(shuffle).await,
        PlayerEvent::RepeatChanged { repeat } => {
            server.set_loop_status(loop_status_from_repeat(repeat)).await
        }
        PlayerEvent::QueueChanged(payload) => {
            let next = server.set_can_go_next(payload.can_go_next).await;
            if next.is_err() {
                next
            } else {
                server.set_can_go_previous(payload.can_go_prev).await
            }
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        log::warn!("MPRIS property update failed: {}", e);
    }
}

fn position_time(position_seconds: f64) -> Time {
    Time::from_micros((position_seconds * 1_000_000.0) as i64)
}

fn build_metadata(payload: &TrackChangedPayload) -> Metadata {
    let mut builder = Metadata::builder()
        .title(payload.title.clone())
        .album(payload.album.clone())
        .artist([payload.artist.clone()])
        .length(position_time(payload.duration));

    match TrackId::try_from(track_object_path(&payload.track_id).as_str()) {
        Ok(track_id) => builder = builder.trackid(track_id),
        Err(e) => log::debug!("unusable track object path: {}", e),
    }

    if let Some(url) = art_url(payload.album_id.as_deref()) {
        builder = builder.art_url(url);
    }

    builder.build()
}

/// D-Bus object paths only allow `[A-Za-z0-9_]` segments; TIDAL ids are
/// numeric but the payload type does not guarantee it.
fn track_object_path(track_id: &str) -> String {
    let safe: String = track_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("/Track/{}", safe)
}

/// Cover path the frontend fills in; the bridge only constructs it.
fn art_url(album_id: Option<&str>) -> Option<String> {
    let album_id = album_id?;
    let dir = Settings::images_dir().ok()?;
    Some(format!("file://{}/{}_320.jpg", dir.display(), album_id))
}

fn playback_status(state: PlaybackState) -> PlaybackStatus {
    match state {
        // Buffering only happens with the playing intent set.
        PlaybackState::Playing | PlaybackState::Buffering => PlaybackStatus::Playing,
        PlaybackState::Paused => PlaybackStatus::Paused,
        PlaybackState::Stopped => PlaybackStatus::Stopped,
    }
}

fn loop_status_from_repeat(repeat: RepeatMode) -> LoopStatus {
    match repeat {
        RepeatMode::None => LoopStatus::None,
        RepeatMode::Song => LoopStatus::Track,
        RepeatMode::List => LoopStatus::Playlist,
    }
}

fn repeat_from_loop_status(status: LoopStatus) -> RepeatMode {
    match status {
        LoopStatus::None => RepeatMode::None,
        LoopStatus::Track => RepeatMode::Song,
        LoopStatus::Playlist => RepeatMode::List,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_status_round_trips() {
        for mode in [RepeatMode::None, RepeatMode::List, RepeatMode::Song] {
            assert_eq!(repeat_from_loop_status(loop_status_from_repeat(mode)), mode);
        }
    }

    #[test]
    fn playback_states_map_to_dbus_statuses() {
        assert_eq!(playback_status(PlaybackState::Playing), PlaybackStatus::Playing);
        assert_eq!(
            playback_status(PlaybackState::Buffering),
            PlaybackStatus::Playing
        );
        assert_eq!(playback_status(PlaybackState::Paused), PlaybackStatus::Paused);
        assert_eq!(
            playback_status(PlaybackState::Stopped),
            PlaybackStatus::Stopped
        );
    }

    #[test]
    fn positions_are_reported_in_microseconds() {
        assert_eq!(position_time(2.5).as_micros(), 2_500_000);
        assert_eq!(position_time(0.0).as_micros(), 0);
    }

    #[test]
    fn track_object_paths_are_dbus_safe() {
        assert_eq!(track_object_path("251380837"), "/Track/251380837");
        assert_eq!(track_object_path("ab-12.x"), "/Track/ab_12_x");
    }

    #[test]
    fn art_url_points_into_the_images_dir() {
        assert!(art_url(None).is_none());
        let url = art_url(Some("77640617")).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/77640617_320.jpg"));
    }
}
