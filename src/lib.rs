//! Playback core for a TIDAL desktop client.
//!
//! [`AppContext`] wires the pieces together: the authenticated API client,
//! the catalog cache, the favorites index, the playback orchestrator and
//! the MPRIS bridge. Frontends construct one context, call
//! [`AppContext::startup`] inside their runtime, and observe playback
//! through [`player::Player::subscribe`].

pub mod api;
pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod favorites;
pub mod mpris;
pub mod player;
pub mod token_store;

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use api::auth;
use api::client::TidalClient;
use api::models::{AuthStatus, DeviceAuthResponse, EntityKind, TokenResponse};
use cache::CatalogCache;
use config::Settings;
use error::{AppError, AppResult};
use favorites::FavoritesIndex;
use player::{PlayTarget, Player};
use token_store::TokenStore;

pub fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("tidalcore=info"),
    )
    .init();
}

/// Install a panic hook that appends the panic message and backtrace to
/// the crash log. Appending keeps the FIRST panic when a cascade follows.
pub fn install_crash_log_hook() {
    std::panic::set_hook(Box::new(|info| {
        use std::io::Write;
        let message = format!(
            "PANIC at {}: {}\nBacktrace:\n{}\n---\n",
            info.location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown".into()),
            info.payload()
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| info.payload().downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("(no message)"),
            std::backtrace::Backtrace::force_capture(),
        );
        if let Ok(path) = Settings::crash_log_path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                let _ = file.write_all(message.as_bytes());
            }
        }
        eprintln!("{}", message);
    }));
}

/// Everything a frontend needs, constructed once per process.
pub struct AppContext {
    pub settings: Arc<RwLock<Settings>>,
    pub token_store: Arc<TokenStore>,
    pub client: Arc<TidalClient>,
    pub cache: Arc<CatalogCache>,
    pub favorites: Arc<FavoritesIndex>,
    pub player: Arc<Player>,
    /// Verifier for the in-flight PKCE login, if any.
    pkce_verifier: Mutex<Option<String>>,
}

impl AppContext {
    pub fn new() -> AppResult<Arc<Self>> {
        let settings = Settings::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            let defaults = Settings::default();
            // Save so the file exists for the next launch.
            if let Err(save_err) = defaults.save() {
                log::error!("Failed to save default config: {}", save_err);
            }
            defaults
        });

        let shared = Arc::new(RwLock::new(settings.clone()));
        let token_store = Arc::new(TokenStore::new());
        let client = Arc::new(TidalClient::new(
            Arc::clone(&shared),
            Arc::clone(&token_store),
        )?);
        let cache = Arc::new(CatalogCache::new(Arc::clone(&client)));
        let favorites = Arc::new(FavoritesIndex::new(Arc::clone(&client)));
        let player = Player::new(
            Arc::clone(&client),
            Arc::clone(&cache),
            Arc::clone(&shared),
            &settings,
        );

        Ok(Arc::new(Self {
            settings: shared,
            token_store,
            client,
            cache,
            favorites,
            player,
            pkce_verifier: Mutex::new(None),
        }))
    }

    /// Starts the background machinery and restores the previous session.
    /// Call once from inside the runtime.
    pub async fn startup(self: &Arc<Self>) {
        self.player.run();
        mpris::spawn(Arc::clone(&self.player));
        self.restore_session().await;
        self.restore_last_played().await;
    }

    /// Load the stored token, refresh it when stale, or fall back to a
    /// client-credentials token for catalog-only browsing.
    async fn restore_session(&self) {
        let store = Arc::clone(&self.token_store);
        let record = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                log::warn!("Secret service unavailable, running unauthenticated: {}", e);
                None
            }
            Err(e) => {
                log::warn!("Token load task failed: {}", e);
                None
            }
        };

        match record {
            Some(record) => {
                let expired = record.is_expired();
                self.client.set_session(Some(record)).await;
                if expired {
                    if let Err(e) = self.client.refresh_token().await {
                        log::warn!("Stored session could not be refreshed: {}", e);
                        self.client.set_session(None).await;
                    }
                }
            }
            None => {
                let (client_id, client_secret) = {
                    let settings = self.settings.read().await;
                    (settings.client_id.clone(), settings.client_secret.clone())
                };
                if !client_id.is_empty() && !client_secret.is_empty() {
                    log::info!("No stored session, acquiring catalog-only access");
                    match auth::client_credentials_token(
                        self.client.http_client(),
                        &client_id,
                        &client_secret,
                    )
                    .await
                    {
                        // Short-lived and catalog-only; kept in memory, never stored.
                        Ok(token) => {
                            self.client.set_session(Some(auth::into_record(token))).await;
                        }
                        Err(e) => log::warn!("Client credentials auth failed: {}", e),
                    }
                }
            }
        }

        let status = self.auth_status().await;
        self.player
            .notify_auth(status.authenticated, status.user_id);
    }

    pub async fn auth_status(&self) -> AuthStatus {
        let settings = self.settings.read().await;
        let has_session = self.client.has_session().await;
        AuthStatus {
            authenticated: has_session && settings.user_id.is_some(),
            user_id: settings.user_id.clone(),
            display_name: settings.display_name.clone(),
            country_code: settings.country_code.clone(),
        }
    }

    /// Begin a PKCE login: returns the authorization URL for the frontend
    /// to open and keeps the verifier for [`complete_login`].
    ///
    /// [`complete_login`]: AppContext::complete_login
    pub async fn begin_login(&self) -> String {
        let pkce = auth::PkceChallenge::generate();
        let client_id = self.settings.read().await.client_id.clone();
        let url = auth::build_auth_url(&client_id, &pkce.challenge);
        *self.pkce_verifier.lock().await = Some(pkce.verifier);
        url
    }

    /// Finish a PKCE login with the code from the redirect callback.
    pub async fn complete_login(&self, code: &str) -> AppResult<()> {
        let verifier = self
            .pkce_verifier
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Config("No login in progress".into()))?;
        let client_id = self.settings.read().await.client_id.clone();
        let token =
            auth::exchange_code(self.client.http_client(), &client_id, code, &verifier).await?;
        self.install_token(token).await
    }

    /// Begin a device-code login for frontends without a redirect handler.
    pub async fn begin_device_login(&self) -> AppResult<DeviceAuthResponse> {
        let client_id = self.settings.read().await.client_id.clone();
        auth::request_device_code(self.client.http_client(), &client_id).await
    }

    /// Poll the pending device-code login. Returns true once the user has
    /// approved; call again after the advertised interval otherwise.
    pub async fn poll_device_login(&self, device_code: &str) -> AppResult<bool> {
        let client_id = self.settings.read().await.client_id.clone();
        match auth::poll_device_token(self.client.http_client(), &client_id, device_code).await? {
            Some(token) => {
                self.install_token(token).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn install_token(&self, token: TokenResponse) -> AppResult<()> {
        let user_id = auth::user_id_string(&token);
        let record = auth::into_record(token);
        self.client.set_session(Some(record.clone())).await;

        let store = Arc::clone(&self.token_store);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&record) {
                log::warn!("Failed to persist token: {}", e);
            }
        });

        {
            let mut settings = self.settings.write().await;
            if user_id.is_some() {
                settings.user_id = user_id.clone();
            }
        }

        match self.client.get_user_profile().await {
            Ok((username, first_name, _)) => {
                let mut settings = self.settings.write().await;
                settings.display_name = first_name.or(username);
            }
            Err(e) => log::debug!("profile fetch after login failed: {}", e),
        }

        let snapshot = self.settings.read().await.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = snapshot.save() {
                log::warn!("Failed to persist settings: {}", e);
            }
        });

        self.player.notify_auth(true, user_id);
        Ok(())
    }

    pub async fn logout(&self) {
        self.client.set_session(None).await;

        let store = Arc::clone(&self.token_store);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.clear() {
                log::warn!("Failed to clear stored token: {}", e);
            }
        });

        {
            let mut settings = self.settings.write().await;
            settings.user_id = None;
            settings.display_name = None;
        }
        let snapshot = self.settings.read().await.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = snapshot.save() {
                log::warn!("Failed to persist settings: {}", e);
            }
        });

        self.player.notify_auth(false, None);
    }

    /// Reload whatever was playing when the process last exited, loaded
    /// but paused.
    async fn restore_last_played(self: &Arc<Self>) {
        let (kind, id, index) = {
            let settings = self.settings.read().await;
            (
                settings.last_playing_thing_type.clone(),
                settings.last_playing_thing_id.clone(),
                settings.last_playing_index,
            )
        };
        let (Some(kind), Some(id)) = (kind, id) else {
            return;
        };
        let Some(kind) = EntityKind::from_str(&kind) else {
            log::warn!("unknown last-playing kind: {}", kind);
            return;
        };

        let entity = match self.cache.entity(kind, &id).await {
            Ok(entity) => entity,
            Err(e) => {
                log::warn!("could not restore last played {} {}: {}", kind.as_str(), id, e);
                return;
            }
        };

        if let Err(e) = self
            .player
            .play_this_with_intent(
                PlayTarget::Container {
                    entity,
                    start_index: index,
                },
                false,
            )
            .await
        {
            log::warn!("restore of last played failed: {}", e);
        }
    }
}
