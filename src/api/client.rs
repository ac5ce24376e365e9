use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::token_store::{TokenRecord, TokenStore};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use tokio::sync::RwLock;

const BASE_URL: &str = "https://openapi.tidal.com/v2";
const JSONAPI_CONTENT_TYPE: &str = "application/vnd.api+json";

pub struct TidalClient {
    http: reqwest::Client,
    settings: Arc<RwLock<Settings>>,
    session: RwLock<Option<TokenRecord>>,
    store: Arc<TokenStore>,
}

impl TidalClient {
    pub fn new(settings: Arc<RwLock<Settings>>, store: Arc<TokenStore>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tidalcore/0.1.0")
            .build()?;

        Ok(Self {
            http,
            settings,
            session: RwLock::new(None),
            store,
        })
    }

    pub fn settings(&self) -> &Arc<RwLock<Settings>> {
        &self.settings
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Install a token record for this session (startup load, fresh login).
    pub async fn set_session(&self, record: Option<TokenRecord>) {
        *self.session.write().await = record;
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Current bearer token for v1 calls that build their own requests.
    pub async fn access_token(&self) -> AppResult<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|record| record.access_token.clone())
            .ok_or(AppError::AuthRequired)
    }

    pub async fn country_code(&self) -> String {
        self.settings.read().await.country_code.clone()
    }

    async fn auth_headers(&self) -> AppResult<HeaderMap> {
        let session = self.session.read().await;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSONAPI_CONTENT_TYPE));

        if let Some(record) = session.as_ref() {
            let auth_value = format!("Bearer {}", record.access_token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).map_err(|e| AppError::Config(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn get(&self, path: &str) -> AppResult<reqwest::Response> {
        let url = format!("{}{}", BASE_URL, path);
        let headers = self.auth_headers().await?;

        let response = self.http.get(&url).headers(headers).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Refresh once, then retry the call once.
            self.refresh_token().await?;
            let headers = self.auth_headers().await?;
            let response = self.http.get(&url).headers(headers).send().await?;
            self.check_response(response).await
        } else {
            self.check_response(response).await
        }
    }

    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<reqwest::Response> {
        let url = format!("{}{}", BASE_URL, path);
        let headers = self.auth_headers().await?;

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(query)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.refresh_token().await?;
            let headers = self.auth_headers().await?;
            let response = self
                .http
                .get(&url)
                .headers(headers)
                .query(query)
                .send()
                .await?;
            self.check_response(response).await
        } else {
            self.check_response(response).await
        }
    }

    pub async fn post_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> AppResult<reqwest::Response> {
        let url = format!("{}{}", BASE_URL, path);
        let mut headers = self.auth_headers().await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSONAPI_CONTENT_TYPE));

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .query(query)
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.refresh_token().await?;
            let mut headers = self.auth_headers().await?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSONAPI_CONTENT_TYPE));
            let response = self
                .http
                .post(&url)
                .headers(headers)
                .query(query)
                .json(body)
                .send()
                .await?;
            self.check_response(response).await
        } else {
            self.check_response(response).await
        }
    }

    pub async fn delete_with_body(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> AppResult<reqwest::Response> {
        let url = format!("{}{}", BASE_URL, path);
        let mut headers = self.auth_headers().await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSONAPI_CONTENT_TYPE));

        let response = self
            .http
            .delete(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.refresh_token().await?;
            let mut headers = self.auth_headers().await?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSONAPI_CONTENT_TYPE));
            let response = self
                .http
                .delete(&url)
                .headers(headers)
                .json(body)
                .send()
                .await?;
            self.check_response(response).await
        } else {
            self.check_response(response).await
        }
    }

    async fn check_response(&self, response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(AppError::AuthRequired)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(AppError::NotFound("Resource not found".into()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(AppError::TidalApi {
                status: status.as_u16(),
                message,
            })
        }
    }

    pub async fn refresh_token(&self) -> AppResult<()> {
        let mut session = self.session.write().await;

        let refresh_token = session
            .as_ref()
            .and_then(|record| record.refresh_token.clone())
            .ok_or(AppError::AuthRequired)?;
        let client_id = self.settings.read().await.client_id.clone();

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", &client_id),
        ];

        let response = self
            .http
            .post("https://auth.tidal.com/v1/oauth2/token")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            // The refresh token itself is dead. Treat the session as gone
            // and wipe the stored record so the next start asks for login.
            log::warn!("Token refresh rejected: {}", response.status());
            *session = None;
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = store.clear() {
                    log::warn!("Failed to clear stored token: {}", e);
                }
            });
            return Err(AppError::TokenExpired);
        }

        let token_response: crate::api::models::TokenResponse = response.json().await?;
        let expires_at =
            chrono::Utc::now() + chrono::Duration::seconds(token_response.expires_in as i64);
        let record = TokenRecord::new(
            token_response.token_type,
            token_response.access_token,
            token_response.refresh_token.or(Some(refresh_token)),
            expires_at,
        );

        *session = Some(record.clone());
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&record) {
                log::warn!("Failed to persist refreshed token: {}", e);
            }
        });

        Ok(())
    }
}
