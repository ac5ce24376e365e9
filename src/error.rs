use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Tidal API error: {status} - {message}")]
    TidalApi { status: u16, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Secret storage error: {0}")]
    Storage(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AppError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl AppError {
    pub fn kind(&self) -> &str {
        match self {
            AppError::Http(_) => "http",
            AppError::Json(_) => "json",
            AppError::Audio(_) => "audio",
            AppError::Decode(_) => "decode",
            AppError::AuthRequired => "auth_required",
            AppError::TokenExpired => "token_expired",
            AppError::TidalApi { .. } => "tidal_api",
            AppError::Config(_) => "config",
            AppError::NotFound(_) => "not_found",
            AppError::Storage(_) => "storage",
            AppError::Ipc(_) => "ipc",
            AppError::Io(_) => "io",
        }
    }

    /// Worth a single retry: timeouts, connection failures, 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            AppError::TidalApi { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The track cannot be played with the current entitlements or
    /// manifest; skip it rather than retry.
    pub fn is_unavailable(&self) -> bool {
        match self {
            AppError::NotFound(_) | AppError::Decode(_) => true,
            AppError::TidalApi { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = AppError::TidalApi {
            status: 503,
            message: "unavailable".to_string(),
        };
        let client = AppError::TidalApi {
            status: 404,
            message: "gone".to_string(),
        };
        assert!(server.is_transient());
        assert!(!server.is_unavailable());
        assert!(!client.is_transient());
        assert!(client.is_unavailable());
    }

    #[test]
    fn serializes_as_kind_and_message() {
        let err = AppError::NotFound("track 1".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["message"], "Not found: track 1");
    }
}
