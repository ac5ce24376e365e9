use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

const SERVICE_NAME: &str = "tidalcore";
const RECORD_KEY: &str = "oauth-token-v1";

/// The OAuth session as one JSON payload in the OS secret service. Lookup
/// is by the fixed service/key pair only; everything else lives in the
/// payload so the schema can grow without touching stored attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenRecord {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// RFC 3339, kept as a string in the payload.
    pub expiry_time: String,
}

impl TokenRecord {
    pub fn new(
        token_type: String,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_type,
            access_token,
            refresh_token,
            expiry_time: expires_at.to_rfc3339(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expiry_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// An unparseable expiry counts as expired; the refresh path sorts it
    /// out or asks for a fresh login.
    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(expires) => Utc::now() >= expires,
            None => true,
        }
    }
}

/// Blocking access to the secret service. Async callers go through
/// `tokio::task::spawn_blocking`.
pub struct TokenStore;

impl TokenStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(&self) -> AppResult<Entry> {
        Entry::new(SERVICE_NAME, RECORD_KEY)
            .map_err(|e| AppError::Storage(format!("failed to create keyring entry: {}", e)))
    }

    /// Read the stored record. A present entry whose payload does not
    /// parse is reported as absent; the secret is left in place so a
    /// newer client version can still read it.
    pub fn load(&self) -> AppResult<Option<TokenRecord>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(payload) => match serde_json::from_str::<TokenRecord>(&payload) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    log::warn!("Stored token payload is unreadable, ignoring it: {}", e);
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::Storage(format!(
                "failed to read token record: {}",
                e
            ))),
        }
    }

    pub fn save(&self, record: &TokenRecord) -> AppResult<()> {
        let entry = self.entry()?;
        let payload = serde_json::to_string(record)?;
        entry
            .set_password(&payload)
            .map_err(|e| AppError::Storage(format!("failed to write token record: {}", e)))
    }

    pub fn clear(&self) -> AppResult<()> {
        let entry = self.entry()?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "failed to delete token record: {}",
                e
            ))),
        }
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_record(expires_at: DateTime<Utc>) -> TokenRecord {
        TokenRecord::new(
            "Bearer".to_string(),
            "access-abc".to_string(),
            Some("refresh-xyz".to_string()),
            expires_at,
        )
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = sample_record(Utc::now() + Duration::hours(1));
        let payload = serde_json::to_string(&record).unwrap();
        let loaded: TokenRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(record, loaded);
    }

    #[test]
    fn payload_uses_kebab_case_keys_and_string_expiry() {
        let record = sample_record(Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("access-token").is_some());
        assert!(json.get("refresh-token").is_some());
        assert!(json.get("token-type").is_some());
        assert!(json["expiry-time"].is_string());
    }

    #[test]
    fn expiry_parses_back_and_drives_is_expired() {
        let future = sample_record(Utc::now() + Duration::hours(2));
        assert!(!future.is_expired());
        assert!(future.expires_at().is_some());

        let past = sample_record(Utc::now() - Duration::minutes(1));
        assert!(past.is_expired());
    }

    #[test]
    fn garbage_expiry_counts_as_expired() {
        let mut record = sample_record(Utc::now() + Duration::hours(1));
        record.expiry_time = "not-a-timestamp".to_string();
        assert!(record.expires_at().is_none());
        assert!(record.is_expired());
    }
}
