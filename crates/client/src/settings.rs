//! Client settings.
//!
//! Layered lowest to highest: built-in defaults, the settings file in the data
//! directory, `DEPOVIEW_*` environment variables, then command-line flags
//! (applied by the caller).

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use depoview::session::FlowTiming;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::ClientError;

pub const ENV_SERVER: &str = "DEPOVIEW_SERVER";
pub const ENV_TOKEN: &str = "DEPOVIEW_TOKEN";
pub const ENV_BINS: &str = "DEPOVIEW_BINS";
pub const ENV_RETRY_MS: &str = "DEPOVIEW_RETRY_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Page URL of the server; the socket and HTTP endpoints are derived from it.
    pub server: String,
    /// Credential sent as the `id` cookie.
    pub token: Option<String>,
    pub reconnect_interval_ms: u64,
    pub debounce_ms: u64,
    pub retry_interval_ms: u64,
    /// Height-map resolution per axis.
    pub bins: usize,
    pub save_archive: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8080/".to_string(),
            token: None,
            reconnect_interval_ms: 5_000,
            debounce_ms: 250,
            retry_interval_ms: 10_000,
            bins: 10,
            save_archive: true,
        }
    }
}

impl ClientSettings {
    /// Defaults, then `path` if it exists, then the environment.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let mut settings = match fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading settings");
                serde_json::from_str(&text).map_err(|source| ClientError::Settings {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply `DEPOVIEW_*` overrides read through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SERVER) {
            let v = v.trim();
            if !v.is_empty() {
                self.server = v.to_string();
            }
        }
        if let Some(v) = lookup(ENV_TOKEN) {
            let v = v.trim();
            self.token = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = lookup(ENV_BINS) {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.bins = n,
                _ => warn!("Ignoring invalid {}: {}", ENV_BINS, v),
            }
        }
        if let Some(v) = lookup(ENV_RETRY_MS) {
            match v.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.retry_interval_ms = ms,
                _ => warn!("Ignoring invalid {}: {}", ENV_RETRY_MS, v),
            }
        }
    }

    pub fn server_url(&self) -> Result<Url, ClientError> {
        let url = Url::parse(&self.server)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ClientError::Scheme(other.to_string())),
        }
    }

    pub fn flow_timing(&self) -> FlowTiming {
        FlowTiming {
            debounce: Duration::from_millis(self.debounce_ms),
            retry: Duration::from_millis(self.retry_interval_ms.max(1)),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut s: ClientSettings =
            serde_json::from_str(r#"{"server":"http://sim.example:9000/","bins":4}"#).unwrap();
        assert_eq!(s.retry_interval_ms, 10_000);
        s.apply_overrides(env(&[
            (ENV_BINS, "25"),
            (ENV_TOKEN, "abc"),
            (ENV_RETRY_MS, "2000"),
        ]));
        assert_eq!(s.server, "http://sim.example:9000/");
        assert_eq!(s.bins, 25);
        assert_eq!(s.token.as_deref(), Some("abc"));
        assert_eq!(s.flow_timing().retry, Duration::from_secs(2));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = ClientSettings::default();
        s.apply_overrides(env(&[(ENV_BINS, "zero"), (ENV_RETRY_MS, "0"), (ENV_SERVER, " ")]));
        assert_eq!(s, ClientSettings::default());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let s = ClientSettings::load(Path::new("/nonexistent/depoview/settings.json")).unwrap();
        assert_eq!(s.debounce_ms, 250);
        assert_eq!(s.reconnect_interval(), Duration::from_secs(5));
    }

    #[test]
    fn bad_settings_file_names_the_file() {
        let path =
            std::env::temp_dir().join(format!("depoview-settings-{}.json", std::process::id()));
        fs::write(&path, "{not json").unwrap();
        let err = ClientSettings::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        match err {
            ClientError::Settings { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn server_must_be_http() {
        let mut s = ClientSettings::default();
        assert!(s.server_url().is_ok());
        s.server = "ftp://host/".into();
        assert!(matches!(s.server_url(), Err(ClientError::Scheme(_))));
    }
}
