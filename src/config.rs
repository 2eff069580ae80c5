use std::env;

use log::{info, warn};

use crate::constants::{DEFAULT_DATETIME_FORMAT, LASTFM_API_ROOT};

/// Process configuration, read once from the environment at startup.
///
/// `LASTFM_PASSWORD` is consumed immediately: only its MD5 digest is kept,
/// which is what the Last.fm mobile-session handshake needs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub lastfm_api_url: String,
    pub lastfm_api_key: String,
    pub lastfm_api_secret: String,
    pub lastfm_username: String,
    pub lastfm_password_hash: String,
    pub spotify: Option<SpotifySettings>,
    pub app_token: String,
    pub web_app_url: Option<String>,
    pub database_url: String,
    pub datetime_format: String,
    pub api_host: String,
    pub api_port: u16,
}

/// Spotify credentials; the refresh token is the pre-existing credential
/// handle obtained out of band. All four must be present for the Spotify
/// source to be available.
#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub refresh_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load settings from the environment. A `.env` file in the working
    /// directory is merged in first, losing to real environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded environment overrides from .env");
        }

        let spotify = match (
            optional("SPOTIFY_CLIENT_ID"),
            optional("SPOTIFY_CLIENT_SECRET"),
            optional("SPOTIFY_REDIRECT_URI"),
            optional("SPOTIFY_REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri), Some(refresh_token)) => {
                Some(SpotifySettings {
                    client_id,
                    client_secret,
                    redirect_uri,
                    refresh_token,
                })
            }
            (None, None, None, None) => None,
            _ => {
                warn!("Incomplete Spotify credentials in environment; Spotify source disabled");
                None
            }
        };

        let api_port = match optional("API_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("API_PORT", raw))?,
            None => 8000,
        };

        let password = required("LASTFM_PASSWORD")?;
        let lastfm_password_hash = format!("{:x}", md5::compute(password.as_bytes()));

        Ok(Settings {
            lastfm_api_url: optional("LASTFM_API_URL")
                .unwrap_or_else(|| LASTFM_API_ROOT.to_string()),
            lastfm_api_key: required("LASTFM_API_KEY")?,
            lastfm_api_secret: required("LASTFM_API_SECRET")?,
            lastfm_username: required("LASTFM_USERNAME")?,
            lastfm_password_hash,
            spotify,
            app_token: required("APP_TOKEN")?,
            web_app_url: optional("WEB_APP_URL"),
            database_url: required("DATABASE_URL")?,
            datetime_format: optional("DATETIME_FORMAT")
                .unwrap_or_else(|| DEFAULT_DATETIME_FORMAT.to_string()),
            api_host: optional("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port,
        })
    }

    /// Filesystem path of the SQLite database, accepting either a bare
    /// path or an `sqlite:` style DSN.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_db(url: &str) -> Settings {
        Settings {
            lastfm_api_url: LASTFM_API_ROOT.to_string(),
            lastfm_api_key: String::new(),
            lastfm_api_secret: String::new(),
            lastfm_username: String::new(),
            lastfm_password_hash: String::new(),
            spotify: None,
            app_token: String::new(),
            web_app_url: None,
            database_url: url.to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
        }
    }

    #[test]
    fn database_path_strips_dsn_prefix() {
        assert_eq!(
            settings_with_db("sqlite://scrobbles.db").database_path(),
            "scrobbles.db"
        );
        assert_eq!(
            settings_with_db("sqlite:/var/lib/scrobbled/scrobbles.db").database_path(),
            "/var/lib/scrobbled/scrobbles.db"
        );
        assert_eq!(
            settings_with_db("scrobbles.db").database_path(),
            "scrobbles.db"
        );
    }
}
