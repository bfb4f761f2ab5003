use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  pub session: SessionConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Project URL, e.g. https://xyz.supabase.co
  pub url: String,
  /// Realtime endpoint (defaults to the project URL's websocket endpoint)
  pub realtime_url: Option<String>,
}

impl BackendConfig {
  /// Realtime endpoint, derived from `url` when not configured.
  pub fn realtime_endpoint(&self) -> std::result::Result<Url, url::ParseError> {
    if let Some(url) = &self.realtime_url {
      return Url::parse(url);
    }
    let mut url = Url::parse(&self.url)?;
    let scheme = match url.scheme() {
      "https" => Some("wss"),
      "http" => Some("ws"),
      _ => None,
    };
    if let Some(scheme) = scheme {
      // http(s) -> ws(s) stays within the special schemes, so this cannot fail
      let _ = url.set_scheme(scheme);
    }
    let path = format!("{}/realtime/v1", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  /// Resident id of the signed-in user
  pub user_id: String,
  /// Community whose feed is shown by default
  pub community_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before a cached result is refetched on the next read
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
    }
  }
}

fn default_stale_time_secs() -> u64 {
  60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courtyard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courtyard/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/courtyard/config.yaml\n\
                 See courtyard.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("courtyard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courtyard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks COURTYARD_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("COURTYARD_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| eyre!("API key not found. Set COURTYARD_API_KEY or SUPABASE_ANON_KEY environment variable."))
  }

  /// Get the signed-in user's access token, if any.
  ///
  /// Checks COURTYARD_ACCESS_TOKEN.
  pub fn get_access_token() -> Option<String> {
    std::env::var("COURTYARD_ACCESS_TOKEN").ok().filter(|t| !t.is_empty())
  }
}
