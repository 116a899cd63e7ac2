use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
  /// Where the offer catalog lives
  pub url: Url,

  /// Hours before a cached catalog must be revalidated
  #[serde(default = "default_ttl_hours")]
  pub ttl_hours: i64,

  /// Seconds before an in-flight fetch counts as failed
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_ttl_hours() -> i64 {
  crate::sync::DEFAULT_TTL_HOURS
}

fn default_timeout_secs() -> u64 {
  crate::fetch::DEFAULT_TIMEOUT.as_secs()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offersync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offersync/config.yaml
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
        "No configuration file found. Create one at ~/.config/offersync/config.yaml\n\
                 or pass the catalog URL with --url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offersync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offersync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the catalog URL from the environment, overriding the config file.
  ///
  /// Checks OFFERSYNC_CATALOG_URL.
  pub fn env_catalog_url() -> Option<Url> {
    std::env::var("OFFERSYNC_CATALOG_URL")
      .ok()
      .and_then(|raw| Url::parse(&raw).ok())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal_config() {
    let yaml = "catalog:\n  url: https://example.net/offers.json\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(
      config.catalog.url.as_str(),
      "https://example.net/offers.json"
    );
    assert_eq!(config.catalog.ttl_hours, 24);
    assert_eq!(config.catalog.timeout_secs, 10);
  }

  #[test]
  fn test_parse_overrides() {
    let yaml =
      "catalog:\n  url: https://example.net/offers.json\n  ttl_hours: 1\n  timeout_secs: 3\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.catalog.ttl_hours, 1);
    assert_eq!(config.catalog.timeout_secs, 3);
  }
}
