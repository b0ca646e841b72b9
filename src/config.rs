//! Configuration management.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, and environment variables (a `.env` file is loaded
//! by `main`). The file holds global `[crawl]` knobs plus optional
//! `[sources.<tag>]` tables overriding them per source.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_client::FetchPolicy;
use crate::models::Source;
use crate::proxy::RotationStrategy;
use crate::scrapers::kidp::{PROFILE_DIRECTORY, REGIONS};

/// Default database file.
pub const DEFAULT_DATABASE: &str = "orzeczenia.db";
/// Default lower bound for date-driven crawls.
pub const DEFAULT_SINCE: &str = "2015-01-01";
const DEFAULT_DELAY_MS: u64 = 3_000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
const DEFAULT_ANTI_BOT_COOLDOWN_MS: u64 = 10_000;
const DEFAULT_SCAN_LENGTH: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Global crawl knobs (file `[crawl]` table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlConfig {
    /// Tags of sources to run when none are named on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_bot_cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_on_failure: Option<bool>,
}

/// Per-source overrides (file `[sources.<tag>]` tables).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_on_failure: Option<bool>,
    /// First listing page for paginated sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
    /// How many ids an index walk visits per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<[u32; 2]>,
    /// Also walk the advisor profile directory (tax advisors only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_url: Option<String>,
}

/// Proxy pool settings (file `[proxies]` table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationStrategy>,
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Let writes add unknown columns instead of failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create_columns: Option<bool>,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub proxies: ProxyConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sources: HashMap<String, SourceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str| {
            var(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        };

        if let Some(v) = var("DATABASE_PATH") {
            self.database = Some(v);
        }
        if let Some(v) = var("USER_AGENT") {
            self.user_agent = Some(v);
        }
        if let Some(v) = flag("AUTO_CREATE_COLUMNS") {
            self.auto_create_columns = Some(v);
        }
        if let Some(v) = var("ENABLED_SOURCES") {
            self.crawl.enabled = Some(v.split(',').map(|s| s.trim().to_string()).collect());
        }
        if let Some(v) = var("SINCE_DATE") {
            self.crawl.since = Some(v);
        }
        if let Some(v) = var("TO_DATE") {
            self.crawl.to = Some(v);
        }
        if let Some(v) = number("REQUEST_DELAY_MS") {
            self.crawl.request_delay_ms = Some(v);
        }
        if let Some(v) = number("REQUEST_TIMEOUT_MS") {
            self.crawl.request_timeout_ms = Some(v);
        }
        if let Some(v) = number("MAX_RETRIES") {
            self.crawl.max_retries = Some(v as u32);
        }
        if let Some(v) = number("RETRY_DELAY_MS") {
            self.crawl.retry_delay_ms = Some(v);
        }
        if let Some(v) = flag("ABORT_ON_FAILURE") {
            self.crawl.abort_on_failure = Some(v);
        }
        if let Some(v) = var("PROXY_FILE") {
            self.proxies.file = Some(v);
        }
        if let Some(v) = var("PROXY_ROTATION").and_then(|v| v.parse().ok()) {
            self.proxies.rotation = Some(v);
        }

        // Per-source switches, e.g. NSA_ENABLED=false
        for source in Source::ALL {
            let key = format!("{}_ENABLED", source.as_str().to_ascii_uppercase());
            if let Some(v) = flag(&key) {
                self.sources
                    .entry(source.as_str().to_string())
                    .or_default()
                    .enabled = Some(v);
            }
        }
        if let Some(v) = flag("KIDP_PROFILES") {
            self.sources
                .entry(Source::Kidp.as_str().to_string())
                .or_default()
                .profiles = Some(v);
        }

        self
    }

    /// Resolve into [`Settings`]. `today` bounds open-ended date ranges.
    pub fn resolve(&self, base_dir: &Path, today: NaiveDate) -> Result<Settings, ConfigError> {
        for tag in self.sources.keys() {
            tag.parse::<Source>().map_err(|message| ConfigError::Invalid {
                key: format!("sources.{}", tag),
                message,
            })?;
        }

        let enabled: Option<Vec<Source>> = match &self.crawl.enabled {
            Some(tags) => Some(
                tags.iter()
                    .filter(|t| !t.is_empty())
                    .map(|t| {
                        t.parse::<Source>().map_err(|message| ConfigError::Invalid {
                            key: "crawl.enabled".into(),
                            message,
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            None => None,
        };

        let since = parse_date("crawl.since", self.crawl.since.as_deref())?
            .or_else(|| NaiveDate::parse_from_str(DEFAULT_SINCE, "%Y-%m-%d").ok())
            .unwrap_or(today);
        let to = parse_date("crawl.to", self.crawl.to.as_deref())?.unwrap_or(today);

        let mut sources = BTreeMap::new();
        for source in Source::ALL {
            let overrides = self
                .sources
                .get(source.as_str())
                .cloned()
                .unwrap_or_default();
            let key = |field: &str| format!("sources.{}.{}", source, field);

            let source_since = parse_date(&key("since"), overrides.since.as_deref())?.unwrap_or(since);
            let source_to = parse_date(&key("to"), overrides.to.as_deref())?.unwrap_or(to);
            let abort_on_failure = overrides
                .abort_on_failure
                .or(self.crawl.abort_on_failure)
                .unwrap_or(false);

            let fetch = FetchPolicy {
                timeout: Duration::from_millis(
                    self.crawl.request_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                ),
                max_retries: overrides
                    .max_retries
                    .or(self.crawl.max_retries)
                    .unwrap_or(DEFAULT_MAX_RETRIES),
                retry_delay: Duration::from_millis(
                    self.crawl.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
                abort_on_failure,
                rotation: self.proxies.rotation.unwrap_or_default(),
                anti_bot_cooldown: Duration::from_millis(
                    self.crawl
                        .anti_bot_cooldown_ms
                        .unwrap_or(DEFAULT_ANTI_BOT_COOLDOWN_MS),
                ),
            };

            let profiles_url = (source == Source::Kidp && overrides.profiles.unwrap_or(false))
                .then(|| {
                    overrides
                        .profiles_url
                        .as_deref()
                        .unwrap_or(PROFILE_DIRECTORY)
                        .trim_end_matches('/')
                        .to_string()
                });
            let [region_from, region_to] = overrides
                .regions
                .unwrap_or([*REGIONS.start(), *REGIONS.end()]);
            let enabled = overrides.enabled.unwrap_or_else(|| match &enabled {
                Some(list) => list.contains(&source),
                None => true,
            });

            sources.insert(
                source,
                SourceSettings {
                    source,
                    enabled,
                    base_url: overrides
                        .base_url
                        .map(|u| u.trim_end_matches('/').to_string())
                        .unwrap_or_else(|| default_base_url(source).to_string()),
                    since: source_since,
                    to: source_to,
                    request_delay: Duration::from_millis(
                        overrides
                            .request_delay_ms
                            .or(self.crawl.request_delay_ms)
                            .unwrap_or(DEFAULT_DELAY_MS),
                    ),
                    abort_on_failure,
                    start_page: overrides.start_page.unwrap_or(1).max(1),
                    scan_length: overrides.scan_length.unwrap_or(DEFAULT_SCAN_LENGTH),
                    regions: region_from..=region_to,
                    profiles_url,
                    fetch,
                },
            );
        }

        let database_path = resolve_path(
            base_dir,
            self.database.as_deref().unwrap_or(DEFAULT_DATABASE),
        );
        let proxy_file = self.proxies.file.as_deref().map(|f| resolve_path(base_dir, f));

        Ok(Settings {
            database_path,
            user_agent: self.user_agent.clone(),
            auto_create_columns: self.auto_create_columns.unwrap_or(false),
            proxy_file,
            rotation: self.proxies.rotation.unwrap_or_default(),
            sources,
        })
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub user_agent: Option<String>,
    pub auto_create_columns: bool,
    pub proxy_file: Option<PathBuf>,
    pub rotation: RotationStrategy,
    pub sources: BTreeMap<Source, SourceSettings>,
}

impl Settings {
    pub fn source(&self, source: Source) -> Option<&SourceSettings> {
        self.sources.get(&source)
    }

    /// Sources enabled by configuration, in tag order.
    pub fn enabled_sources(&self) -> Vec<Source> {
        self.sources
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.source)
            .collect()
    }
}

/// Everything one crawler needs to know about its source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub source: Source,
    pub enabled: bool,
    /// Site root without trailing slash.
    pub base_url: String,
    pub since: NaiveDate,
    pub to: NaiveDate,
    /// Politeness delay between requests.
    pub request_delay: Duration,
    pub abort_on_failure: bool,
    pub start_page: u32,
    pub scan_length: u32,
    pub regions: RangeInclusive<u32>,
    /// Advisor profile directory to walk after the registry, when enabled.
    pub profiles_url: Option<String>,
    pub fetch: FetchPolicy,
}

impl SourceSettings {
    /// Defaults for a source, with everything pointed at `base_url`.
    pub fn for_source(source: Source, base_url: &str) -> Self {
        let today = Local::now().date_naive();
        let mut settings = Config::default()
            .resolve(Path::new("."), today)
            .ok()
            .and_then(|s| s.sources.get(&source).cloned())
            .unwrap_or_else(|| Self::fallback(source, today));
        settings.base_url = base_url.trim_end_matches('/').to_string();
        settings
    }

    fn fallback(source: Source, today: NaiveDate) -> Self {
        Self {
            source,
            enabled: true,
            base_url: default_base_url(source).to_string(),
            since: today,
            to: today,
            request_delay: Duration::from_millis(DEFAULT_DELAY_MS),
            abort_on_failure: false,
            start_page: 1,
            scan_length: DEFAULT_SCAN_LENGTH,
            regions: REGIONS,
            profiles_url: None,
            fetch: FetchPolicy::default(),
        }
    }

    /// Join a site-relative path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

pub fn default_base_url(source: Source) -> &'static str {
    match source {
        Source::Ms => "https://orzeczenia.ms.gov.pl",
        Source::Nsa => "https://orzeczenia.nsa.gov.pl",
        Source::Sn => "https://www.sn.pl",
        Source::Uzp => "https://orzeczenia.uzp.gov.pl",
        Source::Kidp => "https://kidp.pl",
    }
}

/// Accepts `YYYY-MM-DD` and `DD-MM-YYYY`.
fn parse_date(key: &str, value: Option<&str>) -> Result<Option<NaiveDate>, ConfigError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d-%m-%Y"))
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{:?}: {}", value, e),
        })
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Load settings from an optional config file plus the environment.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let (config, base_dir) = match config_path {
        Some(path) => (
            Config::load(path)?,
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        ),
        None => (
            Config::default(),
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        ),
    };
    config
        .with_env_overrides()
        .resolve(&base_dir, Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Config::default().resolve(Path::new("/data"), today()).unwrap();

        assert_eq!(settings.database_path, PathBuf::from("/data/orzeczenia.db"));
        assert!(!settings.auto_create_columns);
        assert_eq!(settings.enabled_sources(), Source::ALL.to_vec());

        let nsa = settings.source(Source::Nsa).unwrap();
        assert_eq!(nsa.since, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert_eq!(nsa.to, today());
        assert_eq!(nsa.request_delay, Duration::from_millis(3_000));
        assert_eq!(nsa.fetch.max_retries, 5);
        assert_eq!(nsa.fetch.timeout, Duration::from_millis(10_000));
        assert_eq!(nsa.fetch.retry_delay, Duration::from_millis(5_000));
        assert_eq!(nsa.base_url, "https://orzeczenia.nsa.gov.pl");
        assert_eq!(settings.source(Source::Kidp).unwrap().regions, 3..=18);
        assert_eq!(settings.source(Source::Kidp).unwrap().profiles_url, None);
    }

    #[test]
    fn test_profile_pass_switch() {
        let config = Config::from_toml("[sources.kidp]\nprofiles = true\n").unwrap();
        let settings = config.resolve(Path::new("."), today()).unwrap();
        assert_eq!(
            settings.source(Source::Kidp).unwrap().profiles_url.as_deref(),
            Some("https://podatkibezryzyka.pl")
        );

        let settings = Config::default()
            .with_overrides_from(|key| (key == "KIDP_PROFILES").then(|| "1".to_string()))
            .resolve(Path::new("."), today())
            .unwrap();
        assert!(settings.source(Source::Kidp).unwrap().profiles_url.is_some());
        assert_eq!(settings.source(Source::Ms).unwrap().profiles_url, None);
    }

    #[test]
    fn test_file_and_source_overrides() {
        let config = Config::from_toml(
            r#"
            database = "db/legal.db"

            [crawl]
            enabled = ["ms", "uzp"]
            since = "01-01-2025"
            max_retries = 2

            [proxies]
            file = "proxies.txt"
            rotation = "sequential"

            [sources.uzp]
            scan_length = 25
            request_delay_ms = 100
            base_url = "http://localhost:9000/"
            "#,
        )
        .unwrap();
        let settings = config.resolve(Path::new("/srv"), today()).unwrap();

        assert_eq!(settings.enabled_sources(), vec![Source::Ms, Source::Uzp]);
        assert_eq!(settings.database_path, PathBuf::from("/srv/db/legal.db"));
        assert_eq!(settings.proxy_file, Some(PathBuf::from("/srv/proxies.txt")));
        assert_eq!(settings.rotation, RotationStrategy::Sequential);

        let uzp = settings.source(Source::Uzp).unwrap();
        assert_eq!(uzp.scan_length, 25);
        assert_eq!(uzp.request_delay, Duration::from_millis(100));
        assert_eq!(uzp.base_url, "http://localhost:9000");
        assert_eq!(uzp.since, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(uzp.fetch.max_retries, 2);
        assert_eq!(uzp.fetch.rotation, RotationStrategy::Sequential);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MAX_RETRIES", "1"),
            ("ABORT_ON_FAILURE", "true"),
            ("NSA_ENABLED", "0"),
            ("TO_DATE", "2024-01-31"),
        ]
        .into_iter()
        .collect();
        let settings = Config::default()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .resolve(Path::new("."), today())
            .unwrap();

        let nsa = settings.source(Source::Nsa).unwrap();
        assert!(!nsa.enabled);
        assert!(nsa.abort_on_failure);
        assert!(nsa.fetch.abort_on_failure);
        assert_eq!(nsa.fetch.max_retries, 1);
        assert_eq!(nsa.to, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(settings.source(Source::Ms).unwrap().enabled);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let config = Config::from_toml("[crawl]\nsince = \"yesterday\"\n").unwrap();
        let err = config.resolve(Path::new("."), today()).unwrap_err();
        assert!(err.to_string().contains("crawl.since"));

        let config = Config::from_toml("[sources.xyz]\nenabled = true\n").unwrap();
        assert!(config.resolve(Path::new("."), today()).is_err());

        assert!(Config::from_toml("[crawl]\nbogus = 1\n").is_err());
    }

    #[test]
    fn test_source_url_join() {
        let settings = SourceSettings::for_source(Source::Nsa, "http://test/");
        assert_eq!(settings.url("/cbo/find?p=2"), "http://test/cbo/find?p=2");
        assert_eq!(settings.url("cbo/search"), "http://test/cbo/search");
        assert_eq!(settings.url("https://other/x"), "https://other/x");
    }
}
