//! Application configuration management
//!
//! Everything is loaded once from environment variables (with `.env`
//! support via dotenvy) and passed by reference into the services that
//! need it. There is no global configuration state.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result, bail};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// MediaPortal database URL (MySQL)
    pub database_url: String,

    /// Target language code used to disambiguate series candidates
    pub language: String,

    /// Base URL of TheTVDB API (series search and updates endpoints)
    pub api_url: String,

    /// Base URL of the proxy/mirror serving per-series episode data
    pub proxy_url: String,

    /// Description-text prefix marking a row as episodic content
    pub series_indicator: String,

    /// Regex locating the season/episode block inside a description text
    pub description_pattern: String,

    /// Skip all online lookups when set
    pub offline: bool,

    /// Series titles that must never be resolved online
    pub offline_only_titles: Vec<String>,

    /// Series titles that must never be resolved from the description text
    pub online_only_titles: Vec<String>,

    /// EPG series name -> name to use for the remote search
    pub series_substitutions: HashMap<String, String>,

    /// EPG episode name -> name to use for episode matching
    pub episode_substitutions: HashMap<String, String>,

    /// Directory holding cached remote responses
    pub cache_path: String,

    /// Directory receiving database dumps
    pub backup_path: String,

    /// How many database dumps to keep before rotating out the oldest
    pub backup_count: usize,

    /// Path to the mysqldump binary
    pub mysqldump_path: String,

    /// Title suffix identifying making-of specials, which are skipped
    pub making_of_suffix: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("TVDB_API_URL")
            .unwrap_or_else(|_| "http://thetvdb.com/api/".to_string());

        // The proxy serves the per-series episode XML; it defaults to the
        // API itself when no mirror is configured.
        let proxy_url = env::var("TVDB_PROXY_URL").unwrap_or_else(|_| api_url.clone());

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,

            language: env::var("TVDB_LANGUAGE").unwrap_or_else(|_| "en".to_string()),

            api_url,
            proxy_url,

            series_indicator: env::var("EPG_SERIES_INDICATOR")
                .context("EPG_SERIES_INDICATOR is required")?,

            description_pattern: env::var("EPG_DESCRIPTION_PATTERN")
                .context("EPG_DESCRIPTION_PATTERN is required")?,

            offline: env::var("OFFLINE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            offline_only_titles: parse_title_list(
                &env::var("SERIES_OFFLINE_ONLY").unwrap_or_default(),
            ),

            online_only_titles: parse_title_list(
                &env::var("SERIES_ONLINE_ONLY").unwrap_or_default(),
            ),

            series_substitutions: parse_substitution_pairs(
                &env::var("SERIES_NAME_SUBSTITUTIONS").unwrap_or_default(),
            )
            .context("Invalid SERIES_NAME_SUBSTITUTIONS")?,

            episode_substitutions: parse_substitution_pairs(
                &env::var("EPISODE_NAME_SUBSTITUTIONS").unwrap_or_default(),
            )
            .context("Invalid EPISODE_NAME_SUBSTITUTIONS")?,

            cache_path: env::var("CACHE_PATH").unwrap_or_else(|_| "./cache".to_string()),

            backup_path: env::var("BACKUP_PATH").unwrap_or_else(|_| "./bak".to_string()),

            backup_count: env::var("BACKUP_COUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            mysqldump_path: env::var("MYSQLDUMP_PATH")
                .unwrap_or_else(|_| "mysqldump".to_string()),

            making_of_suffix: env::var("MAKING_OF_SUFFIX")
                .unwrap_or_else(|_| "Making-of".to_string()),
        })
    }

    /// True if the title may only be resolved via the description text
    pub fn is_offline_only(&self, title: &str) -> bool {
        self.offline_only_titles
            .iter()
            .any(|t| t.eq_ignore_ascii_case(title))
    }

    /// True if the title may only be resolved via the remote lookup
    pub fn is_online_only(&self, title: &str) -> bool {
        self.online_only_titles
            .iter()
            .any(|t| t.eq_ignore_ascii_case(title))
    }
}

/// Split a semicolon-separated title list, dropping empty entries
fn parse_title_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a semicolon-separated list of name/substitution pairs.
///
/// An odd number of entries means the list is malformed; that is a fatal
/// configuration error because silently dropping the trailing entry would
/// shift every following pair.
fn parse_substitution_pairs(raw: &str) -> Result<HashMap<String, String>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    let entries: Vec<&str> = raw.split(';').collect();
    if entries.len() % 2 != 0 {
        bail!(
            "substitution list does not consist of name/substitution pairs ({} entries)",
            entries.len()
        );
    }

    let mut table = HashMap::new();
    for pair in entries.chunks(2) {
        table.insert(pair[0].to_string(), pair[1].to_string());
    }
    Ok(table)
}
