//! TheTVDB API client for series and episode metadata
//!
//! The legacy API speaks XML. Every response is persisted in the local
//! cache store, and subsequent lookups read the cache instead of the
//! network. The updates endpoint is queried at most once per process,
//! bounded by the oldest surviving episode-data cache entry, and forces
//! invalidation of cache entries for series that changed upstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info, warn};

use super::cache::{CacheStore, MAX_CACHE_AGE, sanitize_key};
use super::resolver;
use crate::config::Config;

/// Cache key prefix of persisted per-series episode data
pub const SERIESDATA_PREFIX: &str = "seriesdata";

/// A series search request, created once per run of identical EPG titles
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    /// Title exactly as it appears in the EPG
    pub raw_name: String,
    /// Name used for the remote search: substituted if a mapping exists,
    /// with illegal path characters stripped
    pub name: String,
    /// Four-digit air year, when the EPG row carried one
    pub air_year: Option<String>,
}

impl SeriesQuery {
    pub fn new(
        raw_name: &str,
        air_year: Option<&str>,
        substitutions: &HashMap<String, String>,
    ) -> Self {
        let substituted = match substitutions.get(raw_name) {
            Some(substitute) => {
                debug!(
                    raw = %raw_name,
                    substitute = %substitute,
                    "Using substitution for series name"
                );
                substitute.clone()
            }
            None => raw_name.to_string(),
        };

        Self {
            raw_name: raw_name.to_string(),
            name: sanitize_key(&substituted),
            air_year: air_year.map(str::to_string),
        }
    }
}

/// One entry of a series search response
#[derive(Debug, Clone, Default)]
pub struct SeriesCandidate {
    pub series_id: String,
    pub series_name: String,
    pub first_aired: String,
    pub language: String,
}

/// One episode of a series
#[derive(Debug, Clone, Default)]
pub struct EpisodeInformation {
    pub id: String,
    /// Kept as text: the remote format does not guarantee numeric content
    pub episode_number: String,
    pub season_number: String,
    pub first_aired: String,
    pub episode_name: String,
}

/// Full episode listing of one resolved series
#[derive(Debug, Clone, Default)]
pub struct SeriesEpisodeSet {
    pub series_id: String,
    pub series_name: String,
    pub first_aired: String,
    pub episodes: Vec<EpisodeInformation>,
}

/// Series ids changed upstream since the oldest cache timestamp
#[derive(Debug, Clone, Default)]
pub struct UpdateSet {
    ids: HashSet<String>,
}

impl UpdateSet {
    pub fn contains(&self, series_id: &str) -> bool {
        self.ids.contains(series_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for UpdateSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Raw HTTP access, abstracted so tests can count and fake calls
#[async_trait::async_trait]
pub trait TvdbTransport: Send + Sync {
    /// Fetch a URL and return the response body as text
    async fn get(&self, url: &str) -> Result<String>;
}

/// reqwest-backed transport used in production
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TvdbTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            bail!("Request to {url} failed with status: {}", response.status());
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body of {url}"))
    }
}

/// Client resolving series and episode metadata, cache-first
pub struct TvdbClient {
    transport: Arc<dyn TvdbTransport>,
    cache: Arc<dyn CacheStore>,
    api_url: String,
    proxy_url: String,
    language: String,
    updates: Option<UpdateSet>,
}

impl TvdbClient {
    pub fn new(
        transport: Arc<dyn TvdbTransport>,
        cache: Arc<dyn CacheStore>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            cache,
            api_url: config.api_url.clone(),
            proxy_url: config.proxy_url.clone(),
            language: config.language.clone(),
            updates: None,
        }
    }

    /// Resolve a query down to one series and return its episode listing.
    ///
    /// `None` means no candidate survived disambiguation; errors are
    /// per-query and the caller degrades them to "no data".
    pub async fn resolve_and_fetch(
        &mut self,
        query: &SeriesQuery,
    ) -> Result<Option<SeriesEpisodeSet>> {
        // Stale entries must be gone before the first cache read, and the
        // search below reads the cache
        self.updates_since_last_cache().await;

        let candidates = self.search_series(query).await?;
        let Some(series_id) = resolver::resolve(query, &candidates, &self.language) else {
            return Ok(None);
        };
        debug!(series_id = %series_id, "Chosen series id");

        let episodes = self.fetch_episodes(&series_id, &query.name).await?;
        Ok(Some(episodes))
    }

    /// Search series candidates by name, cache-or-fetch
    pub async fn search_series(&self, query: &SeriesQuery) -> Result<Vec<SeriesCandidate>> {
        let key = format!("query_{}.xml", query.name);
        let url = format!(
            "{}GetSeries.php?seriesname={}&language=all",
            self.api_url,
            urlencoding::encode(&query.name)
        );
        debug!(url = %url, "Resolving series by name");

        let body = self.cache_or_fetch(&key, &url).await?;
        parse_series_list(&body)
    }

    /// Fetch the episode listing of one series, cache-or-fetch.
    ///
    /// The cache entry is dropped first when the updates endpoint reported
    /// the series as changed since the oldest cache timestamp.
    pub async fn fetch_episodes(
        &mut self,
        series_id: &str,
        series_name: &str,
    ) -> Result<SeriesEpisodeSet> {
        let key = format!("{SERIESDATA_PREFIX}_{series_id}_{series_name}.xml");

        if self.updates_since_last_cache().await.contains(series_id) {
            info!(
                series_id = %series_id,
                "Invalidating cached episode data, series changed upstream"
            );
            self.cache.invalidate(&key);
        }

        let url = format!(
            "{}series/?seriesid={}&language={}",
            self.proxy_url, series_id, self.language
        );
        let body = self.cache_or_fetch(&key, &url).await?;
        parse_series_data(&body)
    }

    /// Series ids changed upstream since the oldest surviving cache entry.
    ///
    /// Computed once per process: stale cache entries are evicted, the
    /// oldest surviving episode-data timestamp becomes the lower bound of
    /// the updates query, and the result is memoized. Without any cache
    /// the set is empty and no network call is made. A failed fetch also
    /// degrades to the empty set; there are no retries.
    pub async fn updates_since_last_cache(&mut self) -> &UpdateSet {
        if self.updates.is_none() {
            self.cache.evict_stale(MAX_CACHE_AGE);
            let set = match self.cache.oldest_timestamp(SERIESDATA_PREFIX) {
                Some(oldest) => {
                    let url = format!("{}Updates.php?type=all&time={}", self.api_url, oldest);
                    info!(url = %url, "Fetching series updates since last cache");
                    match self.fetch_updates(&url).await {
                        Ok(set) => {
                            info!(count = set.len(), "Series changed since last cache");
                            set
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to fetch updates, cache ages normally");
                            UpdateSet::default()
                        }
                    }
                }
                None => {
                    debug!("No cached episode data yet, skipping updates query");
                    UpdateSet::default()
                }
            };
            self.updates = Some(set);
        }
        self.updates.get_or_insert_with(UpdateSet::default)
    }

    async fn fetch_updates(&self, url: &str) -> Result<UpdateSet> {
        let body = self.transport.get(url).await?;
        parse_updates(&body)
    }

    /// Read an entry from the cache, falling back to the network and
    /// persisting the response. A failed cache write is logged but does
    /// not discard the fetched body.
    async fn cache_or_fetch(&self, key: &str, url: &str) -> Result<String> {
        if let Some(bytes) = self.cache.get(key) {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        let body = self.transport.get(url).await?;
        if let Err(e) = self.cache.put(key, body.as_bytes()) {
            warn!(key = %key, error = %e, "Failed to persist response to cache");
        }
        Ok(body)
    }
}

/// Parse a `GetSeries` response into search candidates
pub fn parse_series_list(xml: &str) -> Result<Vec<SeriesCandidate>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut current: Option<SeriesCandidate> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "Series" {
                    current = Some(SeriesCandidate::default());
                }
                current_tag = tag;
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Series"
                    && let Some(candidate) = current.take()
                {
                    candidates.push(candidate);
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut candidate) = current {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "seriesid" => candidate.series_id = text,
                        "SeriesName" => candidate.series_name = text,
                        "FirstAired" => candidate.first_aired = text,
                        "language" => candidate.language = text,
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed series search response: {e}"),
            _ => {}
        }
    }

    debug!(count = candidates.len(), "Parsed series search response");
    Ok(candidates)
}

/// Parse a per-series response into its header and episode listing
pub fn parse_series_data(xml: &str) -> Result<SeriesEpisodeSet> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut set = SeriesEpisodeSet::default();
    let mut episode: Option<EpisodeInformation> = None;
    let mut in_series_header = false;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Series" => in_series_header = true,
                    "Episode" => episode = Some(EpisodeInformation::default()),
                    _ => {}
                }
                current_tag = tag;
            }
            Ok(Event::End(ref e)) => {
                match e.name().as_ref() {
                    b"Series" => in_series_header = false,
                    b"Episode" => {
                        if let Some(info) = episode.take() {
                            set.episodes.push(info);
                        }
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut info) = episode {
                    match current_tag.as_str() {
                        "id" => info.id = text,
                        "EpisodeNumber" => info.episode_number = text,
                        "SeasonNumber" => info.season_number = text,
                        "FirstAired" => info.first_aired = text,
                        "EpisodeName" => info.episode_name = text,
                        _ => {}
                    }
                } else if in_series_header {
                    match current_tag.as_str() {
                        "id" => set.series_id = text,
                        "SeriesName" => set.series_name = text,
                        "FirstAired" => set.first_aired = text,
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed series data response: {e}"),
            _ => {}
        }
    }

    debug!(
        series = %set.series_name,
        episodes = set.episodes.len(),
        "Parsed series data response"
    );
    Ok(set)
}

/// Parse an updates response into the set of changed series ids
pub fn parse_updates(xml: &str) -> Result<UpdateSet> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ids = Vec::new();
    let mut in_series = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                in_series = e.name().as_ref() == b"Series";
            }
            Ok(Event::End(_)) => {
                in_series = false;
            }
            Ok(Event::Text(ref e)) => {
                if in_series {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        ids.push(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed updates response: {e}"),
            _ => {}
        }
    }

    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SEARCH_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<Data>
  <Series>
    <seriesid>73739</seriesid>
    <language>en</language>
    <SeriesName>Lost</SeriesName>
    <FirstAired>2004-09-22</FirstAired>
  </Series>
  <Series>
    <seriesid>144811</seriesid>
    <language>de</language>
    <SeriesName>Lost</SeriesName>
    <FirstAired>2004-09-22</FirstAired>
  </Series>
</Data>"#;

    const SERIESDATA_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<Data>
  <Series>
    <id>73739</id>
    <SeriesName>Lost</SeriesName>
    <FirstAired>2004-09-22</FirstAired>
  </Series>
  <Episode>
    <id>127131</id>
    <EpisodeNumber>1</EpisodeNumber>
    <SeasonNumber>1</SeasonNumber>
    <FirstAired>2004-09-22</FirstAired>
    <EpisodeName>Pilot (1)</EpisodeName>
  </Episode>
  <Episode>
    <id>127132</id>
    <EpisodeNumber>2</EpisodeNumber>
    <SeasonNumber>1</SeasonNumber>
    <FirstAired>2004-09-29</FirstAired>
    <EpisodeName>Pilot (2)</EpisodeName>
  </Episode>
</Data>"#;

    const UPDATES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<Items>
  <Time>1400000000</Time>
  <Series>73739</Series>
  <Series>80348</Series>
  <Episode>1234567</Episode>
</Items>"#;

    #[test]
    fn test_parse_series_list() {
        let candidates = parse_series_list(SEARCH_XML).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].series_id, "73739");
        assert_eq!(candidates[0].language, "en");
        assert_eq!(candidates[1].language, "de");
        assert_eq!(candidates[1].first_aired, "2004-09-22");
    }

    #[test]
    fn test_parse_empty_series_list() {
        let candidates = parse_series_list("<Data></Data>").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_parse_series_data() {
        let set = parse_series_data(SERIESDATA_XML).unwrap();
        assert_eq!(set.series_id, "73739");
        assert_eq!(set.series_name, "Lost");
        assert_eq!(set.episodes.len(), 2);
        assert_eq!(set.episodes[0].episode_name, "Pilot (1)");
        assert_eq!(set.episodes[0].season_number, "1");
        assert_eq!(set.episodes[1].episode_number, "2");
    }

    #[test]
    fn test_parse_updates() {
        let updates = parse_updates(UPDATES_XML).unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates.contains("73739"));
        assert!(updates.contains("80348"));
        assert!(!updates.contains("1234567"));
    }

    #[test]
    fn test_series_query_substitution_and_sanitization() {
        let mut substitutions = HashMap::new();
        substitutions.insert("Dr. Who".to_string(), "Doctor Who: 2005?".to_string());

        let query = SeriesQuery::new("Dr. Who", Some("2005"), &substitutions);
        assert_eq!(query.raw_name, "Dr. Who");
        assert_eq!(query.name, "Doctor Who 2005");
        assert_eq!(query.air_year.as_deref(), Some("2005"));

        let plain = SeriesQuery::new("Lost", None, &substitutions);
        assert_eq!(plain.name, "Lost");
        assert!(plain.air_year.is_none());
    }

    /// Transport fake that serves canned bodies by URL substring and
    /// records every request
    struct FakeTransport {
        routes: Vec<(&'static str, String)>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(routes: Vec<(&'static str, String)>) -> Self {
            Self {
                routes,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl TvdbTransport for FakeTransport {
        async fn get(&self, url: &str) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            for (fragment, body) in &self.routes {
                if url.contains(fragment) {
                    return Ok(body.clone());
                }
            }
            bail!("no route for {url}")
        }
    }

    /// In-memory cache store with insertion timestamps
    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, (Vec<u8>, i64)>>,
    }

    impl MemoryCache {
        fn seed(&self, key: &str, bytes: &[u8], ts: i64) {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes.to_vec(), ts));
        }
    }

    fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    impl CacheStore for MemoryCache {
        fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.entries
                .lock()
                .unwrap()
                .get(key)
                .map(|(bytes, _)| bytes.clone())
        }

        fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes.to_vec(), unix_now()));
            Ok(())
        }

        fn invalidate(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }

        fn evict_stale(&self, max_age: std::time::Duration) -> usize {
            let cutoff = unix_now() - max_age.as_secs() as i64;
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|_, (_, ts)| *ts >= cutoff);
            before - entries.len()
        }

        fn oldest_timestamp(&self, prefix: &str) -> Option<i64> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(_, (_, ts))| *ts)
                .min()
        }
    }

    fn test_config() -> Config {
        Config {
            database_url: "mysql://test".to_string(),
            language: "en".to_string(),
            api_url: "http://tvdb.test/api/".to_string(),
            proxy_url: "http://tvdb.test/api/".to_string(),
            series_indicator: "Serie".to_string(),
            description_pattern: "Folge ".to_string(),
            offline: false,
            offline_only_titles: Vec::new(),
            online_only_titles: Vec::new(),
            series_substitutions: HashMap::new(),
            episode_substitutions: HashMap::new(),
            cache_path: String::new(),
            backup_path: String::new(),
            backup_count: 10,
            mysqldump_path: "mysqldump".to_string(),
            making_of_suffix: "Making-of".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_and_fetch_uses_cache_on_second_call() {
        let transport = Arc::new(FakeTransport::new(vec![
            ("GetSeries.php", SEARCH_XML.to_string()),
            ("series/", SERIESDATA_XML.to_string()),
        ]));
        let cache = Arc::new(MemoryCache::default());
        let mut client = TvdbClient::new(transport.clone(), cache, &test_config());

        let query = SeriesQuery::new("Lost", Some("2004"), &HashMap::new());

        let first = client.resolve_and_fetch(&query).await.unwrap().unwrap();
        assert_eq!(first.series_id, "73739");
        // One search plus one episode fetch; empty cache meant no updates call
        assert_eq!(transport.request_count(), 2);

        let second = client.resolve_and_fetch(&query).await.unwrap().unwrap();
        assert_eq!(second.series_id, first.series_id);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_search_entry_is_evicted_before_first_read() {
        let transport = Arc::new(FakeTransport::new(vec![
            ("GetSeries.php", SEARCH_XML.to_string()),
            ("series/", SERIESDATA_XML.to_string()),
        ]));
        let cache = Arc::new(MemoryCache::default());
        // A search result from beyond the retention window; served as-is
        // it would yield zero candidates
        let stale = unix_now() - MAX_CACHE_AGE.as_secs() as i64 - 86_400;
        cache.seed("query_Lost.xml", b"<Data></Data>", stale);
        let mut client = TvdbClient::new(transport.clone(), cache.clone(), &test_config());

        let query = SeriesQuery::new("Lost", Some("2004"), &HashMap::new());
        let set = client.resolve_and_fetch(&query).await.unwrap().unwrap();
        assert_eq!(set.series_id, "73739");
        // The stale entry was evicted first, so the search hit the network
        assert_eq!(transport.request_count(), 2);
        assert!(cache.get("query_Lost.xml").is_some());
    }

    #[tokio::test]
    async fn test_no_updates_query_without_cache() {
        let transport = Arc::new(FakeTransport::new(vec![]));
        let cache = Arc::new(MemoryCache::default());
        let mut client = TvdbClient::new(transport.clone(), cache, &test_config());

        let updates = client.updates_since_last_cache().await;
        assert!(updates.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_updates_query_is_memoized() {
        let transport = Arc::new(FakeTransport::new(vec![(
            "Updates.php",
            UPDATES_XML.to_string(),
        )]));
        let cache = Arc::new(MemoryCache::default());
        cache.seed("seriesdata_1_Old.xml", b"<Data/>", unix_now() - 3600);
        let mut client = TvdbClient::new(transport.clone(), cache, &test_config());

        assert_eq!(client.updates_since_last_cache().await.len(), 2);
        assert_eq!(client.updates_since_last_cache().await.len(), 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_updated_series_invalidates_cache_entry() {
        let transport = Arc::new(FakeTransport::new(vec![
            ("Updates.php", UPDATES_XML.to_string()),
            ("series/", SERIESDATA_XML.to_string()),
        ]));
        let cache = Arc::new(MemoryCache::default());
        // Stale listing for a series the updates endpoint reports as changed
        cache.seed("seriesdata_73739_Lost.xml", b"<Data></Data>", unix_now() - 3600);
        let mut client = TvdbClient::new(transport.clone(), cache.clone(), &test_config());

        let set = client.fetch_episodes("73739", "Lost").await.unwrap();
        assert_eq!(set.episodes.len(), 2);
        // Updates query plus a refetch of the invalidated entry
        assert_eq!(transport.request_count(), 2);
        // Refetched body was persisted again
        assert!(cache.get("seriesdata_73739_Lost.xml").is_some());
    }

    #[tokio::test]
    async fn test_failed_updates_fetch_degrades_to_empty_set() {
        let transport = Arc::new(FakeTransport::new(vec![]));
        let cache = Arc::new(MemoryCache::default());
        cache.seed("seriesdata_1_Old.xml", b"<Data/>", unix_now() - 3600);
        let mut client = TvdbClient::new(transport.clone(), cache, &test_config());

        assert!(client.updates_since_last_cache().await.is_empty());
        // Memoized, never retried
        assert!(client.updates_since_last_cache().await.is_empty());
        assert_eq!(transport.request_count(), 1);
    }
}
