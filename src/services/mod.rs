//! Resolution services

pub mod backup;
pub mod cache;
pub mod epg_text;
pub mod matcher;
pub mod resolver;
pub mod scanner;
pub mod tvdb;

pub use backup::BackupService;
pub use cache::{CacheStore, FileCache, MAX_CACHE_AGE};
pub use scanner::{ScanService, ScanStats};
pub use tvdb::{
    EpisodeInformation, HttpTransport, SeriesCandidate, SeriesEpisodeSet, SeriesQuery,
    TvdbClient, TvdbTransport, UpdateSet,
};
