//! EPG scan engine
//!
//! Walks the candidate rows of the EPG table strictly in order. For each
//! row the description text is parsed first (unless the title is marked
//! online-only); when that yields nothing and online search is permitted,
//! the series is resolved remotely and the episode matched by name.
//! The first successful method wins; rows where both fail stay
//! unresolved.
//!
//! Rows are ordered by title, so one remote resolution serves a whole
//! run of identical consecutive titles. A title that reappears later in
//! the stream is resolved again — an accepted inefficiency, and tests
//! observe the resulting network-call counts, so it must not be
//! "optimized" away.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::epg_text;
use super::matcher;
use super::tvdb::{SeriesEpisodeSet, SeriesQuery, TvdbClient};
use crate::config::Config;
use crate::db::{EpgStore, ProgramRecord};

/// Counters reported after a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: u64,
    pub resolved_offline: u64,
    pub resolved_online: u64,
    pub unresolved: u64,
}

/// One full batch pass over the EPG candidate rows
pub struct ScanService<'a> {
    store: &'a dyn EpgStore,
    client: TvdbClient,
    config: &'a Config,
}

/// Remote state for the current run of identical titles. `episodes` is
/// `None` when resolution failed; the failure is not retried within the
/// run.
struct TitleRun {
    title: String,
    episodes: Option<SeriesEpisodeSet>,
    rows: u64,
    mapped: u64,
}

impl<'a> ScanService<'a> {
    pub fn new(store: &'a dyn EpgStore, client: TvdbClient, config: &'a Config) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Run the scan over every candidate row
    pub async fn run(&mut self) -> Result<ScanStats> {
        let pattern = Regex::new(&self.config.description_pattern)
            .context("Invalid EPG_DESCRIPTION_PATTERN")?;

        let total = self
            .store
            .count_candidates(&self.config.series_indicator)
            .await?;
        let rows = self
            .store
            .fetch_candidates(&self.config.series_indicator)
            .await?;
        info!(total = total, "Beginning scan of EPG rows");

        let started = Utc::now();
        let mut stats = ScanStats::default();
        let mut run: Option<TitleRun> = None;

        for row in &rows {
            stats.scanned += 1;
            info!(
                title = %row.title,
                episode = %row.episode_name,
                "Beginning search"
            );

            let mut found = false;

            if !self.config.is_online_only(&row.title) {
                match epg_text::parse(&pattern, &row.description) {
                    Ok(Some(numbers)) => {
                        info!(
                            season = %numbers.season,
                            episode = %numbers.episode,
                            "Found numbers in description text"
                        );
                        found = self
                            .write_numbers(row, &numbers.season, &numbers.episode)
                            .await;
                        if found {
                            stats.resolved_offline += 1;
                        }
                    }
                    Ok(None) => {
                        debug!(
                            title = %row.title,
                            "No numbers in description text"
                        );
                    }
                    Err(e) => {
                        // Structural failure of this record's description;
                        // the row stays unresolved and the batch continues
                        error!(
                            title = %row.title,
                            episode = %row.episode_name,
                            error = %e,
                            "Failed to parse description text"
                        );
                        stats.unresolved += 1;
                        self.log_progress(stats.scanned, total, started);
                        continue;
                    }
                }
            } else {
                warn!(
                    title = %row.title,
                    "Skipped description text search, series is marked online-only"
                );
            }

            if !found && !self.config.offline {
                if !self.config.is_offline_only(&row.title) {
                    let current = self.enter_title_run(&mut run, row).await;
                    current.rows += 1;

                    if let Some(set) = current.episodes.as_ref()
                        && let Some(episode) = matcher::match_episode(
                            &set.episodes,
                            &row.episode_name,
                            &self.config.episode_substitutions,
                        )
                    {
                        let season = episode.season_number.clone();
                        let number = episode.episode_number.clone();
                        info!(
                            season = %season,
                            episode = %number,
                            name = %episode.episode_name,
                            program_id = row.program_id,
                            "Mapped episode number"
                        );
                        found = self.write_numbers(row, &season, &number).await;
                        if found {
                            stats.resolved_online += 1;
                            current.mapped += 1;
                        }
                    }
                } else {
                    warn!(
                        title = %row.title,
                        "Skipped online search, series is marked offline-only"
                    );
                }
            }

            if !found {
                debug!(
                    title = %row.title,
                    episode = %row.episode_name,
                    "No season and episode number found"
                );
                stats.unresolved += 1;
            }

            self.log_progress(stats.scanned, total, started);
        }

        if let Some(finished) = run.take() {
            log_run_summary(&finished);
        }

        let minutes = (Utc::now() - started).num_seconds() as f64 / 60.0;
        info!(
            scanned = stats.scanned,
            offline = stats.resolved_offline,
            online = stats.resolved_online,
            unresolved = stats.unresolved,
            minutes = format!("{minutes:.1}"),
            "Scan finished"
        );
        Ok(stats)
    }

    /// Make sure the title-run state belongs to this row's title,
    /// resolving the series remotely when a new run starts.
    async fn enter_title_run<'r>(
        &mut self,
        run: &'r mut Option<TitleRun>,
        row: &ProgramRecord,
    ) -> &'r mut TitleRun {
        let changed = run
            .as_ref()
            .map(|r| !r.title.eq_ignore_ascii_case(&row.title))
            .unwrap_or(true);

        if changed {
            if let Some(finished) = run.take() {
                log_run_summary(&finished);
            }
            info!(title = %row.title, "Processing new series");

            let air_year = row.original_air_date.get(..4);
            let query =
                SeriesQuery::new(&row.title, air_year, &self.config.series_substitutions);

            let episodes = match self.client.resolve_and_fetch(&query).await {
                Ok(Some(set)) => {
                    debug!(
                        series = %set.series_name,
                        episodes = set.episodes.len(),
                        "Fetched episode data"
                    );
                    Some(set)
                }
                Ok(None) => {
                    warn!(title = %row.title, "Could not resolve series");
                    None
                }
                Err(e) => {
                    // Recoverable: this series run degrades to "no data"
                    warn!(title = %row.title, error = %e, "Could not fetch series data");
                    None
                }
            };

            *run = Some(TitleRun {
                title: row.title.clone(),
                episodes,
                rows: 0,
                mapped: 0,
            });
        }

        run.get_or_insert_with(|| TitleRun {
            title: row.title.clone(),
            episodes: None,
            rows: 0,
            mapped: 0,
        })
    }

    /// Write resolved numbers back; a failed update leaves the row
    /// unresolved and the batch continues
    async fn write_numbers(&self, row: &ProgramRecord, season: &str, episode: &str) -> bool {
        match self
            .store
            .update_episode_numbers(row.program_id, season, episode)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    program_id = row.program_id,
                    error = %e,
                    "Failed to update episode numbers"
                );
                false
            }
        }
    }

    fn log_progress(&self, scanned: u64, total: i64, started: chrono::DateTime<Utc>) {
        if scanned % 100 != 0 && scanned as i64 != total {
            return;
        }
        let percent = if total > 0 {
            scanned as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        let elapsed = (Utc::now() - started).num_milliseconds() as f64;
        let remaining_minutes = if scanned > 0 && total > 0 {
            (elapsed / scanned as f64 * total as f64 - elapsed) / 1000.0 / 60.0
        } else {
            0.0
        };
        info!(
            percent = format!("{percent:.1}"),
            remaining_minutes = format!("{remaining_minutes:.1}"),
            "Scan progress"
        );
    }
}

fn log_run_summary(run: &TitleRun) {
    info!(
        title = %run.title,
        mapped = run.mapped,
        rows = run.rows,
        "Completed series"
    );
}
