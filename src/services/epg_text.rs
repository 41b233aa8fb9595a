//! Season/episode extraction from EPG description text
//!
//! Many broadcasters embed the numbers directly in the description, e.g.
//! `"... Folge 12.Staffel 3. ..."`. The configured pattern locates the
//! block; the text from the match onward is split on `.` and the first
//! digit run of each field is taken to the end of the field. Field 0
//! holds the episode number and field 1 the season number — that order
//! matches the broadcast format and must not be swapped.

use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;

/// Digit run locating the numeric part of a field
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number regex"));

/// Numbers extracted from a description text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeNumbers {
    pub season: String,
    pub episode: String,
}

/// Parse season and episode numbers out of a description text.
///
/// Returns `Ok(None)` when the pattern does not occur or a field carries
/// no digits, and an error when the text after the pattern does not split
/// into at least two fields — the caller treats that as a failure of the
/// current record only.
pub fn parse(pattern: &Regex, text: &str) -> Result<Option<EpisodeNumbers>> {
    let Some(found) = pattern.find(text) else {
        return Ok(None);
    };

    let tail = &text[found.start()..];
    let fields: Vec<&str> = tail.split('.').collect();
    if fields.len() < 2 {
        bail!("description text after pattern splits into fewer than two fields: {tail:?}");
    }

    let episode = number_suffix(fields[0]);
    let season = number_suffix(fields[1]);

    match (season, episode) {
        (Some(season), Some(episode)) => Ok(Some(EpisodeNumbers {
            season: season.to_string(),
            episode: episode.to_string(),
        })),
        _ => Ok(None),
    }
}

/// Substring from the first digit of the field to its end. Trailing
/// non-digit characters are retained on purpose; the consumer stores the
/// value verbatim.
fn number_suffix(field: &str) -> Option<&str> {
    NUMBER_RE.find(field).map(|m| &field[m.start()..])
}
