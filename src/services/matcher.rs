//! Episode matching by name
//!
//! The remote episode list is not guaranteed unique by name, so the scan
//! order of the listing decides which episode wins.

use std::collections::HashMap;

use tracing::debug;

use super::tvdb::EpisodeInformation;

/// Find the first episode whose name equals the recorded episode name,
/// case-insensitively. An episode-name substitution (exact lookup by the
/// raw EPG name) is applied before comparison.
pub fn match_episode<'a>(
    episodes: &'a [EpisodeInformation],
    episode_name: &str,
    substitutions: &HashMap<String, String>,
) -> Option<&'a EpisodeInformation> {
    let target = match substitutions.get(episode_name) {
        Some(substitute) => {
            debug!(
                raw = %episode_name,
                substitute = %substitute,
                "Using substitution for episode name"
            );
            substitute.as_str()
        }
        None => episode_name,
    };

    let target = target.to_lowercase();
    episodes
        .iter()
        .find(|e| e.episode_name.to_lowercase() == target)
}
