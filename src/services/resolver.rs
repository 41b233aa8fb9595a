//! Series disambiguation
//!
//! A search for an EPG title regularly returns several series (remakes,
//! translations, same-name shows). The tie-break order is deliberate and
//! must stay exactly as it is: candidate count, then configured language,
//! then air year, first match wins. There is no arbitrary fallback pick;
//! an ambiguous result is treated as unresolved.

use tracing::debug;

use super::tvdb::{SeriesCandidate, SeriesQuery};

/// Pick the one series id the query refers to, or `None` when the
/// candidates cannot be disambiguated.
pub fn resolve(
    query: &SeriesQuery,
    candidates: &[SeriesCandidate],
    language: &str,
) -> Option<String> {
    match candidates {
        [] => None,
        [only] => Some(only.series_id.clone()),
        several => {
            debug!(
                count = several.len(),
                name = %query.name,
                "Several candidates found, resolving by language"
            );
            let by_language: Vec<&SeriesCandidate> = several
                .iter()
                .filter(|c| c.language.eq_ignore_ascii_case(language))
                .collect();

            match by_language.as_slice() {
                [] => {
                    debug!(name = %query.name, "No candidate with the configured language");
                    None
                }
                [only] => Some(only.series_id.clone()),
                ambiguous => {
                    debug!(
                        count = ambiguous.len(),
                        name = %query.name,
                        "Several candidates share the language, resolving by air year"
                    );
                    let year = query.air_year.as_deref()?;
                    ambiguous
                        .iter()
                        .find(|c| {
                            c.first_aired
                                .get(..4)
                                .is_some_and(|aired| aired.eq_ignore_ascii_case(year))
                        })
                        .map(|c| c.series_id.clone())
                }
            }
        }
    }
}
