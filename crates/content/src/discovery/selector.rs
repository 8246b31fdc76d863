//! Release selection by display policy
//!
//! A pure function over a set of releases of one logical content item.
//! Recency is decided by release date first; date ties (and missing dates)
//! fall back to semantic-version comparison, descending. Release versions
//! in the wild are not reliably semver ("1.04", "v2.1"), so comparison
//! normalizes leniently instead of failing.

use semver::Version;
use std::cmp::Ordering;
use tracing::debug;

use crate::discovery::ContentSearchResult;

/// Which releases of an item are surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDisplayPolicy {
    /// The single best stable release, or nothing if none are stable
    LatestStableOnly,
    /// Everything, unfiltered
    AllVersions,
    /// The single most recent release, prerelease or not
    LatestIncludingPrereleases,
}

/// Parse a version string leniently for comparison purposes
///
/// Strips a leading 'v', pads missing components ("1.04" -> "1.4.0") and
/// falls back to 0.0.0 when nothing numeric can be extracted.
fn lenient_version(raw: &str) -> Version {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = Version::parse(trimmed) {
        return version;
    }

    let mut parts = trimmed
        .split(['.', '-', '+'])
        .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .map(|digits| digits.parse::<u64>().unwrap_or(0));

    Version::new(
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Most-recent-first ordering: release date, then semantic version
fn recency(a: &ContentSearchResult, b: &ContentSearchResult) -> Ordering {
    match (a.release_date, b.release_date) {
        (Some(da), Some(db)) if da != db => db.cmp(&da),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => lenient_version(&b.version).cmp(&lenient_version(&a.version)),
    }
}

fn most_recent(releases: Vec<ContentSearchResult>) -> Option<ContentSearchResult> {
    releases.into_iter().min_by(recency)
}

/// Select the releases to surface under a display policy
///
/// Empty input yields empty output for every policy. The match is
/// exhaustive: there is no silent default arm for a policy this function
/// does not understand.
pub fn select_releases(
    releases: Vec<ContentSearchResult>,
    policy: VersionDisplayPolicy,
) -> Vec<ContentSearchResult> {
    debug!(count = releases.len(), ?policy, "selecting releases");

    match policy {
        VersionDisplayPolicy::AllVersions => releases,
        VersionDisplayPolicy::LatestIncludingPrereleases => {
            most_recent(releases).into_iter().collect()
        }
        VersionDisplayPolicy::LatestStableOnly => {
            let stable: Vec<ContentSearchResult> = releases
                .into_iter()
                .filter(|r| !r.is_prerelease)
                .collect();

            let flagged: Vec<ContentSearchResult> =
                stable.iter().filter(|r| r.is_latest).cloned().collect();

            if flagged.is_empty() {
                most_recent(stable).into_iter().collect()
            } else {
                most_recent(flagged).into_iter().collect()
            }
        }
    }
}
