//! Classify an observed version against the stored one

use std::cmp::Ordering;

use crate::version::error::VersionError;
use crate::version::semver::{compare, parse_version};

/// Outcome of comparing a freshly observed version with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing changed
    Same,
    /// No version was stored before (initial import)
    FirstSeen,
    /// The candidate supersedes the stored version
    Newer,
    /// The candidate is older than the stored version
    Regression,
}

/// Compare `candidate` with `previous`.
///
/// An empty `previous` means no version has been stored yet. Without semantic
/// versioning any textual difference counts as [`Resolution::Newer`].
pub fn resolve(
    candidate: &str,
    previous: &str,
    semantic_versioning: bool,
) -> Result<Resolution, VersionError> {
    if candidate == previous {
        return Ok(Resolution::Same);
    }

    if semantic_versioning {
        let candidate_semver =
            parse_version(candidate).ok_or_else(|| VersionError::InvalidCandidate {
                version: candidate.to_string(),
            })?;

        if previous.is_empty() {
            return Ok(Resolution::FirstSeen);
        }

        let previous_semver =
            parse_version(previous).ok_or_else(|| VersionError::InvalidStored {
                version: previous.to_string(),
            })?;

        return Ok(match compare(&candidate_semver, &previous_semver) {
            Ordering::Greater => Resolution::Newer,
            Ordering::Less => Resolution::Regression,
            Ordering::Equal => Resolution::Same,
        });
    }

    if previous.is_empty() {
        Ok(Resolution::FirstSeen)
    } else {
        Ok(Resolution::Newer)
    }
}
