use std::error::Error as _;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlCommandError {
    #[error("url_commands[{step}] regex {regex:?} didn't return any matches on {input:?}")]
    RegexNoMatch {
        step: usize,
        regex: String,
        input: String,
    },

    #[error(
        "url_commands[{step}] regex {regex:?} returned {matches} matches on {input:?}, \
         but index {index} was requested"
    )]
    RegexIndexOutOfRange {
        step: usize,
        regex: String,
        index: i64,
        matches: usize,
        input: String,
    },

    #[error(
        "url_commands[{step}] split on {text:?} returned {parts} parts on {input:?}, \
         but index {index} was requested"
    )]
    SplitIndexOutOfRange {
        step: usize,
        text: String,
        index: i64,
        parts: usize,
        input: String,
    },
}

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("registry request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("registry authentication failed for {image}: {message}")]
    Auth { image: String, message: String },

    #[error("{image}:{tag} not found")]
    TagNotFound { image: String, tag: String },

    #[error("unexpected registry response for {image}:{tag}: status {status}")]
    UnexpectedStatus {
        image: String,
        tag: String,
        status: u16,
    },
}

#[derive(Debug, Error)]
pub enum RequireError {
    #[error("regex_version {regex:?} not matched on version {version:?}")]
    VersionRegex { regex: String, version: String },

    #[error("regex_content {regex:?} not matched on content for version {version:?}")]
    ContentRegex { regex: String, version: String },

    #[error("command {command:?} failed: {message}")]
    Command { command: String, message: String },

    #[error("docker tag check failed: {0}")]
    Docker(#[from] DockerError),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("certificate error (set allow_invalid_certs to skip verification): {0}")]
    Certificate(#[source] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Unauthorized: check the access_token")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    UrlCommand(#[from] UrlCommandError),

    #[error(transparent)]
    Require(#[from] RequireError),

    #[error(
        "no releases were found matching the url_commands and/or require \
         ({version_misses} failed regex_version, {content_misses} failed regex_content)"
    )]
    NoReleasesMatched {
        version_misses: usize,
        content_misses: usize,
    },
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if is_certificate_error(&err) {
            LookupError::Certificate(err)
        } else {
            LookupError::Network(err)
        }
    }
}

impl LookupError {
    /// Errors that are expected to clear up by themselves on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LookupError::Network(_) | LookupError::Certificate(_) | LookupError::RateLimited { .. }
        )
    }

    /// Whether this failure came from `regex_version` and/or `regex_content`
    pub fn regex_misses(&self) -> (bool, bool) {
        match self {
            LookupError::Require(RequireError::VersionRegex { .. }) => (true, false),
            LookupError::Require(RequireError::ContentRegex { .. }) => (false, true),
            LookupError::NoReleasesMatched {
                version_misses,
                content_misses,
            } => (*version_misses > 0, *content_misses > 0),
            _ => (false, false),
        }
    }
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if inner.to_string().to_lowercase().contains("certificate") {
            return true;
        }
        source = inner.source();
    }
    false
}
