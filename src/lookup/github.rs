//! GitHub Releases API lookup

use std::sync::Mutex;

use semver::Version;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::Context;
use crate::lookup::error::LookupError;
use crate::lookup::require::Require;
use crate::lookup::url_command::{self, UrlCommand};
use crate::version::semver::parse_version;
use crate::version::sort::insert_descending;

/// Default base URL for GitHub API
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Release entry from the GitHub Releases API
#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    browser_download_url: String,
}

/// A release that survived the url_commands and regex_version filters
#[derive(Debug)]
struct Candidate {
    version: String,
    /// Asset download URLs, one per line; what regex_content is matched against
    assets: String,
}

#[derive(Debug, Clone)]
struct CachedReleases {
    etag: String,
    body: String,
}

#[derive(Debug)]
pub struct GitHubLookup {
    /// `owner/repo`
    pub(crate) repo: String,
    pub(crate) access_token: Option<String>,
    pub(crate) allow_invalid_certs: bool,
    pub(crate) use_prerelease: bool,
    pub(crate) url_commands: Vec<UrlCommand>,
    pub(crate) require: Require,
    cache: Mutex<Option<CachedReleases>>,
}

impl GitHubLookup {
    pub fn new(
        repo: String,
        access_token: Option<String>,
        allow_invalid_certs: bool,
        use_prerelease: bool,
        url_commands: Vec<UrlCommand>,
        require: Require,
    ) -> Self {
        Self {
            repo,
            access_token,
            allow_invalid_certs,
            use_prerelease,
            url_commands,
            require,
            cache: Mutex::new(None),
        }
    }

    pub fn check_values(&self) -> Vec<String> {
        let parts: Vec<&str> = self.repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            vec![format!("url: {:?} should be in the form 'owner/repo'", self.repo)]
        } else {
            Vec::new()
        }
    }

    /// Fetch the raw release list, reusing the previous body on `304 Not Modified`
    pub async fn query(&self, ctx: &Context) -> Result<String, LookupError> {
        let url = format!("{}/repos/{}/releases", ctx.github_api(), self.repo);
        let cached = self.cached();

        let mut request = ctx
            .client(self.allow_invalid_certs)
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("token {}", token));
        }
        if let Some(cached) = &cached {
            request = request.header("If-None-Match", cached.etag.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_MODIFIED {
            if let Some(cached) = cached {
                debug!("{} releases not modified", self.repo);
                return Ok(cached.body);
            }
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(self.repo.clone()));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LookupError::Unauthorized);
        }

        let rate_limit_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN && rate_limit_exhausted)
        {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .or_else(|| {
                    response
                        .headers()
                        .get("x-ratelimit-reset")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<i64>().ok())
                        .map(|reset| (reset - chrono::Utc::now().timestamp()).max(0) as u64)
                });
            return Err(LookupError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            warn!("GitHub API returned status {}: {}", status, url);
            return Err(LookupError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        if let Some(etag) = etag {
            self.store(CachedReleases {
                etag,
                body: body.clone(),
            });
        }
        Ok(body)
    }

    /// Pick the newest release passing url_commands and every regex Require
    pub fn select_version(
        &self,
        body: &str,
        semantic_versioning: bool,
    ) -> Result<String, LookupError> {
        let releases: Vec<Release> = serde_json::from_str(body).map_err(|e| {
            warn!("Failed to parse GitHub releases response: {}", e);
            LookupError::InvalidResponse(e.to_string())
        })?;

        let mut version_misses = 0;
        let mut content_misses = 0;
        let mut sorted: Vec<(Version, Candidate)> = Vec::new();
        let mut unsorted: Vec<Candidate> = Vec::new();

        for release in releases {
            if release.draft || (release.prerelease && !self.use_prerelease) {
                continue;
            }

            let version = match url_command::run(&self.url_commands, &release.tag_name) {
                Ok(version) => version,
                Err(e) => {
                    debug!("Skipping release {:?}: {}", release.tag_name, e);
                    continue;
                }
            };
            if let Err(e) = self.require.check_version(&version) {
                debug!("Skipping release {:?}: {}", release.tag_name, e);
                version_misses += 1;
                continue;
            }

            let candidate = Candidate {
                assets: release
                    .assets
                    .iter()
                    .map(|a| a.browser_download_url.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                version,
            };
            if !semantic_versioning {
                unsorted.push(candidate);
                continue;
            }
            match parse_version(&candidate.version) {
                Some(parsed) => insert_descending(&mut sorted, (parsed, candidate), |(v, _)| v),
                None => debug!(
                    "Skipping release {:?}: {:?} is not a semantic version",
                    release.tag_name, candidate.version
                ),
            }
        }

        let ordered = if semantic_versioning {
            sorted.into_iter().map(|(_, c)| c).collect()
        } else {
            unsorted
        };

        for candidate in ordered {
            match self.require.check_content(&candidate.version, &candidate.assets) {
                Ok(()) => return Ok(candidate.version),
                Err(e) => {
                    debug!("Skipping release {:?}: {}", candidate.version, e);
                    content_misses += 1;
                }
            }
        }

        Err(LookupError::NoReleasesMatched {
            version_misses,
            content_misses,
        })
    }

    fn cached(&self) -> Option<CachedReleases> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, releases: CachedReleases) {
        *self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(releases);
    }
}
