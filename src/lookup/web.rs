//! Generic URL lookup: one fetch, one pipeline pass

use indexmap::IndexMap;
use tracing::warn;

use crate::config::BasicAuth;
use crate::context::Context;
use crate::lookup::error::LookupError;
use crate::lookup::require::Require;
use crate::lookup::url_command::{self, UrlCommand};

#[derive(Debug)]
pub struct UrlLookup {
    pub(crate) url: String,
    pub(crate) allow_invalid_certs: bool,
    pub(crate) headers: IndexMap<String, String>,
    pub(crate) basic_auth: Option<BasicAuth>,
    /// Dotted path selecting a value from a JSON body
    pub(crate) json: Option<String>,
    pub(crate) url_commands: Vec<UrlCommand>,
    pub(crate) require: Require,
}

impl UrlLookup {
    pub fn check_values(&self) -> Vec<String> {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            Vec::new()
        } else {
            vec![format!("url: {:?} is not an http(s) URL", self.url)]
        }
    }

    pub async fn query(&self, ctx: &Context) -> Result<String, LookupError> {
        let mut request = ctx.client(self.allow_invalid_certs).get(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(self.url.clone()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LookupError::Unauthorized);
        }
        if !status.is_success() {
            warn!("{} returned status {}", self.url, status);
            return Err(LookupError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }
        Ok(response.text().await?)
    }

    /// Select, transform and gate the version found in `body`
    pub fn select_version(&self, body: &str) -> Result<String, LookupError> {
        let text = match &self.json {
            Some(path) => select_json(body, path)?,
            None => body.to_string(),
        };

        let version = url_command::run(&self.url_commands, &text)?
            .trim()
            .to_string();
        if version.is_empty() {
            return Err(LookupError::InvalidResponse(format!(
                "no version found on {}",
                self.url
            )));
        }

        self.require.check_version(&version)?;
        self.require.check_content(&version, body)?;
        Ok(version)
    }
}

/// Walk `path` (`a.b.0.c`) through a JSON document and render the leaf as text
fn select_json(body: &str, path: &str) -> Result<String, LookupError> {
    let root: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| LookupError::InvalidResponse(format!("invalid JSON: {}", e)))?;

    let mut value = &root;
    for key in path.split('.') {
        let next = match value {
            serde_json::Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(key),
        };
        value = next.ok_or_else(|| {
            LookupError::InvalidResponse(format!("JSON key {:?} not found (in {:?})", key, path))
        })?;
    }

    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(LookupError::InvalidResponse(format!(
            "JSON value at {:?} is not a string or number: {}",
            path, other
        ))),
    }
}
