//! Post-extraction gates a candidate version must pass

use std::time::Duration;

use regex::Regex;

use crate::config::{COMMAND_TIMEOUT_MS, RequireConfig};
use crate::lookup::docker::{DockerCheck, RegistryEndpoints};
use crate::lookup::error::RequireError;
use crate::process;
use crate::template::render_version;

#[derive(Debug, Default)]
pub struct Require {
    regex_version: Option<Regex>,
    /// Kept as source text: `{{ version }}` is substituted before compiling
    regex_content: Option<String>,
    command: Vec<String>,
    docker: Option<DockerCheck>,
}

impl Require {
    pub fn from_config(config: &RequireConfig) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();

        let regex_version = match config.regex_version.as_deref().map(Regex::new) {
            Some(Ok(regex)) => Some(regex),
            Some(Err(e)) => {
                problems.push(format!("regex_version: invalid regex: {}", e));
                None
            }
            None => None,
        };

        if let Some(pattern) = &config.regex_content {
            if let Err(e) = Regex::new(&render_version(pattern, "0.0.0")) {
                problems.push(format!("regex_content: invalid regex: {}", e));
            }
        }

        let docker = match config.docker.as_ref().map(DockerCheck::from_config) {
            Some(Ok(check)) => Some(check),
            Some(Err(errs)) => {
                problems.extend(errs.into_iter().map(|e| format!("docker.{}", e)));
                None
            }
            None => None,
        };

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Self {
            regex_version,
            regex_content: config.regex_content.clone(),
            command: config.command.clone(),
            docker,
        })
    }

    /// The version must match `regex_version`
    pub fn check_version(&self, version: &str) -> Result<(), RequireError> {
        match &self.regex_version {
            Some(regex) if !regex.is_match(version) => Err(RequireError::VersionRegex {
                regex: regex.to_string(),
                version: version.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// `body` must match `regex_content` with the version substituted in
    pub fn check_content(&self, version: &str, body: &str) -> Result<(), RequireError> {
        let Some(pattern) = &self.regex_content else {
            return Ok(());
        };
        let rendered = render_version(pattern, &regex::escape(version));
        let matched = Regex::new(&rendered)
            .map(|regex| regex.is_match(body))
            .unwrap_or(false);
        if matched {
            Ok(())
        } else {
            Err(RequireError::ContentRegex {
                regex: rendered.to_string(),
                version: version.to_string(),
            })
        }
    }

    /// The configured command must exit successfully
    pub async fn check_command(&self, version: &str) -> Result<(), RequireError> {
        if self.command.is_empty() {
            return Ok(());
        }
        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| render_version(arg, version).into_owned())
            .collect();
        process::run(&args, Duration::from_millis(COMMAND_TIMEOUT_MS))
            .await
            .map(|_| ())
            .map_err(|e| RequireError::Command {
                command: args.join(" "),
                message: e.to_string(),
            })
    }

    /// The configured `image:tag` must exist in its registry
    pub async fn check_docker(
        &self,
        client: &reqwest::Client,
        endpoints: &RegistryEndpoints,
        version: &str,
    ) -> Result<(), RequireError> {
        match &self.docker {
            Some(check) => Ok(check.check(client, endpoints, version).await?),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn require(regex_version: Option<&str>, regex_content: Option<&str>) -> Require {
        Require::from_config(&RequireConfig {
            regex_version: regex_version.map(str::to_string),
            regex_content: regex_content.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn check_version_passes_without_regex() {
        assert!(Require::default().check_version("anything").is_ok());
    }

    #[test]
    fn check_version_rejects_non_matching_version() {
        let require = require(Some(r"^\d+\.\d+\.\d+$"), None);

        assert!(require.check_version("1.2.3").is_ok());
        assert!(matches!(
            require.check_version("1.2.3-rc1"),
            Err(RequireError::VersionRegex { .. })
        ));
    }

    #[test]
    fn check_content_substitutes_escaped_version() {
        let require = require(None, Some(r"argus-{{ version }}\.linux-amd64"));
        let body = "https://example.com/argus-1.2.3.linux-amd64";

        assert!(require.check_content("1.2.3", body).is_ok());
        // `.` in the version must not act as a wildcard
        assert!(
            require
                .check_content("1.2.3", "https://example.com/argus-1x2x3.linux-amd64")
                .is_err()
        );
        assert!(matches!(
            require.check_content("1.2.4", body),
            Err(RequireError::ContentRegex { .. })
        ));
    }

    #[test]
    fn from_config_collects_every_problem() {
        let result = Require::from_config(&RequireConfig {
            regex_version: Some("([".to_string()),
            regex_content: Some("{{ version }}(".to_string()),
            ..Default::default()
        });
        assert_eq!(result.unwrap_err().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_command_renders_version_and_checks_exit() {
        let require = Require::from_config(&RequireConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "test {{ version }} = 1.0.0".to_string(),
            ],
            ..Default::default()
        })
        .unwrap();

        assert!(require.check_command("1.0.0").await.is_ok());
        assert!(matches!(
            require.check_command("2.0.0").await,
            Err(RequireError::Command { .. })
        ));
    }
}
