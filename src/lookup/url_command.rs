//! Ordered text transforms that turn fetched content into a version string

use regex::Regex;
use tracing::debug;

use crate::config::UrlCommandConfig;
use crate::lookup::error::UrlCommandError;

/// A single compiled pipeline step
#[derive(Debug, Clone)]
pub enum UrlCommand {
    /// Take capture group 1 (or the whole match when the regex has no groups)
    /// of the `index`-th non-overlapping match
    Regex {
        regex: Regex,
        index: i64,
        template: Option<String>,
        ignore_failure: bool,
    },
    Split {
        text: String,
        index: i64,
        ignore_failure: bool,
    },
    Replace {
        old: String,
        new: String,
        ignore_failure: bool,
    },
}

impl UrlCommand {
    pub fn from_config(config: &UrlCommandConfig) -> Result<Self, String> {
        Ok(match config {
            UrlCommandConfig::Regex {
                regex,
                index,
                template,
                ignore_failure,
            } => UrlCommand::Regex {
                regex: Regex::new(regex).map_err(|e| format!("invalid regex {:?}: {}", regex, e))?,
                index: *index,
                template: template.clone(),
                ignore_failure: *ignore_failure,
            },
            UrlCommandConfig::Split {
                text,
                index,
                ignore_failure,
            } => {
                if text.is_empty() {
                    return Err("split text must not be empty".to_string());
                }
                UrlCommand::Split {
                    text: text.clone(),
                    index: *index,
                    ignore_failure: *ignore_failure,
                }
            }
            UrlCommandConfig::Replace {
                old,
                new,
                ignore_failure,
            } => {
                if old.is_empty() {
                    return Err("replace old must not be empty".to_string());
                }
                UrlCommand::Replace {
                    old: old.clone(),
                    new: new.clone(),
                    ignore_failure: *ignore_failure,
                }
            }
        })
    }

    fn ignore_failure(&self) -> bool {
        match self {
            UrlCommand::Regex { ignore_failure, .. }
            | UrlCommand::Split { ignore_failure, .. }
            | UrlCommand::Replace { ignore_failure, .. } => *ignore_failure,
        }
    }

    fn apply(&self, step: usize, input: &str) -> Result<String, UrlCommandError> {
        match self {
            UrlCommand::Regex {
                regex,
                index,
                template,
                ..
            } => {
                let matches: Vec<_> = regex.captures_iter(input).collect();
                if matches.is_empty() {
                    return Err(UrlCommandError::RegexNoMatch {
                        step,
                        regex: regex.to_string(),
                        input: input.to_string(),
                    });
                }
                let captures = resolve_index(*index, matches.len())
                    .map(|i| &matches[i])
                    .ok_or_else(|| UrlCommandError::RegexIndexOutOfRange {
                        step,
                        regex: regex.to_string(),
                        index: *index,
                        matches: matches.len(),
                        input: input.to_string(),
                    })?;

                Ok(match template {
                    Some(template) => {
                        let mut out = String::new();
                        captures.expand(template, &mut out);
                        out
                    }
                    None if regex.captures_len() > 1 => captures
                        .get(1)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    None => captures[0].to_string(),
                })
            }
            UrlCommand::Split { text, index, .. } => {
                let parts: Vec<&str> = input.split(text.as_str()).collect();
                resolve_index(*index, parts.len())
                    .map(|i| parts[i].to_string())
                    .ok_or_else(|| UrlCommandError::SplitIndexOutOfRange {
                        step,
                        text: text.clone(),
                        index: *index,
                        parts: parts.len(),
                        input: input.to_string(),
                    })
            }
            UrlCommand::Replace { old, new, .. } => Ok(input.replace(old.as_str(), new)),
        }
    }
}

/// Map a possibly negative index onto `0..len`
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Run every step in order, each consuming the previous step's output
pub fn run(commands: &[UrlCommand], input: &str) -> Result<String, UrlCommandError> {
    let mut text = input.to_string();
    for (step, command) in commands.iter().enumerate() {
        match command.apply(step, &text) {
            Ok(output) => text = output,
            Err(e) if command.ignore_failure() => {
                debug!("Ignoring failed url_command: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn regex(pattern: &str, index: i64) -> UrlCommand {
        UrlCommand::Regex {
            regex: Regex::new(pattern).unwrap(),
            index,
            template: None,
            ignore_failure: false,
        }
    }

    fn split(text: &str, index: i64) -> UrlCommand {
        UrlCommand::Split {
            text: text.to_string(),
            index,
            ignore_failure: false,
        }
    }

    #[rstest]
    #[case(r"v([0-9.]+)", 0, "v1.0.0 v1.1.0 v2.0.0", "1.0.0")]
    #[case(r"v([0-9.]+)", 1, "v1.0.0 v1.1.0 v2.0.0", "1.1.0")]
    #[case(r"v([0-9.]+)", -1, "v1.0.0 v1.1.0 v2.0.0", "2.0.0")]
    #[case(r"v[0-9.]+", 0, "tag v3.2.1!", "v3.2.1")]
    fn run_regex_extracts_requested_occurrence(
        #[case] pattern: &str,
        #[case] index: i64,
        #[case] input: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(run(&[regex(pattern, index)], input).unwrap(), expected);
    }

    #[test]
    fn run_regex_expands_template() {
        let command = UrlCommand::Regex {
            regex: Regex::new(r"(\d+)_(\d+)").unwrap(),
            index: 0,
            template: Some("$1.$2.0".to_string()),
            ignore_failure: false,
        };
        assert_eq!(run(&[command], "release-1_24").unwrap(), "1.24.0");
    }

    #[test]
    fn run_regex_without_match_names_step_and_input() {
        let commands = [split(" ", 0), regex(r"v([0-9.]+)", 0)];
        let err = run(&commands, "release 1.0").unwrap_err();

        assert_eq!(
            err,
            UrlCommandError::RegexNoMatch {
                step: 1,
                regex: r"v([0-9.]+)".to_string(),
                input: "release".to_string(),
            }
        );
    }

    #[test]
    fn run_regex_index_out_of_range_is_error() {
        let err = run(&[regex(r"\d", 3)], "1 2").unwrap_err();
        assert!(matches!(
            err,
            UrlCommandError::RegexIndexOutOfRange { matches: 2, .. }
        ));
    }

    #[test]
    fn run_ignored_failure_passes_input_through() {
        let commands = [
            UrlCommand::Regex {
                regex: Regex::new("nomatch").unwrap(),
                index: 0,
                template: None,
                ignore_failure: true,
            },
            UrlCommand::Split {
                text: "-".to_string(),
                index: 9,
                ignore_failure: true,
            },
        ];
        assert_eq!(run(&commands, "1.2.3-beta").unwrap(), "1.2.3-beta");
    }

    #[rstest]
    #[case("a/b/c", "/", 0, "a")]
    #[case("a/b/c", "/", -1, "c")]
    #[case("a/b/c", "/", -3, "a")]
    #[case("abc", "/", 0, "abc")]
    fn run_split_selects_part(
        #[case] input: &str,
        #[case] text: &str,
        #[case] index: i64,
        #[case] expected: &str,
    ) {
        assert_eq!(run(&[split(text, index)], input).unwrap(), expected);
    }

    #[rstest]
    #[case(3)]
    #[case(-4)]
    fn run_split_out_of_range_is_error(#[case] index: i64) {
        let err = run(&[split("/", index)], "a/b/c").unwrap_err();
        assert!(matches!(
            err,
            UrlCommandError::SplitIndexOutOfRange { parts: 3, .. }
        ));
    }

    #[test]
    fn run_replace_substitutes_every_occurrence() {
        let command = UrlCommand::Replace {
            old: "_".to_string(),
            new: ".".to_string(),
            ignore_failure: false,
        };
        assert_eq!(run(&[command], "1_2_3").unwrap(), "1.2.3");
    }

    #[rstest]
    #[case("")]
    #[case("v1.2.3")]
    #[case("  some <html> body\n")]
    fn run_empty_pipeline_is_idempotent(#[case] input: &str) {
        let once = run(&[], input).unwrap();
        let twice = run(&[], &once).unwrap();
        assert_eq!(once, input);
        assert_eq!(twice, once);
    }

    #[test]
    fn from_config_rejects_invalid_regex() {
        let config = UrlCommandConfig::Regex {
            regex: "([".to_string(),
            index: 0,
            template: None,
            ignore_failure: false,
        };
        assert!(UrlCommand::from_config(&config).is_err());
    }
}
