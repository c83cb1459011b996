//! Notifications sent on new releases and on action failures
//!
//! Provider wire formats are out of scope: every notification goes through
//! [`NotifySender`], with [`HttpNotifier`] posting a generic JSON body.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::action::error::{ActionError, NotifyError};
use crate::action::retry::{Runnable, run_with_retries};
use crate::config::NotifyConfig;
use crate::config::defaults::{
    DEFAULT_NOTIFY_DELAY, DEFAULT_NOTIFY_MAX_TRIES, DEFAULT_NOTIFY_MESSAGE, DEFAULT_NOTIFY_TITLE,
    Tiers,
};
use crate::config::duration::parse_duration;
use crate::context::Context;
use crate::template::{TemplateVars, render};

/// Rendered notification content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub title: String,
    pub message: String,
}

/// Delivery of one rendered message to one endpoint
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotifySender: Send + Sync {
    async fn send(
        &self,
        url: &str,
        headers: &IndexMap<String, String>,
        message: &Message,
    ) -> Result<(), NotifyError>;
}

/// Posts `{"title": ..., "message": ...}` as JSON
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotifySender for HttpNotifier {
    async fn send(
        &self,
        url: &str,
        headers: &IndexMap<String, String>,
        message: &Message,
    ) -> Result<(), NotifyError> {
        let mut request = self.client.post(url).json(message);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(response.status().as_u16()))
        }
    }
}

#[derive(Debug)]
pub struct Notify {
    id: String,
    url: String,
    custom_headers: IndexMap<String, String>,
    title: String,
    message: String,
    delay: Duration,
    max_tries: u32,
    runnable: Runnable,
}

impl Notify {
    pub fn from_config(
        id: &str,
        explicit: &NotifyConfig,
        main: Option<&NotifyConfig>,
        class: &NotifyConfig,
    ) -> Result<Self, Vec<String>> {
        let tiers = Tiers::new(Some(explicit), main, Some(class));
        let mut problems = Vec::new();

        let url = tiers.get(|c| &c.url).unwrap_or_default();
        if url.is_empty() {
            problems.push("url: required".to_string());
        }
        let delay = parse_duration(&tiers.get_or(|c| &c.delay, DEFAULT_NOTIFY_DELAY.to_string()))
            .unwrap_or_else(|e| {
                problems.push(format!("delay: {}", e));
                Duration::ZERO
            });

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Self {
            id: id.to_string(),
            url,
            custom_headers: tiers.get(|c| &c.custom_headers).unwrap_or_default(),
            title: tiers.get_or(|c| &c.title, DEFAULT_NOTIFY_TITLE.to_string()),
            message: tiers.get_or(|c| &c.message, DEFAULT_NOTIFY_MESSAGE.to_string()),
            delay,
            max_tries: tiers.get_or(|c| &c.max_tries, DEFAULT_NOTIFY_MAX_TRIES),
            runnable: Runnable::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Render the configured templates; `message` overrides the message template
    pub fn render(&self, vars: &TemplateVars<'_>, message: Option<&str>) -> Message {
        Message {
            title: render(&self.title, vars).into_owned(),
            message: match message {
                Some(message) => message.to_string(),
                None => render(&self.message, vars).into_owned(),
            },
        }
    }

    pub async fn send(
        &self,
        ctx: &Context,
        sender: &dyn NotifySender,
        vars: &TemplateVars<'_>,
        message: Option<&str>,
    ) -> Result<(), ActionError> {
        let rendered = self.render(vars, message);
        let url = render(&self.url, vars).into_owned();
        let label = format!("{}, notify {}", vars.service_id, self.id);
        let timing = ctx.timing();

        run_with_retries(
            &label,
            &self.runnable,
            self.delay,
            self.max_tries,
            timing.retry_gap,
            timing.fail_stagger,
            || {
                let (url, headers, rendered) = (&url, &self.custom_headers, &rendered);
                async move {
                    sender.send(url, headers, rendered).await?;
                    Ok(())
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Timing;
    use crate::service::events::EventSink;
    use mockito::{Matcher, Server};

    fn ctx() -> Context {
        Context::new(EventSink::disabled())
            .unwrap()
            .with_timing(Timing {
                retry_gap: Duration::ZERO,
                fail_stagger: Duration::ZERO,
            })
    }

    fn notify(url: &str) -> Notify {
        Notify::from_config(
            "chat",
            &NotifyConfig {
                url: Some(url.to_string()),
                ..Default::default()
            },
            None,
            &NotifyConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn render_uses_default_templates() {
        let message = notify("https://chat.example.com").render(&TemplateVars::new("argus", "1.2.3"), None);

        assert_eq!(message.title, "version-watch");
        assert_eq!(message.message, "argus - 1.2.3 released");
    }

    #[test]
    fn from_config_resolves_pool_entry() {
        let main = NotifyConfig {
            url: Some("https://chat.example.com".to_string()),
            title: Some("{{ service_id }}".to_string()),
            ..Default::default()
        };
        let notify =
            Notify::from_config("chat", &NotifyConfig::default(), Some(&main), &NotifyConfig::default())
                .unwrap();

        assert_eq!(notify.url(), "https://chat.example.com");
        assert_eq!(notify.render(&TemplateVars::new("argus", "1"), None).title, "argus");
    }

    #[tokio::test]
    async fn send_retries_through_sender() {
        let mut sender = MockNotifySender::new();
        let mut seq = mockall::Sequence::new();
        sender
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(NotifyError::Status(503)));
        sender
            .expect_send()
            .withf(|url, _, message| url == "https://chat.example.com" && message.message == "custom")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        notify("https://chat.example.com")
            .send(&ctx(), &sender, &TemplateVars::new("argus", "1.2.3"), Some("custom"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn http_notifier_posts_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/notify")
            .match_header("x-token", "abc")
            .match_body(Matcher::Json(serde_json::json!({
                "title": "t",
                "message": "m"
            })))
            .with_status(204)
            .create_async()
            .await;

        let sender = HttpNotifier::new(reqwest::Client::new());
        let headers = IndexMap::from([("X-Token".to_string(), "abc".to_string())]);
        sender
            .send(
                &format!("{}/notify", server.url()),
                &headers,
                &Message {
                    title: "t".to_string(),
                    message: "m".to_string(),
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
