//! Action controller
//!
//! Runs a service's commands and webhooks concurrently once a release is
//! approved, recording each outcome on the service status.
//!
//! # Modules
//!
//! - [`command`]: Shell commands
//! - [`webhook`]: Signed outbound webhooks
//! - [`notify`]: Notifications and the sender seam
//! - [`retry`]: Shared retry loop and runnable bookkeeping
//! - [`error`]: Error types for actions

pub mod command;
pub mod error;
pub mod notify;
pub mod retry;
pub mod webhook;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::action::command::Command;
use crate::action::error::ActionError;
use crate::action::notify::{Notify, NotifySender};
use crate::action::webhook::WebHook;
use crate::context::Context;
use crate::service::status::StatusHandle;
use crate::template::TemplateVars;

/// Which actions an approval applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every action, after resetting all fail flags
    All,
    /// Actions that have not yet succeeded
    Failed,
    WebHook(String),
    Command(usize),
}

impl Target {
    /// `all`, `failed`, `command:<index>` or a webhook id
    pub fn parse(target: &str) -> Self {
        match target {
            "all" => Target::All,
            "failed" => Target::Failed,
            other => match other
                .strip_prefix("command:")
                .and_then(|index| index.parse().ok())
            {
                Some(index) => Target::Command(index),
                None => Target::WebHook(other.to_string()),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct Actions {
    pub commands: Vec<Command>,
    pub webhooks: Vec<WebHook>,
    pub notifies: Vec<Notify>,
}

impl Actions {
    /// No commands or webhooks; notifications alone don't count
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.webhooks.is_empty()
    }

    pub fn webhook_ids(&self) -> Vec<String> {
        self.webhooks.iter().map(|w| w.id().to_string()).collect()
    }

    pub fn notify(&self, id: &str) -> Option<&Notify> {
        self.notifies.iter().find(|n| n.id() == id)
    }

    /// Whether `target` names an existing action
    pub fn has_target(&self, target: &Target) -> bool {
        match target {
            Target::All | Target::Failed => true,
            Target::WebHook(id) => self.webhooks.iter().any(|w| w.id() == id),
            Target::Command(index) => *index < self.commands.len(),
        }
    }

    /// Send every notification, logging failures
    pub async fn send_notifications(
        &self,
        ctx: &Context,
        sender: &dyn NotifySender,
        vars: &TemplateVars<'_>,
        message: Option<&str>,
    ) {
        let sends = self.notifies.iter().map(|notify| async move {
            if let Err(e) = notify.send(ctx, sender, vars, message).await {
                error!("{}, notify {}: {}", vars.service_id, notify.id(), e);
            }
        });
        join_all(sends).await;
    }

    /// Run the targeted actions concurrently.
    ///
    /// Returns whether every action of the service has now succeeded. Results
    /// arriving after `cancel` fires are discarded.
    pub async fn run(
        &self,
        ctx: &Context,
        sender: &dyn NotifySender,
        status: &StatusHandle,
        vars: &TemplateVars<'_>,
        target: &Target,
        cancel: &CancellationToken,
    ) -> bool {
        if *target == Target::All {
            status.reset_action_fails();
        }

        let commands = self
            .commands
            .iter()
            .filter(|command| match target {
                Target::All => true,
                Target::Failed => status.command_fail(command.index()) != Some(false),
                Target::Command(index) => command.index() == *index,
                Target::WebHook(_) => false,
            })
            .map(|command| async move {
                let result = command.exec(ctx, vars).await;
                if cancel.is_cancelled() {
                    debug!("{}: discarding command result, service removed", vars.service_id);
                    return;
                }
                if let Err(ActionError::NotRunnable(at)) = &result {
                    debug!(
                        "{}: command {} not runnable until {}, skipped",
                        vars.service_id,
                        command.index(),
                        at
                    );
                    return;
                }
                status.set_command_fail(command.index(), Some(result.is_err()));
            });

        let webhooks = self
            .webhooks
            .iter()
            .filter(|webhook| match target {
                Target::All => true,
                Target::Failed => status.webhook_fail(webhook.id()) != Some(false),
                Target::WebHook(id) => webhook.id() == id,
                Target::Command(_) => false,
            })
            .map(|webhook| async move {
                let result = webhook.send(ctx, vars).await;
                if cancel.is_cancelled() {
                    debug!("{}: discarding webhook result, service removed", vars.service_id);
                    return;
                }
                if let Err(ActionError::NotRunnable(at)) = &result {
                    debug!(
                        "{}: webhook {} not runnable until {}, skipped",
                        vars.service_id,
                        webhook.id(),
                        at
                    );
                    return;
                }
                status.set_webhook_fail(webhook.id(), Some(result.is_err()));
                if let Err(e) = result {
                    if !webhook.silent_fails() {
                        let message = format!(
                            "{} - WebHook {} failed: {}",
                            vars.service_id,
                            webhook.id(),
                            e
                        );
                        self.send_notifications(ctx, sender, vars, Some(&message))
                            .await;
                    }
                }
            });

        tokio::join!(join_all(commands), join_all(webhooks));

        let succeeded = status.all_actions_succeeded();
        if succeeded {
            info!("{}: all actions succeeded for {}", vars.service_id, vars.version);
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::action::error::NotifyError;
    use crate::action::notify::MockNotifySender;
    use crate::config::{CommandConfig, CommandOptions, NotifyConfig, WebHookConfig, WebHookKind};
    use crate::context::Timing;
    use crate::service::events::EventSink;
    use mockito::Server;
    use rstest::rstest;

    fn ctx() -> Context {
        Context::new(EventSink::disabled())
            .unwrap()
            .with_timing(Timing {
                retry_gap: Duration::ZERO,
                fail_stagger: Duration::ZERO,
            })
    }

    fn webhook(id: &str, url: &str, silent_fails: bool) -> WebHook {
        WebHook::from_config(
            id,
            &WebHookConfig {
                kind: Some(WebHookKind::Github),
                url: Some(url.to_string()),
                secret: Some("s3cret".to_string()),
                max_tries: Some(3),
                silent_fails: Some(silent_fails),
                ..Default::default()
            },
            None,
            &WebHookConfig::default(),
        )
        .unwrap()
    }

    fn notify() -> Notify {
        Notify::from_config(
            "chat",
            &NotifyConfig {
                url: Some("https://chat.example.com".to_string()),
                ..Default::default()
            },
            None,
            &NotifyConfig::default(),
        )
        .unwrap()
    }

    fn status(actions: &Actions) -> StatusHandle {
        StatusHandle::new(
            "argus",
            actions.webhook_ids(),
            actions.commands.len(),
            EventSink::disabled(),
        )
    }

    #[rstest]
    #[case("all", Target::All)]
    #[case("failed", Target::Failed)]
    #[case("command:2", Target::Command(2))]
    #[case("command:x", Target::WebHook("command:x".to_string()))]
    #[case("deploy", Target::WebHook("deploy".to_string()))]
    fn target_parse(#[case] input: &str, #[case] expected: Target) {
        assert_eq!(Target::parse(input), expected);
    }

    #[tokio::test]
    async fn failing_webhook_is_retried_marked_and_escalated() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/fail")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let passing = server
            .mock("POST", "/ok")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let actions = Actions {
            webhooks: vec![
                webhook("fail", &format!("{}/fail", server.url()), false),
                webhook("ok", &format!("{}/ok", server.url()), false),
            ],
            notifies: vec![notify()],
            ..Default::default()
        };
        let status = status(&actions);
        let mut sender = MockNotifySender::new();
        sender
            .expect_send()
            .withf(|_, _, message| message.message.contains("WebHook fail failed"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let succeeded = actions
            .run(
                &ctx(),
                &sender,
                &status,
                &TemplateVars::new("argus", "1.2.3"),
                &Target::All,
                &CancellationToken::new(),
            )
            .await;

        failing.assert_async().await;
        passing.assert_async().await;
        assert!(!succeeded);
        assert_eq!(status.webhook_fail("fail"), Some(true));
        assert_eq!(status.webhook_fail("ok"), Some(false));
    }

    #[tokio::test]
    async fn silent_fails_skips_escalation() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("POST", "/fail").with_status(500).create_async().await;

        let actions = Actions {
            webhooks: vec![webhook("fail", &format!("{}/fail", server.url()), true)],
            notifies: vec![notify()],
            ..Default::default()
        };
        let status = status(&actions);
        let mut sender = MockNotifySender::new();
        sender.expect_send().never();

        actions
            .run(
                &ctx(),
                &sender,
                &status,
                &TemplateVars::new("argus", "1.2.3"),
                &Target::All,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(status.webhook_fail("fail"), Some(true));
    }

    #[tokio::test]
    async fn staggered_webhook_is_skipped_without_escalation() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/fail")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let actions = Actions {
            webhooks: vec![webhook("fail", &format!("{}/fail", server.url()), false)],
            notifies: vec![notify()],
            ..Default::default()
        };
        let status = status(&actions);
        let ctx = ctx().with_timing(Timing {
            retry_gap: Duration::ZERO,
            fail_stagger: Duration::from_secs(60),
        });
        let mut sender = MockNotifySender::new();
        sender
            .expect_send()
            .withf(|_, _, message| message.message.contains("WebHook fail failed"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let vars = TemplateVars::new("argus", "1.2.3");

        for target in [Target::All, Target::Failed] {
            let succeeded = actions
                .run(&ctx, &sender, &status, &vars, &target, &CancellationToken::new())
                .await;
            assert!(!succeeded);
        }

        failing.assert_async().await;
        assert_eq!(status.webhook_fail("fail"), Some(true));
        assert!(actions.webhooks[0].next_runnable().is_some());
    }

    #[tokio::test]
    async fn failed_target_only_reruns_unsucceeded_actions() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("POST", "/ok")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;
        let retry = server
            .mock("POST", "/retry")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let actions = Actions {
            webhooks: vec![
                webhook("ok", &format!("{}/ok", server.url()), false),
                webhook("retry", &format!("{}/retry", server.url()), false),
            ],
            ..Default::default()
        };
        let status = status(&actions);
        status.set_webhook_fail("ok", Some(false));
        status.set_webhook_fail("retry", Some(true));

        let succeeded = actions
            .run(
                &ctx(),
                &MockNotifySender::new(),
                &status,
                &TemplateVars::new("argus", "1.2.3"),
                &Target::Failed,
                &CancellationToken::new(),
            )
            .await;

        ok.assert_async().await;
        retry.assert_async().await;
        assert!(succeeded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_service_discards_results() {
        let actions = Actions {
            commands: vec![
                Command::from_config(
                    0,
                    &CommandConfig::Args(vec!["true".to_string()]),
                    &CommandOptions::default(),
                )
                .unwrap(),
            ],
            ..Default::default()
        };
        let status = status(&actions);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let succeeded = actions
            .run(
                &ctx(),
                &MockNotifySender::new(),
                &status,
                &TemplateVars::new("argus", "1.2.3"),
                &Target::All,
                &cancel,
            )
            .await;

        assert!(!succeeded);
        assert_eq!(status.command_fail(0), None);
    }

    #[tokio::test]
    async fn send_notifications_logs_and_continues_on_error() {
        let actions = Actions {
            notifies: vec![notify()],
            ..Default::default()
        };
        let mut sender = MockNotifySender::new();
        sender
            .expect_send()
            .times(3)
            .returning(|_, _, _| Err(NotifyError::Status(500)));

        actions
            .send_notifications(&ctx(), &sender, &TemplateVars::new("argus", "1.2.3"), None)
            .await;
    }
}
