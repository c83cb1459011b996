//! Shell commands run when a release is approved

use std::time::Duration;

use crate::action::error::ActionError;
use crate::action::retry::{Runnable, run_with_retries};
use crate::config::defaults::{DEFAULT_COMMAND_DELAY, DEFAULT_COMMAND_MAX_TRIES, Tiers};
use crate::config::duration::parse_duration;
use crate::config::{COMMAND_TIMEOUT_MS, CommandConfig, CommandOptions};
use crate::context::Context;
use crate::process;
use crate::template::{TemplateVars, render};

#[derive(Debug)]
pub struct Command {
    index: usize,
    args: Vec<String>,
    delay: Duration,
    max_tries: u32,
    runnable: Runnable,
}

impl Command {
    pub fn from_config(
        index: usize,
        config: &CommandConfig,
        class: &CommandOptions,
    ) -> Result<Self, Vec<String>> {
        let tiers = Tiers::new(config.options(), None, Some(class));
        let mut problems = Vec::new();

        if config.args().is_empty() {
            problems.push("args: command is empty".to_string());
        }
        let delay = parse_duration(&tiers.get_or(|c| &c.delay, DEFAULT_COMMAND_DELAY.to_string()))
            .unwrap_or_else(|e| {
                problems.push(format!("delay: {}", e));
                Duration::ZERO
            });

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Self {
            index,
            args: config.args().to_vec(),
            delay,
            max_tries: tiers.get_or(|c| &c.max_tries, DEFAULT_COMMAND_MAX_TRIES),
            runnable: Runnable::default(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn next_runnable(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.runnable.next_runnable()
    }

    fn rendered(&self, vars: &TemplateVars<'_>) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| render(arg, vars).into_owned())
            .collect()
    }

    pub async fn exec(&self, ctx: &Context, vars: &TemplateVars<'_>) -> Result<(), ActionError> {
        let args = self.rendered(vars);
        let label = format!("{}, command {:?}", vars.service_id, args.join(" "));
        let timing = ctx.timing();
        let timeout = Duration::from_millis(COMMAND_TIMEOUT_MS);

        run_with_retries(
            &label,
            &self.runnable,
            self.delay,
            self.max_tries,
            timing.retry_gap,
            timing.fail_stagger,
            || {
                let args = &args;
                async move {
                    process::run(args, timeout).await?;
                    Ok(())
                }
            },
        )
        .await
    }
}
