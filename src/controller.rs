use std::time::Duration;

use crate::brain::{self, PageContext};
use crate::config::PilotConfig;
use crate::dom::capture_snapshot;
use crate::error::{PilotError, PilotResult};
use crate::executor::ActionExecutor;
use crate::llm::StructuredModel;
use crate::page::PageHandle;
use crate::stabilize::wait_for_stable;
use crate::types::{Action, ActionKind};

/// A failed execution is retried this many times, re-perceiving first.
const RETRIES: usize = 1;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// What one step did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub action: ActionKind,
    pub reasoning: String,
    pub attempts: usize,
}

/// Runs one perceive, decide, execute cycle against a page.
///
/// Only one step may be in flight per page: interaction ids are not
/// namespaced, so a concurrent step would act on stale ids.
pub struct StepController<'a> {
    page: &'a dyn PageHandle,
    model: &'a dyn StructuredModel,
    config: &'a PilotConfig,
}

impl<'a> StepController<'a> {
    pub fn new(page: &'a dyn PageHandle, model: &'a dyn StructuredModel, config: &'a PilotConfig) -> Self {
        Self { page, model, config }
    }

    pub async fn act(&self, instruction: &str) -> PilotResult<StepReport> {
        let mut previous_error: Option<String> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            wait_for_stable(self.page, &self.config.timings).await;
            let screenshot = capture_screenshot(self.page, self.config.agent.screenshot_quality).await;
            let snapshot = capture_snapshot(self.page, &self.config.limits).await?;

            tracing::debug!(
                target: "pilot::controller",
                attempt,
                nodes = snapshot.node_count(),
                url = %snapshot.url,
                "page perceived"
            );

            let context = PageContext {
                snapshot: &snapshot,
                screenshot,
            };
            let decision = brain::decide(self.model, instruction, context, previous_error.as_deref())
                .await?
                .ok_or(PilotError::NoDecision)?;
            let action = decision.validate()?;

            let report = StepReport {
                action: action.kind(),
                reasoning: decision.reasoning,
                attempts: attempt,
            };
            if action == Action::Done {
                return Ok(report);
            }

            match ActionExecutor::new(self.page, &self.config.timings).execute(&action).await {
                Ok(()) => {
                    tracing::info!(target: "pilot::controller", action = %report.action, attempt, "step executed");
                    return Ok(report);
                }
                Err(e) if attempt <= RETRIES => {
                    tracing::warn!(target: "pilot::controller", action = %report.action, error = %e, "step failed, retrying");
                    previous_error = Some(e.to_string());
                }
                Err(e) => {
                    tracing::error!(target: "pilot::controller", action = %report.action, error = %e, "step failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Best-effort JPEG of the viewport; failures are logged and yield `None`.
pub async fn capture_screenshot(page: &dyn PageHandle, quality: u32) -> Option<Vec<u8>> {
    let result = match tokio::time::timeout(SCREENSHOT_TIMEOUT, page.screenshot_jpeg(quality)).await {
        Ok(result) => result,
        Err(_) => Err(PilotError::Timeout(SCREENSHOT_TIMEOUT, "screenshot".into())),
    };
    match result {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            let degraded = PilotError::PerceptionDegraded(e.to_string());
            tracing::warn!(target: "pilot::controller", error = %degraded, "continuing without screenshot");
            None
        }
    }
}
