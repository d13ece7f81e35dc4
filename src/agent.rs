use std::sync::Arc;

use base64::Engine;
use serde::Serialize;

use crate::brain::{self, PageContext};
use crate::config::PilotConfig;
use crate::controller::{StepController, capture_screenshot};
use crate::dom::capture_snapshot;
use crate::error::{PilotError, PilotResult};
use crate::events::{AgentEvent, EventSink};
use crate::llm::StructuredModel;
use crate::page::{self, PageHandle};
use crate::session::BrowserLifecycle;
use crate::stabilize::wait_for_stable;
use crate::types::{ActionKind, Extraction};

const PAGE_TEXT: &str = "document.body ? document.body.innerText : ''";

/// Result of one `act` call as reported to the host. Failures are values here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEnd {
    Done,
    Failed,
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub end: TaskEnd,
    pub steps: usize,
    pub summary: String,
}

/// Task operations exposed to the host orchestrator.
pub struct Agent<S: BrowserLifecycle> {
    session: S,
    model: Arc<dyn StructuredModel>,
    config: PilotConfig,
    events: EventSink,
}

impl<S: BrowserLifecycle> Agent<S> {
    pub fn new(session: S, model: Arc<dyn StructuredModel>, config: PilotConfig, events: EventSink) -> Self {
        Self {
            session,
            model,
            config,
            events,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    async fn page(&mut self) -> PilotResult<Arc<dyn PageHandle>> {
        self.session.acquire_page(None).await
    }

    /// One decision cycle toward `instruction`.
    pub async fn act(&mut self, instruction: &str) -> ActOutcome {
        let page = match self.page().await {
            Ok(page) => page,
            Err(e) => return self.failed(e),
        };

        let result = StepController::new(page.as_ref(), self.model.as_ref(), &self.config)
            .act(instruction)
            .await;

        let outcome = match result {
            Ok(report) => {
                let status = if report.action == ActionKind::Done {
                    AgentEvent::success(format!("done: {}", report.reasoning))
                } else {
                    AgentEvent::info(format!("{}: {}", report.action, report.reasoning))
                };
                self.events.emit(status);
                ActOutcome {
                    success: true,
                    action: Some(report.action),
                    reasoning: report.reasoning,
                    message: None,
                }
            }
            Err(e) => self.failed(e),
        };

        if let Err(e) = self.refresh_state().await {
            tracing::warn!(target: "pilot::agent", error = %e, "state refresh failed");
        }
        outcome
    }

    fn failed(&self, error: PilotError) -> ActOutcome {
        tracing::error!(target: "pilot::agent", %error, "step failed");
        self.events.emit(AgentEvent::error(error.to_string()));
        ActOutcome {
            success: false,
            action: None,
            reasoning: String::new(),
            message: Some(error.to_string()),
        }
    }

    /// Suggests plausible next instructions for the current page.
    pub async fn observe(&mut self) -> PilotResult<Vec<String>> {
        let page = self.page().await?;
        wait_for_stable(page.as_ref(), &self.config.timings).await;
        let screenshot = capture_screenshot(page.as_ref(), self.config.agent.screenshot_quality).await;
        let snapshot = capture_snapshot(page.as_ref(), &self.config.limits).await?;

        let context = PageContext {
            snapshot: &snapshot,
            screenshot,
        };
        let observations =
            brain::observe(self.model.as_ref(), context, self.config.agent.observation_count).await?;
        self.events
            .emit(AgentEvent::info(format!("{} suggestions", observations.len())));
        Ok(observations)
    }

    /// Pulls `instruction`-shaped data out of the page's visible text.
    pub async fn extract(&mut self, instruction: &str) -> PilotResult<Extraction> {
        let page = self.page().await?;
        wait_for_stable(page.as_ref(), &self.config.timings).await;
        let text = page
            .evaluate(PAGE_TEXT)
            .await
            .map_err(|e| PilotError::DocumentUnavailable(e.to_string()))?;
        let text = text.as_str().unwrap_or_default();

        let extraction = brain::extract(
            self.model.as_ref(),
            instruction,
            text,
            self.config.agent.extract_char_cap,
        )
        .await?
        .ok_or_else(|| PilotError::Model("no extraction returned".into()))?;

        self.events.emit(AgentEvent::success(format!(
            "extracted with confidence {:.2}",
            extraction.confidence
        )));
        Ok(extraction)
    }

    /// Emits and returns a state update for the current page.
    pub async fn refresh_state(&mut self) -> PilotResult<AgentEvent> {
        let page = self.page().await?;
        let (url, title) = page::location(page.as_ref()).await?;
        let screenshot = capture_screenshot(page.as_ref(), self.config.agent.screenshot_quality)
            .await
            .map(|jpeg| base64::engine::general_purpose::STANDARD.encode(jpeg));

        let event = AgentEvent::StateUpdate {
            url,
            title,
            screenshot,
            pages_count: self.session.pages_count(),
        };
        self.events.emit(event.clone());
        Ok(event)
    }

    /// Brings the browser on screen, relaunching headed if needed.
    pub async fn show(&mut self) -> PilotResult<()> {
        let page = self.session.acquire_page(Some(false)).await?;
        page.bring_to_front().await?;
        self.events.emit(AgentEvent::info("browser shown"));
        Ok(())
    }

    pub fn cleanup(&mut self) {
        self.session.release();
        self.events.emit(AgentEvent::info("browser closed"));
    }

    /// Calls [`Agent::act`] until the model reports done, a step fails, or
    /// the step limit is reached.
    pub async fn run_task(&mut self, instruction: &str) -> TaskOutcome {
        let max_steps = self.config.agent.max_steps;
        tracing::info!(target: "pilot::agent", %instruction, max_steps, "task started");

        for step in 1..=max_steps {
            let outcome = self.act(instruction).await;
            if !outcome.success {
                return TaskOutcome {
                    end: TaskEnd::Failed,
                    steps: step,
                    summary: outcome.message.unwrap_or_default(),
                };
            }
            if outcome.action == Some(ActionKind::Done) {
                return TaskOutcome {
                    end: TaskEnd::Done,
                    steps: step,
                    summary: outcome.reasoning,
                };
            }
        }

        let summary = format!("reached maximum step limit ({max_steps})");
        self.events.emit(AgentEvent::error(summary.clone()));
        TaskOutcome {
            end: TaskEnd::StepLimit,
            steps: max_steps,
            summary,
        }
    }
}
