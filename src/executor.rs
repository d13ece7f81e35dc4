use std::future::Future;
use std::time::Duration;

use crate::config::Timings;
use crate::error::{PilotError, PilotResult};
use crate::locator::ElementLocator;
use crate::page::PageHandle;
use crate::types::{Action, ScrollDirection};

/// Share of the viewport height moved by one scroll.
pub const SCROLL_FRACTION: f64 = 0.8;

/// Performs one primitive browser operation.
pub struct ActionExecutor<'a> {
    page: &'a dyn PageHandle,
    timings: &'a Timings,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(page: &'a dyn PageHandle, timings: &'a Timings) -> Self {
        Self { page, timings }
    }

    /// Dispatches a validated action. `Done` performs nothing.
    pub async fn execute(&self, action: &Action) -> PilotResult<()> {
        match action {
            Action::Click { element_id } => self.click(*element_id).await,
            Action::Type { element_id, text } => self.type_text(*element_id, text).await,
            Action::Press { key } => self.press(key).await,
            Action::Scroll { direction } => self.scroll(*direction).await.map(|_| ()),
            Action::Navigate { url } => self.navigate(url).await,
            Action::Wait => self.wait().await,
            Action::Done => Ok(()),
        }
    }

    pub async fn click(&self, id: u32) -> PilotResult<()> {
        let element = ElementLocator::new(self.page, self.timings).locate(id).await?;
        tracing::debug!(target: "pilot::executor", id = element.id, "clicking");
        bounded(self.action_timeout(), "click", self.page.click(&element.selector)).await
    }

    pub async fn type_text(&self, id: u32, text: &str) -> PilotResult<()> {
        let element = ElementLocator::new(self.page, self.timings).locate(id).await?;
        tracing::debug!(target: "pilot::executor", id = element.id, chars = text.chars().count(), "typing");
        bounded(self.action_timeout(), "type", self.page.fill(&element.selector, text)).await
    }

    pub async fn press(&self, key: &str) -> PilotResult<()> {
        bounded(self.action_timeout(), "key press", self.page.press_key(key)).await
    }

    /// Moves the viewport by [`SCROLL_FRACTION`] of its height and returns
    /// the new vertical offset after the settle delay.
    pub async fn scroll(&self, direction: ScrollDirection) -> PilotResult<f64> {
        let sign = match direction {
            ScrollDirection::Up => -1.0,
            ScrollDirection::Down => 1.0,
        };
        let script = format!(
            "(() => {{ window.scrollBy(0, {sign} * window.innerHeight * {SCROLL_FRACTION}); return window.scrollY; }})()"
        );
        let offset = bounded(self.action_timeout(), "scroll", self.page.evaluate(&script))
            .await?
            .as_f64()
            .unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(self.timings.scroll_settle_ms)).await;
        Ok(offset)
    }

    pub async fn navigate(&self, url: &str) -> PilotResult<()> {
        let limit = Duration::from_millis(self.timings.navigate_ms);
        bounded(limit, "navigation", self.page.navigate(url)).await
    }

    pub async fn wait(&self) -> PilotResult<()> {
        tokio::time::sleep(Duration::from_millis(self.timings.wait_action_ms)).await;
        Ok(())
    }

    fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.timings.action_ms)
    }
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> PilotResult<T>
where
    F: Future<Output = PilotResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PilotError::Execution(format!("{what} failed: {e}"))),
        Err(_) => Err(PilotError::Timeout(limit, what.to_string())),
    }
}
