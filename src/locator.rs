use std::time::Duration;

use crate::config::Timings;
use crate::dom::ID_ATTRIBUTE;
use crate::error::{PilotError, PilotResult};
use crate::page::PageHandle;

/// A marked element resolved in the current snapshot generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedElement {
    pub id: u32,
    pub selector: String,
}

pub fn selector_for(id: u32) -> String {
    format!(r#"[{ID_ATTRIBUTE}="{id}"]"#)
}

/// Resolves interaction ids back to live elements.
pub struct ElementLocator<'a> {
    page: &'a dyn PageHandle,
    timings: &'a Timings,
}

impl<'a> ElementLocator<'a> {
    pub fn new(page: &'a dyn PageHandle, timings: &'a Timings) -> Self {
        Self { page, timings }
    }

    /// Waits for the marked element to be attached, then scrolls it into view.
    /// The scroll is best effort.
    pub async fn locate(&self, id: u32) -> PilotResult<LocatedElement> {
        let selector = selector_for(id);
        let attach = Duration::from_millis(self.timings.locate_ms);

        match tokio::time::timeout(attach, self.page.wait_for_selector(&selector, attach)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PilotError::Execution(format!("element {id} not found: {e}")));
            }
            Err(_) => return Err(PilotError::Timeout(attach, format!("element {id}"))),
        }

        let scroll = Duration::from_millis(self.timings.scroll_into_view_ms);
        match tokio::time::timeout(scroll, self.page.scroll_into_view(&selector)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(target: "pilot::locator", id, error = %e, "scroll into view failed");
            }
            Err(_) => {
                tracing::debug!(target: "pilot::locator", id, "scroll into view timed out");
            }
        }

        Ok(LocatedElement { id, selector })
    }
}
