use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use serde_json::Value;

use crate::error::{PilotError, PilotResult};

/// Remote control channel to one live page.
///
/// Everything the agent does to a document goes through these calls; element
/// targets are CSS selectors built by the locator.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Evaluates a JavaScript expression in the document and returns its
    /// JSON-serializable result (`Null` for `undefined`).
    async fn evaluate(&self, expression: &str) -> PilotResult<Value>;

    /// Resolves once an element matching `selector` is attached to the document.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> PilotResult<()>;

    async fn scroll_into_view(&self, selector: &str) -> PilotResult<()>;

    async fn click(&self, selector: &str) -> PilotResult<()>;

    /// Replaces the content of the field matching `selector` with `text`.
    async fn fill(&self, selector: &str, text: &str) -> PilotResult<()>;

    async fn press_key(&self, key: &str) -> PilotResult<()>;

    async fn navigate(&self, url: &str) -> PilotResult<()>;

    async fn screenshot_jpeg(&self, quality: u32) -> PilotResult<Vec<u8>>;

    async fn bring_to_front(&self) -> PilotResult<()> {
        Ok(())
    }
}

/// Empties a field the way a user would, so framework-controlled inputs
/// see the change: native value setter, then an `input` event.
const CLEAR_FIELD: &str = r#"function () {
  if ('value' in this) {
    const proto = Object.getPrototypeOf(this);
    const setter = Object.getOwnPropertyDescriptor(proto, 'value')?.set;
    if (setter) { setter.call(this, ''); } else { this.value = ''; }
  } else if (this.isContentEditable) {
    this.textContent = '';
  }
  this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

/// [`PageHandle`] over a headless_chrome tab.
///
/// The tab API blocks, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    async fn blocking<T, F>(&self, what: &'static str, f: F) -> PilotResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<Tab>) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| PilotError::Browser(format!("{what} task panicked: {e}")))?
            .map_err(|e| PilotError::Browser(format!("{what}: {e:#}")))
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn evaluate(&self, expression: &str) -> PilotResult<Value> {
        // Serialize in-page so objects come back by value.
        let wrapped = format!("JSON.stringify({expression})");
        let raw = self
            .blocking("evaluate", move |tab| {
                let result = tab.evaluate(&wrapped, false)?;
                Ok(result.value.and_then(|v| v.as_str().map(String::from)))
            })
            .await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Value::Null),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> PilotResult<()> {
        let selector = selector.to_string();
        self.blocking("wait for element", move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)?;
            Ok(())
        })
        .await
    }

    async fn scroll_into_view(&self, selector: &str) -> PilotResult<()> {
        let selector = selector.to_string();
        self.blocking("scroll into view", move |tab| {
            tab.find_element(&selector)?.scroll_into_view()?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> PilotResult<()> {
        let selector = selector.to_string();
        self.blocking("click", move |tab| {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, text: &str) -> PilotResult<()> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.blocking("type", move |tab| {
            let element = tab.find_element(&selector)?;
            element.click()?;
            element.call_js_fn(CLEAR_FIELD, vec![], false)?;
            element.type_into(&text)?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> PilotResult<()> {
        let key = key.to_string();
        self.blocking("press key", move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn navigate(&self, url: &str) -> PilotResult<()> {
        let url = url.to_string();
        self.blocking("navigate", move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn screenshot_jpeg(&self, quality: u32) -> PilotResult<Vec<u8>> {
        self.blocking("screenshot", move |tab| {
            tab.capture_screenshot(
                CaptureScreenshotFormatOption::Jpeg,
                Some(quality),
                None,
                true,
            )
        })
        .await
    }

    async fn bring_to_front(&self) -> PilotResult<()> {
        self.blocking("bring to front", |tab| {
            tab.bring_to_front()?;
            Ok(())
        })
        .await
    }
}

/// Current URL and title of the page.
pub async fn location(page: &dyn PageHandle) -> PilotResult<(String, String)> {
    let value = page
        .evaluate("({ url: window.location.href, title: document.title })")
        .await?;
    let url = value["url"].as_str().unwrap_or("unknown").to_string();
    let title = value["title"].as_str().unwrap_or("untitled").to_string();
    Ok((url, title))
}
