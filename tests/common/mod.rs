#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use page_pilot::error::{PilotError, PilotResult};
use page_pilot::llm::{StructuredModel, StructuredRequest};
use page_pilot::page::PageHandle;
use page_pilot::session::BrowserLifecycle;
use serde_json::{Value, json};

pub const VIEWPORT_HEIGHT: f64 = 800.0;

#[derive(Default)]
pub struct PageState {
    pub doc: Value,
    pub text: String,
    pub known_ids: Vec<u32>,
    /// Mutating calls in order: `click:<selector>`, `fill:<selector>:<text>`, ...
    pub calls: Vec<String>,
    pub fail_clicks: usize,
    pub screenshot_fails: bool,
    /// Keeps loading forever: readyState stays "loading", resources keep
    /// arriving and a busy marker stays up.
    pub never_settles: bool,
    pub resources: u64,
    pub scroll_y: f64,
}

/// In-memory page answering the agent's scripts by shape.
pub struct FakePage {
    pub state: Mutex<PageState>,
}

fn rect(top: f64) -> Value {
    json!({ "top": top, "bottom": top + 20.0, "left": 0, "right": 200, "width": 200, "height": 20 })
}

fn node(tag: &str, text: &str, id: Option<u32>, children: Vec<Value>) -> Value {
    json!({
        "tag": tag,
        "text": text,
        "interactionId": id,
        "position": "static",
        "rect": rect(40.0),
        "children": children,
    })
}

impl FakePage {
    /// A search page: header links 0 and 1, a query field 2, a Search button 3.
    pub fn search_page() -> Arc<Self> {
        let mut header = node(
            "div",
            "",
            None,
            vec![node("a", "Home", Some(0), vec![]), node("a", "About", Some(1), vec![])],
        );
        header["role"] = json!("banner");

        let mut field = node("input", "", Some(2), vec![]);
        field["inputType"] = json!("search");
        field["inputValue"] = json!("");
        let form = node("form", "", None, vec![field, node("button", "Search", Some(3), vec![])]);
        let main = node("main", "", None, vec![node("h1", "Find anything", None, vec![]), form]);

        let doc = json!({
            "url": "https://search.example/",
            "title": "Example Search",
            "viewport": { "width": 1280, "height": VIEWPORT_HEIGHT },
            "scroll": { "offsetY": 0, "totalHeight": 2400 },
            "root": node("body", "", None, vec![header, main]),
        });

        Arc::new(Self {
            state: Mutex::new(PageState {
                doc,
                text: "Find anything\nHome About\nSearch".into(),
                known_ids: vec![0, 1, 2, 3],
                ..PageState::default()
            }),
        })
    }

    pub fn with<F: FnOnce(&mut PageState)>(self: Arc<Self>, f: F) -> Arc<Self> {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn known(&self, selector: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .known_ids
            .iter()
            .any(|id| selector == format!(r#"[data-agent-id="{id}"]"#))
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn evaluate(&self, expression: &str) -> PilotResult<Value> {
        let mut state = self.state.lock().unwrap();
        if expression.contains("const MARK") {
            return Ok(state.doc.clone());
        }
        if expression.contains("document.readyState") {
            let ready = if state.never_settles { "loading" } else { "complete" };
            return Ok(json!(ready));
        }
        if expression.contains("getEntriesByType") {
            if state.never_settles {
                state.resources += 1;
            }
            return Ok(json!(state.resources));
        }
        if expression.contains("aria-busy") {
            return Ok(json!(state.never_settles));
        }
        if expression.contains("scrollBy") {
            let sign = if expression.contains("-1 *") { -1.0 } else { 1.0 };
            state.scroll_y = (state.scroll_y + sign * VIEWPORT_HEIGHT * 0.8).max(0.0);
            state.calls.push("scroll".into());
            return Ok(json!(state.scroll_y));
        }
        if expression.contains("innerText") {
            return Ok(json!(state.text));
        }
        if expression.contains("window.location.href") {
            return Ok(json!({ "url": state.doc["url"], "title": state.doc["title"] }));
        }
        Err(PilotError::Browser(format!("unexpected script: {expression}")))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> PilotResult<()> {
        if self.known(selector) {
            Ok(())
        } else {
            Err(PilotError::Browser(format!("no element matches {selector}")))
        }
    }

    async fn scroll_into_view(&self, _selector: &str) -> PilotResult<()> {
        Ok(())
    }

    async fn click(&self, selector: &str) -> PilotResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_clicks > 0 {
            state.fail_clicks -= 1;
            return Err(PilotError::Browser("element is not clickable at point".into()));
        }
        state.calls.push(format!("click:{selector}"));
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> PilotResult<()> {
        self.record(format!("fill:{selector}:{text}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> PilotResult<()> {
        self.record(format!("press:{key}"));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> PilotResult<()> {
        self.record(format!("navigate:{url}"));
        Ok(())
    }

    async fn screenshot_jpeg(&self, _quality: u32) -> PilotResult<Vec<u8>> {
        if self.state.lock().unwrap().screenshot_fails {
            return Err(PilotError::Browser("capture failed".into()));
        }
        Ok(vec![0xff, 0xd8, 0xff, 0xd9])
    }
}

/// Model returning queued replies in order, then nothing.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Value>>,
    pub requests: Mutex<Vec<StructuredRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<StructuredRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredModel for ScriptedModel {
    async fn generate(&self, request: StructuredRequest) -> PilotResult<Option<Value>> {
        self.requests.lock().unwrap().push(request);
        Ok(self.replies.lock().unwrap().pop_front())
    }
}

pub struct FakeSession {
    pub page: Arc<FakePage>,
    pub released: usize,
    pub headless: bool,
}

impl FakeSession {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page,
            released: 0,
            headless: true,
        }
    }
}

#[async_trait]
impl BrowserLifecycle for FakeSession {
    async fn acquire_page(&mut self, headless_override: Option<bool>) -> PilotResult<Arc<dyn PageHandle>> {
        if let Some(headless) = headless_override {
            self.headless = headless;
        }
        Ok(self.page.clone())
    }

    async fn relaunch(&mut self, headless: bool) -> PilotResult<Arc<dyn PageHandle>> {
        self.headless = headless;
        Ok(self.page.clone())
    }

    fn release(&mut self) {
        self.released += 1;
    }

    fn pages_count(&self) -> usize {
        1
    }
}

pub fn click(id: &str) -> Value {
    json!({ "action": "click", "elementId": id, "reasoning": format!("clicking {id}") })
}

pub fn done(reasoning: &str) -> Value {
    json!({ "action": "done", "reasoning": reasoning })
}
