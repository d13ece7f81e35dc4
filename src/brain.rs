use crate::error::PilotResult;
use crate::llm::{StructuredModel, StructuredRequest, generate_object};
use crate::types::{Decision, Extraction, ExtractionReply, Observations, PageSnapshot};

const DECIDE_GUIDANCE: &str = r#"You control a real web browser and choose exactly ONE next action toward the user's goal.

Actions:
- click: press the element with the given elementId
- type: replace the content of the field with elementId by text
- press: send a single key such as "Enter" or "Escape" to the page
- scroll: move the viewport one screen "up" or "down"
- navigate: load an absolute url
- wait: give the page a moment to finish loading
- done: the goal is reached, or cannot be reached; explain in reasoning

Rules:
1. elementId must be an interactionId from the current page sections. Ids change on every turn.
2. Prefer elements inside "main" and "navigation".
3. If "popups" is present (cookie banners, modals), deal with it first.
4. If the target is not visible, scroll or look for elements with inViewport=false.
5. Use done as soon as the goal is complete."#;

const OBSERVE_GUIDANCE: &str = r#"You look at a web page and suggest the most plausible next high-level actions a user could take.
Each suggestion is a short natural-language instruction such as "Open the pricing page" or "Search for rust books".
List open modals or popups first, then primary content and navigation."#;

const EXTRACT_GUIDANCE: &str = r#"You extract information from the visible text of a web page.
Return the requested information in "data". Prefer a JSON object or array encoded as a string when the information is structured.
Set "confidence" between 0 and 1."#;

/// Page facts embedded in every prompt.
pub struct PageContext<'a> {
    pub snapshot: &'a PageSnapshot,
    pub screenshot: Option<Vec<u8>>,
}

/// Asks the model for the next action.
pub async fn decide(
    model: &dyn StructuredModel,
    instruction: &str,
    page: PageContext<'_>,
    previous_error: Option<&str>,
) -> PilotResult<Option<Decision>> {
    let snapshot = page.snapshot;
    let system = format!(
        "{DECIDE_GUIDANCE}\n\nGoal: {instruction}\nURL: {}\nTitle: {}\nScrolled: {}%",
        snapshot.url, snapshot.title, snapshot.scroll.percentage
    );

    let mut user = format!("Page sections:\n{}", snapshot.sections_json());
    if let Some(error) = previous_error {
        user.push_str(&format!(
            "\n\nThe previous attempt failed with: {error}\nChoose a different element or approach."
        ));
    }

    let request = StructuredRequest::new::<Decision>("decision", system, user).with_image(page.screenshot);
    let decision: Option<Decision> = generate_object(model, request).await?;
    if let Some(d) = &decision {
        tracing::info!(target: "pilot::brain", action = %d.action, reasoning = %d.reasoning, "decided");
    }
    Ok(decision)
}

/// Asks the model for `count` suggested next instructions.
pub async fn observe(
    model: &dyn StructuredModel,
    page: PageContext<'_>,
    count: usize,
) -> PilotResult<Vec<String>> {
    let snapshot = page.snapshot;
    let system = format!(
        "{OBSERVE_GUIDANCE}\nReturn exactly {count} suggestions.\n\nURL: {}\nTitle: {}\nScrolled: {}%",
        snapshot.url, snapshot.title, snapshot.scroll.percentage
    );
    let user = format!("Page sections:\n{}", snapshot.sections_json());
    let request = StructuredRequest::new::<Observations>("observations", system, user).with_image(page.screenshot);

    let reply: Option<Observations> = generate_object(model, request).await?;
    let mut observations = reply.map(|o| o.observations).unwrap_or_default();
    observations.retain(|o| !o.trim().is_empty());
    observations.truncate(count);
    Ok(observations)
}

/// Extracts data from page text. `None` when the model returned nothing.
pub async fn extract(
    model: &dyn StructuredModel,
    instruction: &str,
    page_text: &str,
    char_cap: usize,
) -> PilotResult<Option<Extraction>> {
    let text: String = page_text.chars().take(char_cap).collect();
    let system = format!("{EXTRACT_GUIDANCE}\n\nWhat to extract: {instruction}");
    let user = format!("Page text:\n{text}");
    let request = StructuredRequest::new::<ExtractionReply>("extraction", system, user);

    let reply: Option<ExtractionReply> = generate_object(model, request).await?;
    Ok(reply.map(|r| Extraction {
        data: parse_data(r.data),
        confidence: r.confidence.clamp(0.0, 1.0),
    }))
}

/// Structured content when `raw` parses as JSON, otherwise the raw string.
pub fn parse_data(raw: String) -> serde_json::Value {
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => serde_json::Value::String(raw),
    }
}
