use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PilotError, PilotResult};

/// Coarse page region a semantic node is grouped under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Header,
    Footer,
    Navigation,
    Main,
    Sidebar,
    Popups,
    Other,
}

/// One visible, interesting DOM element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticNode {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub in_viewport: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SemanticNode>,
}

impl SemanticNode {
    /// Number of nodes in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SemanticNode::count).sum::<usize>()
    }

    /// Depth of this subtree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(SemanticNode::depth).max().unwrap_or(0)
    }

    pub fn collect_ids(&self, out: &mut Vec<u32>) {
        if let Some(id) = self.interaction_id {
            out.push(id);
        }
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollInfo {
    pub offset_y: f64,
    pub percentage: u32,
    pub total_height: f64,
}

/// Point-in-time semantic serialization of the rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub scroll: ScrollInfo,
    pub sections: BTreeMap<Section, Vec<SemanticNode>>,
}

impl PageSnapshot {
    pub fn node_count(&self) -> usize {
        self.sections.values().flatten().map(SemanticNode::count).sum()
    }

    pub fn interaction_ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        for node in self.sections.values().flatten() {
            node.collect_ids(&mut ids);
        }
        ids
    }

    /// The section map as compact JSON, the form embedded in model prompts.
    pub fn sections_json(&self) -> String {
        serde_json::to_string(&self.sections).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Type,
    Press,
    Wait,
    Navigate,
    Scroll,
    Done,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Press => "press",
            ActionKind::Wait => "wait",
            ActionKind::Navigate => "navigate",
            ActionKind::Scroll => "scroll",
            ActionKind::Done => "done",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// The model's chosen next action, exactly as returned by the structured-output call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub action: ActionKind,
    /// Interaction id of the target element, for click and type.
    #[serde(default, deserialize_with = "string_or_number")]
    #[schemars(with = "Option<String>")]
    pub element_id: Option<String>,
    /// Text to enter, for type.
    #[serde(default)]
    pub text: Option<String>,
    /// Key name such as "Enter", for press.
    #[serde(default)]
    pub key: Option<String>,
    /// Absolute URL, for navigate.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub direction: Option<ScrollDirection>,
    #[serde(default)]
    pub reasoning: String,
}

/// A validated decision: only the fields its kind needs, all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click { element_id: u32 },
    Type { element_id: u32, text: String },
    Press { key: String },
    Wait,
    Navigate { url: String },
    Scroll { direction: ScrollDirection },
    Done,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::Press { .. } => ActionKind::Press,
            Action::Wait => ActionKind::Wait,
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::Done => ActionKind::Done,
        }
    }
}

impl Decision {
    /// Checks that the fields required by `action` are present and usable.
    /// Fields irrelevant to the action are ignored.
    pub fn validate(&self) -> PilotResult<Action> {
        let action = self.action;
        let missing = |field: &'static str| PilotError::MissingActionParameter { action, field };

        Ok(match action {
            ActionKind::Click => Action::Click {
                element_id: self.element_id()?.ok_or_else(|| missing("elementId"))?,
            },
            ActionKind::Type => Action::Type {
                element_id: self.element_id()?.ok_or_else(|| missing("elementId"))?,
                text: self.text.clone().ok_or_else(|| missing("text"))?,
            },
            ActionKind::Press => Action::Press {
                key: non_empty(&self.key).ok_or_else(|| missing("key"))?,
            },
            ActionKind::Navigate => Action::Navigate {
                url: non_empty(&self.url).ok_or_else(|| missing("url"))?,
            },
            ActionKind::Scroll => Action::Scroll {
                direction: self.direction.unwrap_or(ScrollDirection::Down),
            },
            ActionKind::Wait => Action::Wait,
            ActionKind::Done => Action::Done,
        })
    }

    fn element_id(&self) -> PilotResult<Option<u32>> {
        let Some(raw) = non_empty(&self.element_id) else {
            return Ok(None);
        };
        raw.parse::<u32>()
            .map(Some)
            .map_err(|_| PilotError::InvalidActionParameter {
                action: self.action,
                field: "elementId",
                value: raw,
            })
    }
}

/// Ids are shown to the model as numbers, so it may answer with one.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    }))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Suggested next high-level actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Observations {
    pub observations: Vec<String>,
}

/// Raw extractor output; `data` is parsed further by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionReply {
    pub data: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub data: serde_json::Value,
    pub confidence: f64,
}
