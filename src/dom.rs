//! Page perception: turns the live document into a bounded [`PageSnapshot`].
//!
//! Work is split across the page-control channel:
//!   1. [`snapshot_script`] runs inside the document. It strips old
//!      `data-agent-id` markers, numbers every visible interactable element
//!      from zero, and returns a raw element tree (bounded in depth and size)
//!      with the computed-style facts the builder needs.
//!   2. [`SnapshotBuilder`] classifies sections, prunes, flattens and buckets
//!      that tree into the semantic form handed to the model.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::config::SnapshotLimits;
use crate::error::{PilotError, PilotResult};
use crate::page::PageHandle;
use crate::types::{PageSnapshot, ScrollInfo, Section, SemanticNode};

/// Attribute carrying the interaction id of a marked element.
pub const ID_ATTRIBUTE: &str = "data-agent-id";

const NON_VISUAL: &[&str] = &["script", "style", "noscript", "svg", "iframe"];

const NOTABLE_ROLES: &[&str] = &[
    "button", "link", "heading", "img", "alert", "status", "dialog", "alertdialog", "tab",
    "tablist", "menu", "menuitem", "checkbox", "radio", "switch", "textbox", "searchbox",
    "combobox", "listbox", "option", "search", "form", "table", "list", "listitem",
];

const POPUP_HINTS: &[&str] = &["modal", "popup", "dialog", "overlay"];
const SIDEBAR_HINTS: &[&str] = &["sidebar", "side-bar"];

/// Pixels from the viewport edge that still count as pinned.
const EDGE_TOLERANCE: f64 = 5.0;
/// Share of the viewport width a pinned bar must span.
const WIDE_RATIO: f64 = 0.8;

/// Builds the in-page script for one snapshot generation.
pub fn snapshot_script(limits: &SnapshotLimits) -> String {
    format!(
        r#"(() => {{
  const MARK = '{mark}';
  const MAX_DEPTH = {max_depth};
  const MAX_RAW = {raw_cap};
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','IFRAME','TEMPLATE','LINK','META']);
  const INTERACTIVE = 'a[href], button, input:not([type="hidden"]), select, textarea, summary, ' +
    '[role="button"], [role="link"], [role="checkbox"], [role="radio"], [role="switch"], [role="tab"], ' +
    '[role="menuitem"], [role="option"], [role="textbox"], [role="searchbox"], [role="combobox"], ' +
    '[contenteditable=""], [contenteditable="true"]';
  const isHidden = (s) => s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0';
  const squash = (t) => (t || '').replace(/\s+/g, ' ').trim();

  document.querySelectorAll('[' + MARK + ']').forEach((el) => el.removeAttribute(MARK));
  let next = 0;
  for (const el of document.querySelectorAll(INTERACTIVE)) {{
    if (isHidden(getComputedStyle(el))) continue;
    el.setAttribute(MARK, String(next++));
  }}

  let seen = 0;
  const walk = (el, depth) => {{
    if (depth > MAX_DEPTH || seen >= MAX_RAW) return null;
    if (SKIP.has(el.tagName.toUpperCase())) return null;
    seen++;
    const style = getComputedStyle(el);
    const r = el.getBoundingClientRect();
    const mark = el.getAttribute(MARK);
    let text = '';
    for (const n of el.childNodes) if (n.nodeType === 3) text += n.textContent;
    const node = {{
      tag: el.tagName.toLowerCase(),
      idAttr: el.id || '',
      className: typeof el.className === 'string' ? el.className : '',
      role: el.getAttribute('role'),
      ariaLabel: el.getAttribute('aria-label'),
      title: el.getAttribute('title'),
      ariaHidden: el.getAttribute('aria-hidden') === 'true',
      hidden: isHidden(style),
      position: style.position,
      rect: {{ top: r.top, bottom: r.bottom, left: r.left, right: r.right, width: r.width, height: r.height }},
      text: squash(text).slice(0, 200),
      interactionId: mark === null ? null : Number(mark),
      inputType: null,
      inputValue: null,
      children: [],
    }};
    if (mark !== null) {{
      if (!node.text) node.text = squash(el.innerText || el.placeholder || '').slice(0, 200);
      if (['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName)) {{
        node.inputType = el.type || el.tagName.toLowerCase();
        node.inputValue = el.type === 'password' ? null : String(el.value || '').slice(0, 200);
      }}
    }}
    if (node.hidden || node.ariaHidden) return node;
    for (const child of el.children) {{
      const c = walk(child, depth + 1);
      if (c) node.children.push(c);
    }}
    return node;
  }};

  const root = document.body || document.documentElement;
  return {{
    url: window.location.href,
    title: document.title,
    viewport: {{ width: window.innerWidth, height: window.innerHeight }},
    scroll: {{ offsetY: window.scrollY, totalHeight: document.documentElement.scrollHeight }},
    root: root ? walk(root, 0) : null,
  }};
}})()"#,
        mark = ID_ATTRIBUTE,
        max_depth = limits.max_depth,
        raw_cap = limits.raw_node_cap,
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

impl Viewport {
    fn intersects(&self, r: &Rect) -> bool {
        r.bottom > 0.0 && r.top < self.height && r.right > 0.0 && r.left < self.width
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScroll {
    pub offset_y: f64,
    pub total_height: f64,
}

/// One element as reported by the in-page walker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawElement {
    pub tag: String,
    pub id_attr: String,
    pub class_name: String,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub aria_hidden: bool,
    pub hidden: bool,
    pub position: String,
    pub rect: Rect,
    pub text: String,
    pub interaction_id: Option<u32>,
    pub input_type: Option<String>,
    pub input_value: Option<String>,
    pub children: Vec<RawElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDocument {
    pub url: String,
    pub title: String,
    pub viewport: Viewport,
    pub scroll: RawScroll,
    pub root: Option<RawElement>,
}

/// Assigns a node to a page region from its own tag, role, id/class and layout.
///
/// Returns `None` when nothing matches; the caller then inherits the
/// nearest classified ancestor.
pub fn classify_section(el: &RawElement, viewport: &Viewport) -> Option<Section> {
    let tag = el.tag.as_str();
    let role = el.role.as_deref().unwrap_or("").trim().to_ascii_lowercase();

    if tag == "header" || role == "banner" {
        return Some(Section::Header);
    }
    if tag == "footer" || role == "contentinfo" {
        return Some(Section::Footer);
    }
    if tag == "nav" || role == "navigation" {
        return Some(Section::Navigation);
    }
    if tag == "main" || role == "main" {
        return Some(Section::Main);
    }

    let hints = format!("{} {}", el.id_attr, el.class_name).to_ascii_lowercase();
    if tag == "aside" || role == "complementary" || SIDEBAR_HINTS.iter().any(|h| hints.contains(h)) {
        return Some(Section::Sidebar);
    }
    if tag == "dialog"
        || role == "dialog"
        || role == "alertdialog"
        || POPUP_HINTS.iter().any(|h| hints.contains(h))
    {
        return Some(Section::Popups);
    }

    let pinned = matches!(el.position.as_str(), "fixed" | "sticky");
    if pinned && el.rect.width >= viewport.width * WIDE_RATIO {
        if el.rect.top <= EDGE_TOLERANCE {
            return Some(Section::Header);
        }
        if el.rect.bottom >= viewport.height - EDGE_TOLERANCE {
            return Some(Section::Footer);
        }
    }
    None
}

/// Depth-first construction of the semantic tree from a [`RawDocument`].
pub struct SnapshotBuilder<'a> {
    limits: &'a SnapshotLimits,
    viewport: Viewport,
    materialized: usize,
    // Slots are reserved in pre-order so buckets keep first-encountered order.
    buckets: BTreeMap<Section, Vec<Option<SemanticNode>>>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(limits: &'a SnapshotLimits, viewport: Viewport) -> Self {
        Self {
            limits,
            viewport,
            materialized: 0,
            buckets: BTreeMap::new(),
        }
    }

    pub fn build(limits: &SnapshotLimits, doc: RawDocument) -> PageSnapshot {
        let mut builder = SnapshotBuilder::new(limits, doc.viewport);

        let mut leftovers = Vec::new();
        if let Some(root) = &doc.root {
            for child in &root.children {
                if let Some(node) = builder.build_tree(child, 1, None) {
                    leftovers.push(node);
                }
            }
        }

        let mut sections: BTreeMap<Section, Vec<SemanticNode>> = builder
            .buckets
            .into_iter()
            .map(|(section, slots)| (section, slots.into_iter().flatten().collect::<Vec<_>>()))
            .filter(|(_, nodes)| !nodes.is_empty())
            .collect();
        if !leftovers.is_empty() {
            sections.entry(Section::Other).or_default().append(&mut leftovers);
        }

        let scroll = scroll_info(&doc.scroll, &doc.viewport);
        tracing::debug!(
            target: "pilot::dom",
            nodes = builder.materialized,
            sections = sections.len(),
            "snapshot built"
        );

        PageSnapshot {
            url: doc.url,
            title: doc.title,
            scroll,
            sections,
        }
    }

    fn reserve(&mut self, section: Section) -> (Section, usize) {
        let slots = self.buckets.entry(section).or_default();
        slots.push(None);
        (section, slots.len() - 1)
    }

    /// Returns the node to attach under its structural parent, or `None` when
    /// it was pruned, capped, or moved into a section bucket.
    pub fn build_tree(
        &mut self,
        el: &RawElement,
        depth: usize,
        inherited: Option<Section>,
    ) -> Option<SemanticNode> {
        // Leaves room for every open ancestor, so parents of capped
        // subtrees can still materialize without passing the cap.
        if self.materialized + depth > self.limits.max_nodes || depth > self.limits.max_depth {
            return None;
        }
        if NON_VISUAL.contains(&el.tag.as_str()) || el.hidden || el.aria_hidden {
            return None;
        }

        let in_viewport = self.viewport.intersects(&el.rect);
        let fold = self.viewport.height * self.limits.fold_viewports;
        if !in_viewport && el.rect.top > fold {
            return None;
        }

        // A region nested in a region of the same kind stays in place.
        let own = if depth <= self.limits.section_depth {
            classify_section(el, &self.viewport).filter(|s| Some(*s) != inherited)
        } else {
            None
        };
        let slot = own.map(|section| self.reserve(section));
        let current = own.or(inherited);

        let mut children: Vec<SemanticNode> = el
            .children
            .iter()
            .filter_map(|child| self.build_tree(child, depth + 1, current))
            .collect();

        let text = truncate(el.text.trim(), self.limits.text_cap);
        let role = non_empty(&el.role);
        let label = non_empty(&el.aria_label).or_else(|| non_empty(&el.title));
        let interactive = el.interaction_id.is_some();
        let heading = matches!(el.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6");
        let notable = role
            .as_deref()
            .is_some_and(|r| NOTABLE_ROLES.contains(&r.to_ascii_lowercase().as_str()));

        let interesting = interactive
            || heading
            || !text.is_empty()
            || !children.is_empty()
            || notable
            || label.is_some();
        if !interesting {
            return None;
        }

        let passthrough = !interactive
            && label.is_none()
            && role.is_none()
            && text.is_empty()
            && children.len() == 1
            && own.is_none();
        if passthrough {
            return children.pop();
        }

        self.materialized += 1;

        let node = SemanticNode {
            tag: el.tag.clone(),
            interaction_id: el.interaction_id,
            text,
            role,
            label,
            in_viewport,
            input_type: el.input_type.clone(),
            input_value: el.input_value.clone(),
            children,
        };

        match slot {
            Some((section, idx)) => {
                if let Some(place) = self.buckets.get_mut(&section).and_then(|s| s.get_mut(idx)) {
                    *place = Some(node);
                }
                None
            }
            None => Some(node),
        }
    }
}

fn scroll_info(scroll: &RawScroll, viewport: &Viewport) -> ScrollInfo {
    let scrollable = (scroll.total_height - viewport.height).max(1.0);
    let percentage = (scroll.offset_y / scrollable * 100.0).clamp(0.0, 100.0).round() as u32;
    ScrollInfo {
        offset_y: scroll.offset_y,
        percentage,
        total_height: scroll.total_height,
    }
}

fn truncate(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Re-marks the document and builds a fresh snapshot.
///
/// Identifiers from any earlier snapshot are invalid once this returns.
pub async fn capture_snapshot(page: &dyn PageHandle, limits: &SnapshotLimits) -> PilotResult<PageSnapshot> {
    let value = page
        .evaluate(&snapshot_script(limits))
        .await
        .map_err(|e| PilotError::DocumentUnavailable(e.to_string()))?;
    if value.is_null() {
        return Err(PilotError::DocumentUnavailable("snapshot script returned nothing".into()));
    }
    let doc: RawDocument = serde_json::from_value(value)
        .map_err(|e| PilotError::DocumentUnavailable(format!("malformed snapshot: {e}")))?;
    if doc.root.is_none() {
        return Err(PilotError::DocumentUnavailable("document has no body".into()));
    }
    Ok(SnapshotBuilder::build(limits, doc))
}
