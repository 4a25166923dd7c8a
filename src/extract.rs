use serde::{Deserialize, Serialize};

use crate::dom::{Dom, NodeId};

/// Display type of a captured control, normalized from the declared
/// `type` attribute (or the tag for select/textarea).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Email,
    Password,
    Phone,
    Number,
    Date,
    Datetime,
    Time,
    Url,
    Search,
    Checkbox,
    Radio,
    File,
    Color,
    Range,
    Select,
    Textarea,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Password => "password",
            FieldType::Phone => "phone",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Time => "time",
            FieldType::Url => "url",
            FieldType::Search => "search",
            FieldType::Checkbox => "checkbox",
            FieldType::Radio => "radio",
            FieldType::File => "file",
            FieldType::Color => "color",
            FieldType::Range => "range",
            FieldType::Select => "select",
            FieldType::Textarea => "textarea",
        }
    }

    pub fn parse(s: &str) -> FieldType {
        match s {
            "email" => FieldType::Email,
            "password" => FieldType::Password,
            "phone" => FieldType::Phone,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "time" => FieldType::Time,
            "url" => FieldType::Url,
            "search" => FieldType::Search,
            "checkbox" => FieldType::Checkbox,
            "radio" => FieldType::Radio,
            "file" => FieldType::File,
            "color" => FieldType::Color,
            "range" => FieldType::Range,
            "select" => FieldType::Select,
            "textarea" => FieldType::Textarea,
            _ => FieldType::Text,
        }
    }
}

/// One interactive control found on a page, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldObservation {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(rename = "id")]
    pub element_id: String,
    pub placeholder: String,
    pub required: bool,
}

const CONTROL_TAGS: &[&str] = &["input", "select", "textarea"];

// Control kinds that never produce an observation.
const SKIPPED_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "image"];

/// Walk the tree (shadow subtrees included) and yield one observation per
/// eligible filled control. Lazy and single-pass; re-invoke to restart.
pub fn extract(dom: &Dom) -> FieldIter<'_> {
    FieldIter {
        dom,
        stack: vec![dom.root()],
    }
}

/// Explicit-worklist traversal, so nesting depth never touches the call
/// stack. Each node is pushed exactly once.
pub struct FieldIter<'a> {
    dom: &'a Dom,
    stack: Vec<NodeId>,
}

impl Iterator for FieldIter<'_> {
    type Item = FieldObservation;

    fn next(&mut self) -> Option<FieldObservation> {
        while let Some(id) = self.stack.pop() {
            for &child in self.dom.children(id).iter().rev() {
                self.stack.push(child);
            }
            // Shadow subtree visits before light children
            if let Some(shadow) = self.dom.shadow_root(id) {
                self.stack.push(shadow);
            }
            if CONTROL_TAGS.contains(&self.dom.tag(id)) {
                if let Some(obs) = observe(self.dom, id) {
                    return Some(obs);
                }
            }
        }
        None
    }
}

fn observe(dom: &Dom, id: NodeId) -> Option<FieldObservation> {
    let tag = dom.tag(id);
    let declared = dom.attr(id, "type").unwrap_or("text").to_lowercase();

    let (field_type, value) = match tag {
        "select" => (FieldType::Select, selected_value(dom, id)),
        "textarea" => (FieldType::Textarea, dom.text_content(id)),
        _ => {
            if SKIPPED_TYPES.contains(&declared.as_str()) {
                return None;
            }
            let value = match declared.as_str() {
                "checkbox" => {
                    if dom.has_attr(id, "checked") { "true" } else { "false" }.to_string()
                }
                "radio" => {
                    if !dom.has_attr(id, "checked") {
                        return None;
                    }
                    dom.attr(id, "value").unwrap_or("").to_string()
                }
                _ => dom.attr(id, "value").unwrap_or("").to_string(),
            };
            (input_type(&declared), value)
        }
    };

    let value = value.trim().to_string();
    if value.is_empty() {
        return None;
    }

    Some(FieldObservation {
        name: field_name(dom, id, field_type),
        value,
        field_type,
        element_id: dom.attr(id, "id").unwrap_or("").to_string(),
        placeholder: dom.attr(id, "placeholder").unwrap_or("").to_string(),
        required: dom.has_attr(id, "required"),
    })
}

fn input_type(declared: &str) -> FieldType {
    match declared {
        "tel" => FieldType::Phone,
        "datetime-local" => FieldType::Datetime,
        other => FieldType::parse(other),
    }
}

/// Value of the selected option. Without an explicit `selected` attribute
/// the first option is the selection, as in a live DOM.
fn selected_value(dom: &Dom, select: NodeId) -> String {
    let options: Vec<NodeId> = dom
        .children(select)
        .iter()
        .copied()
        .filter(|&c| dom.tag(c) == "option")
        .collect();
    let chosen = options
        .iter()
        .copied()
        .find(|&o| dom.has_attr(o, "selected"))
        .or_else(|| options.first().copied());
    match chosen {
        Some(o) => match dom.attr(o, "value") {
            Some(v) => v.to_string(),
            None => dom.text_content(o).trim().to_string(),
        },
        None => String::new(),
    }
}

/// Best-effort identifier, first non-empty wins:
/// name attribute, element id, placeholder, associated label text,
/// declared type.
fn field_name(dom: &Dom, id: NodeId, field_type: FieldType) -> String {
    for attr in ["name", "id", "placeholder"] {
        if let Some(v) = dom.attr(id, attr) {
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    if let Some(text) = label_text(dom, id) {
        return text;
    }
    field_type.as_str().to_string()
}

/// Associated label, in order: `label[for]` match anywhere in the tree,
/// nearest ancestor label (stopping at body or a shadow boundary), then
/// an immediately preceding label sibling.
fn label_text(dom: &Dom, id: NodeId) -> Option<String> {
    if let Some(element_id) = dom.attr(id, "id").filter(|v| !v.is_empty()) {
        let matched = dom
            .ids()
            .find(|&n| dom.tag(n) == "label" && dom.attr(n, "for") == Some(element_id));
        if let Some(label) = matched {
            return non_empty_text(dom, label);
        }
    }

    let mut cursor = dom.parent(id);
    while let Some(ancestor) = cursor {
        if dom.tag(ancestor) == "body" {
            break;
        }
        if dom.tag(ancestor) == "label" {
            return non_empty_text(dom, ancestor);
        }
        cursor = dom.parent(ancestor);
    }

    let prev = dom.prev_sibling(id)?;
    if dom.tag(prev) == "label" {
        return non_empty_text(dom, prev);
    }
    None
}

fn non_empty_text(dom: &Dom, id: NodeId) -> Option<String> {
    let text = dom.text_content(id).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ── Tests ──
