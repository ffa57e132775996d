//! Structured view of the current page, as captured by the surface driver.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// One element of interest on the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    /// Identifier the snapshot script stamped on the node (`data-eid`).
    pub eid: String,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub in_form: bool,
    #[serde(default)]
    pub clickable: bool,
}

impl PageElement {
    pub fn new(eid: impl Into<String>, tag: &str, text: impl Into<String>) -> Self {
        Self {
            eid: eid.into(),
            tag: tag.to_ascii_lowercase(),
            text: text.into(),
            visible: true,
            enabled: true,
            clickable: matches!(tag, "a" | "button" | "input" | "select" | "textarea"),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn in_form(mut self) -> Self {
        self.in_form = true;
        self
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Lowercased `type` attribute, empty when absent.
    pub fn input_type(&self) -> String {
        self.attr("type").unwrap_or_default().to_ascii_lowercase()
    }

    pub fn role(&self) -> String {
        self.attr("role").unwrap_or_default().to_ascii_lowercase()
    }

    /// Text a user would read on the element; falls back to `value` for
    /// input buttons.
    pub fn label(&self) -> &str {
        let text = self.text.trim();
        if text.is_empty() {
            self.attr("value").unwrap_or_default()
        } else {
            text
        }
    }

    pub fn is_button(&self) -> bool {
        self.tag == "button"
            || self.role() == "button"
            || (self.tag == "input"
                && matches!(self.input_type().as_str(), "button" | "submit" | "reset"))
    }

    pub fn is_fillable(&self) -> bool {
        self.tag == "textarea"
            || (self.tag == "input"
                && !matches!(
                    self.input_type().as_str(),
                    "button" | "submit" | "reset" | "checkbox" | "radio" | "hidden" | "image"
                ))
    }

    /// CSS selector that addresses this element on the live page.
    pub fn selector(&self) -> String {
        format!("[data-eid=\"{}\"]", self.eid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub elements: Vec<PageElement>,
    #[serde(default)]
    pub headings: Vec<String>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_element(mut self, element: PageElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.headings.push(heading.into());
        self
    }

    /// Human-readable description handed to the decision service.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "Current URL: {}\n\n", self.url);
        if !self.title.is_empty() {
            let _ = write!(out, "Page Title: {}\n\n", self.title);
        }
        out.push_str("=== INTERACTIVE ELEMENTS ===\n");

        let visible = || {
            self.elements
                .iter()
                .filter(|el| el.visible && !el.label().is_empty())
        };

        out.push_str("\n--- BUTTONS ---\n");
        for el in visible().filter(|el| el.is_button()) {
            let _ = writeln!(out, "- {}", el.label());
        }

        out.push_str("\n--- LINKS ---\n");
        for el in visible().filter(|el| el.tag == "a") {
            let _ = writeln!(out, "- {}", el.label());
        }

        out.push_str("\n--- FORM ELEMENTS ---\n");
        for el in self
            .elements
            .iter()
            .filter(|el| el.visible && el.is_fillable())
        {
            let label = [el.label(), el.attr("placeholder").unwrap_or_default()]
                .into_iter()
                .find(|s| !s.is_empty())
                .or(el.attr("aria-label"))
                .unwrap_or_default();
            let kind = match el.input_type() {
                kind if kind.is_empty() => el.tag.clone(),
                kind => kind,
            };
            let _ = writeln!(out, "- {label} [{kind}]");
        }

        if !self.headings.is_empty() {
            out.push_str("\n--- HEADINGS ---\n");
            for heading in &self.headings {
                let _ = writeln!(out, "- {heading}");
            }
        }

        out
    }
}
