//! The twelve locate strategies, in chain order:
//!
//! 1. exact visible text
//! 2. case-insensitive partial text
//! 3. placeholder
//! 4. aria-label / aria-labelledby
//! 5. buttons by text
//! 6. links by text, then href
//! 7. input type keywords
//! 8. CSS class keywords
//! 9. data-* attributes
//! 10. ARIA role keywords
//! 11. form submit controls
//! 12. any clickable element

use regex::RegexBuilder;

use super::{LocateStrategy, Query};
use crate::page::{PageElement, PageSnapshot};

pub fn default_chain() -> Vec<Box<dyn LocateStrategy>> {
    vec![
        Box::new(ExactText),
        Box::new(PartialText),
        Box::new(Placeholder),
        Box::new(AriaLabel),
        Box::new(ButtonText),
        Box::new(LinkText),
        Box::new(InputType),
        Box::new(CssClass),
        Box::new(DataAttribute),
        Box::new(AriaRole),
        Box::new(FormControl),
        Box::new(Generic),
    ]
}

/// Description keywords mapped to an input `type`. `hints` additionally
/// require the element's name or id to mention one of them.
pub struct InputRule {
    pub keywords: &'static [&'static str],
    pub input_type: &'static str,
    pub hints: &'static [&'static str],
}

pub const INPUT_RULES: &[InputRule] = &[
    InputRule {
        keywords: &["search", "find", "query"],
        input_type: "search",
        hints: &[],
    },
    InputRule {
        keywords: &["password", "pass", "pwd"],
        input_type: "password",
        hints: &[],
    },
    InputRule {
        keywords: &["email", "e-mail", "mail"],
        input_type: "email",
        hints: &[],
    },
    InputRule {
        keywords: &["username", "user name", "login", "user"],
        input_type: "text",
        hints: &["user", "login"],
    },
];

/// Description keywords mapped to a substring of the `class` attribute.
pub const CLASS_RULES: &[(&[&str], &str)] = &[
    (&["login", "signin", "sign in", "log in"], "login"),
    (&["close", "cancel", "dismiss"], "close"),
    (&["search"], "search"),
    (&["submit"], "submit"),
    (&["menu"], "menu"),
    (&["cart", "basket"], "cart"),
    (&["next"], "next"),
];

/// Description keywords mapped to an exact ARIA `role`.
pub const ROLE_RULES: &[(&[&str], &str)] = &[
    (&["search"], "searchbox"),
    (&["checkbox", "check box"], "checkbox"),
    (&["textbox", "text box", "text field"], "textbox"),
    (&["button"], "button"),
    (&["link"], "link"),
    (&["menu"], "menu"),
    (&["tab"], "tab"),
    (&["dialog", "modal"], "dialog"),
];

pub const DATA_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-qa",
    "data-test",
    "data-id",
    "data-action",
    "data-target",
    "data-role",
];

const FORM_KEYWORDS: &[&str] = &["form", "submit", "send"];

const GENERIC_ATTRIBUTES: &[&str] = &["title", "aria-label", "placeholder", "value"];

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    !haystack.is_empty() && haystack.to_lowercase().contains(lowered_needle)
}

fn attr_contains(el: &PageElement, name: &str, lowered_needle: &str) -> bool {
    el.attr(name)
        .is_some_and(|value| contains_ci(value, lowered_needle))
}

pub struct ExactText;

impl LocateStrategy for ExactText {
    fn name(&self) -> &'static str {
        "exact_text"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query.first_match(page, |el| el.text.trim() == query.description)
    }
}

pub struct PartialText;

impl LocateStrategy for PartialText {
    fn name(&self) -> &'static str {
        "partial_text"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        let pattern = RegexBuilder::new(&regex::escape(query.description))
            .case_insensitive(true)
            .build()
            .ok()?;
        query.first_match(page, |el| pattern.is_match(el.text.trim()))
    }
}

pub struct Placeholder;

impl LocateStrategy for Placeholder {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query.first_match(page, |el| attr_contains(el, "placeholder", &query.lowered))
    }
}

pub struct AriaLabel;

impl LocateStrategy for AriaLabel {
    fn name(&self) -> &'static str {
        "aria_label"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query.first_match(page, |el| {
            attr_contains(el, "aria-label", &query.lowered)
                || attr_contains(el, "aria-labelledby", &query.lowered)
        })
    }
}

pub struct ButtonText;

impl LocateStrategy for ButtonText {
    fn name(&self) -> &'static str {
        "button"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query.first_match(page, |el| el.is_button() && contains_ci(el.label(), &query.lowered))
    }
}

pub struct LinkText;

impl LocateStrategy for LinkText {
    fn name(&self) -> &'static str {
        "link"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query
            .first_match(page, |el| el.tag == "a" && contains_ci(el.label(), &query.lowered))
            .or_else(|| {
                query.first_match(page, |el| el.tag == "a" && attr_contains(el, "href", &query.lowered))
            })
    }
}

pub struct InputType;

impl LocateStrategy for InputType {
    fn name(&self) -> &'static str {
        "input_type"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        INPUT_RULES
            .iter()
            .filter(|rule| query.mentions(rule.keywords))
            .find_map(|rule| {
                query.first_match(page, |el| {
                    el.tag == "input"
                        && input_type_or_text(el) == rule.input_type
                        && (rule.hints.is_empty()
                            || rule.hints.iter().any(|hint| {
                                attr_contains(el, "name", hint) || attr_contains(el, "id", hint)
                            }))
                })
            })
    }
}

fn input_type_or_text(el: &PageElement) -> String {
    match el.input_type() {
        kind if kind.is_empty() => "text".to_string(),
        kind => kind,
    }
}

pub struct CssClass;

impl LocateStrategy for CssClass {
    fn name(&self) -> &'static str {
        "css_class"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        CLASS_RULES
            .iter()
            .filter(|(keywords, _)| query.mentions(keywords))
            .find_map(|(_, class)| query.first_match(page, |el| attr_contains(el, "class", class)))
    }
}

pub struct DataAttribute;

impl LocateStrategy for DataAttribute {
    fn name(&self) -> &'static str {
        "data_attribute"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        let normalized = query.lowered.replace(' ', "-");
        query.first_match(page, |el| {
            DATA_ATTRIBUTES
                .iter()
                .any(|name| attr_contains(el, name, &normalized))
        })
    }
}

pub struct AriaRole;

impl LocateStrategy for AriaRole {
    fn name(&self) -> &'static str {
        "aria_role"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        ROLE_RULES
            .iter()
            .filter(|(keywords, _)| query.mentions(keywords))
            .find_map(|(_, role)| query.first_match(page, |el| el.role() == *role))
    }
}

pub struct FormControl;

impl LocateStrategy for FormControl {
    fn name(&self) -> &'static str {
        "form"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        if !query.mentions(FORM_KEYWORDS) {
            return None;
        }
        query
            .first_match(page, |el| {
                matches!(el.tag.as_str(), "button" | "input") && el.input_type() == "submit"
            })
            .or_else(|| query.first_match(page, |el| el.in_form && el.is_button()))
    }
}

pub struct Generic;

impl LocateStrategy for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement> {
        query.first_match(page, |el| {
            el.clickable
                && (contains_ci(el.text.trim(), &query.lowered)
                    || GENERIC_ATTRIBUTES
                        .iter()
                        .any(|name| attr_contains(el, name, &query.lowered)))
        })
    }
}
