//! Per-domain authentication state observed during a browsing session.

use std::collections::HashMap;

use serde::Serialize;

/// Task words that suggest personal data behind a login (English and Russian).
const AUTH_KEYWORDS: &[&str] = &[
    "мой", "мои", "моё", "my", "личн", "профиль", "profile", "заказы", "orders", "покупки",
    "purchases", "история", "history", "сообщения", "messages", "настройки", "settings",
    "аккаунт", "account",
];

/// Page text that only shows up for a signed-in user.
const LOGGED_IN_MARKERS: &[&str] = &["logout", "log out", "sign out", "signout", "выйти"];

const URL_LINE_PREFIX: &str = "Current URL:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub domain: String,
    pub is_logged_in: bool,
    pub username: String,
    pub auth_required: bool,
}

/// At most one record per domain; last write wins.
#[derive(Debug, Default)]
pub struct AuthStateCache {
    states: HashMap<String, AuthState>,
}

impl AuthStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, url: &str, is_logged_in: bool, username: &str) {
        let domain = extract_domain(url);
        self.states.insert(
            domain.clone(),
            AuthState {
                domain,
                is_logged_in,
                username: username.to_string(),
                auth_required: false,
            },
        );
    }

    /// Stored state for `domain`, or a logged-out default.
    pub fn get(&self, domain: &str) -> AuthState {
        self.states.get(domain).cloned().unwrap_or_default()
    }

    /// Record what a rendered page state says about the current domain.
    /// Returns the domain when the state carried a URL.
    pub fn observe_page(&mut self, page_state: &str) -> Option<String> {
        let url = page_state
            .lines()
            .find_map(|line| line.trim().strip_prefix(URL_LINE_PREFIX))
            .map(str::trim)
            .filter(|url| !url.is_empty())?;

        let lowered = page_state.to_lowercase();
        let is_logged_in = LOGGED_IN_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker));
        let domain = extract_domain(url);
        let username = self
            .states
            .get(&domain)
            .filter(|state| state.is_logged_in && is_logged_in)
            .map(|state| state.username.clone())
            .unwrap_or_default();

        self.update(url, is_logged_in, &username);
        Some(domain)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Whether the task text mentions anything that usually needs a login.
pub fn requires_auth(task: &str) -> bool {
    let lowered = task.to_lowercase();
    AUTH_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Host segment of a URL: scheme and path stripped, port kept.
pub fn extract_domain(url: &str) -> String {
    let url = url.trim();
    match url.split_once("://") {
        Some((_, rest)) => rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
        None => url.to_string(),
    }
}
