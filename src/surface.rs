//! Contract for the interactive surface the agent drives.
//!
//! The concrete browser implementation lives in the binary; the core only
//! talks to these traits.

use async_trait::async_trait;

use crate::error::SurfaceError;

#[async_trait]
pub trait Surface: Send {
    /// Describe the current page: location, title and interactive elements.
    async fn extract_state(&mut self) -> Result<String, SurfaceError>;

    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    async fn click_element(&mut self, description: &str) -> Result<(), SurfaceError>;

    async fn type_text(&mut self, description: &str, text: &str) -> Result<(), SurfaceError>;

    async fn scroll_page(&mut self) -> Result<(), SurfaceError>;

    async fn wait(&mut self, seconds: u64);

    async fn close(&mut self) -> Result<(), SurfaceError>;
}

/// Hands out independent surface handles, one per worker.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn new_surface(&self) -> Result<Box<dyn Surface>, SurfaceError>;
}

/// Prefix bare hosts with `https://`.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url(" https://a.b/c "), "https://a.b/c");
    }
}
