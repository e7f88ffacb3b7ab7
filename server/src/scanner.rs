use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;

/// Path prefix every uploaded image is served under.
pub const UPLOAD_PREFIX: &str = "/uploads/";

/// Extracts references to uploaded images from rich-text content.
///
/// Matching is a plain pattern search over quoted `src` attributes, so broken
/// markup never fails a scan; it only yields fewer matches. Every hit is
/// returned in the form the image registry stores, `<base_url>/uploads/<name>`,
/// whether the markup used the absolute or the site-relative form.
#[derive(Clone, Debug)]
pub struct ContentScanner {
    re: Regex,
    base: String,
}

impl ContentScanner {
    /// Build a scanner that accepts site-relative `/uploads/...` sources and,
    /// when `base_url` is non-empty, the same sources prefixed by it.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("(?:{})?", regex::escape(base))
        };
        let pattern = format!(
            r#"(?:^|\s)(?i:src)\s*=\s*["']{prefix}({}[^"'\s<>]+)["']"#,
            regex::escape(UPLOAD_PREFIX)
        );
        Ok(Self {
            re: Regex::new(&pattern)?,
            base: base.to_string(),
        })
    }

    /// Registry URL of an upload stored as `filename`.
    pub fn url_for(&self, filename: &str) -> String {
        format!("{}{}{}", self.base, UPLOAD_PREFIX, filename)
    }

    /// Return the distinct upload URLs referenced by `content`, sorted.
    pub fn scan(&self, content: &str) -> BTreeSet<String> {
        self.re
            .captures_iter(content)
            .filter_map(|cap| cap.get(1))
            .map(|path| format!("{}{}", self.base, path.as_str()))
            .collect()
    }
}
