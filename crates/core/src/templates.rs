//! Email template store: a name -> HTML mapping with literal placeholder
//! substitution.
//!
//! Placeholders `{{body}}`, `{{unsubscribe_url}}`, `{{subject}}` and
//! `{{preheader}}` are replaced verbatim, every occurrence; an unset value
//! substitutes the empty string, never the literal token.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Minimal built-in template registered under the fallback name when no
/// template directory is configured.
const BUILTIN_ANNOUNCEMENT: &str = r#"<!doctype html>
<html>
  <body>
    <span style="display:none">{{preheader}}</span>
    <h1>{{subject}}</h1>
    {{body}}
    <p><a href="{{unsubscribe_url}}">Unsubscribe</a></p>
  </body>
</html>
"#;

/// Immutable template registry, built once at startup.
pub struct TemplateStore {
    templates: HashMap<String, String>,
    fallback: String,
}

impl TemplateStore {
    /// Empty store with the built-in template registered under `fallback`.
    pub fn new(fallback: impl Into<String>) -> Self {
        let fallback = fallback.into();
        let mut templates = HashMap::new();
        templates.insert(fallback.clone(), BUILTIN_ANNOUNCEMENT.to_string());
        Self { templates, fallback }
    }

    /// Store backed by an explicit map, with no built-in registered.
    pub fn from_map(fallback: impl Into<String>, templates: HashMap<String, String>) -> Self {
        Self {
            templates,
            fallback: fallback.into(),
        }
    }

    /// Load every `*.html` file from `dir`, keyed by file stem. Files read
    /// later override the built-in fallback if they share its name.
    pub fn load_dir(fallback: impl Into<String>, dir: impl AsRef<Path>) -> EngineResult<Self> {
        let mut store = Self::new(fallback);
        let mut loaded = 0usize;
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let html = std::fs::read_to_string(&path)?;
            store.templates.insert(name.to_string(), html);
            loaded += 1;
        }
        info!(dir = %dir.as_ref().display(), loaded, "email templates loaded");
        Ok(store)
    }

    pub fn register(&mut self, name: impl Into<String>, html: impl Into<String>) {
        self.templates.insert(name.into(), html.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Resolve `name`, falling back to the configured default template.
    /// Errors only when the fallback itself is missing.
    pub fn get_or_fallback(&self, name: &str) -> EngineResult<&str> {
        self.templates
            .get(name)
            .or_else(|| self.templates.get(&self.fallback))
            .map(String::as_str)
            .ok_or_else(|| EngineError::Template(name.to_string()))
    }
}

/// Inject body, unsubscribe URL, subject, and preheader into template HTML.
pub fn render_email(
    template: &str,
    body: &str,
    unsubscribe_url: &str,
    subject: Option<&str>,
    preheader: Option<&str>,
) -> String {
    template
        .replace("{{body}}", body)
        .replace("{{unsubscribe_url}}", unsubscribe_url)
        .replace("{{subject}}", subject.unwrap_or(""))
        .replace("{{preheader}}", preheader.unwrap_or(""))
}
