//! Dialogue requests and the dialogue-box collaborator.
//!
//! The runtime only needs four things from a dialogue box: queue a page,
//! skip the current page, report whether anything is left, and advance its
//! own reveal timing. Layout and drawing belong to whoever implements
//! [`DialogueBox`]; [`HeadlessDialogue`] is the in-repo implementation used by
//! the CLI and the tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Seconds per revealed glyph when a request does not say otherwise.
pub const DEFAULT_GLYPH_REVEAL_DELAY: f32 = 0.05;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogueOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glyph_reveal_delay: Option<f32>,
}

impl DialogueOptions {
    /// Centered page, as used for titles and endings.
    pub fn centered(background_color: Option<String>) -> Self {
        DialogueOptions {
            anchor_y: Some(0.5),
            background_color,
            ..Default::default()
        }
    }

    /// Fixed style for script failures and the missing-avatar message.
    pub fn error() -> Self {
        DialogueOptions {
            anchor_y: Some(0.5),
            panel_color: Some("#ff0000".to_string()),
            text_color: Some("#ffffff".to_string()),
            glyph_reveal_delay: Some(0.0),
            ..Default::default()
        }
    }

    /// Fills every unset option from `defaults`.
    pub fn or(self, defaults: DialogueOptions) -> Self {
        DialogueOptions {
            anchor_y: self.anchor_y.or(defaults.anchor_y),
            background_color: self.background_color.or(defaults.background_color),
            panel_color: self.panel_color.or(defaults.panel_color),
            text_color: self.text_color.or(defaults.text_color),
            glyph_reveal_delay: self.glyph_reveal_delay.or(defaults.glyph_reveal_delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueRequest {
    pub text: String,
    pub options: DialogueOptions,
}

impl DialogueRequest {
    /// Builds a request, resolving emphasis markup into style tags.
    pub fn new(text: &str, options: DialogueOptions) -> Self {
        DialogueRequest {
            text: resolve_emphasis(text),
            options,
        }
    }
}

fn emphasis_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"##([^#]+)##", "shk"),
            (r"~~([^~]+)~~", "wvy"),
            (r"==([^=]+)==", "rbw"),
            (r"__([^_]+)__", "clr"),
        ]
        .into_iter()
        .filter_map(|(pattern, tag)| Regex::new(pattern).ok().map(|regex| (regex, tag)))
        .collect()
    })
}

/// Rewrites `##shake##`, `~~wavy~~`, `==rainbow==` and `__underline__` spans
/// into `{+tag}..{-tag}` pairs understood by dialogue renderers.
pub fn resolve_emphasis(text: &str) -> String {
    let mut resolved = text.to_string();
    for (regex, tag) in emphasis_rules() {
        let replacement = format!("{{+{tag}}}${{1}}{{-{tag}}}");
        resolved = regex
            .replace_all(&resolved, replacement.as_str())
            .into_owned();
    }
    resolved
}

pub trait DialogueBox {
    fn queue(&mut self, request: DialogueRequest);
    /// Drops the current page; the next queued page (if any) becomes current.
    fn skip(&mut self);
    fn is_empty(&self) -> bool;
    fn current(&self) -> Option<&DialogueRequest>;
    fn clear(&mut self);
    fn update(&mut self, _dt: f64) {}
}

impl fmt::Debug for dyn DialogueBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialogueBox")
    }
}

#[derive(Debug, Clone)]
struct Page {
    request: DialogueRequest,
    elapsed: f64,
}

impl Page {
    fn glyph_count(&self) -> usize {
        self.request.text.chars().count()
    }

    fn revealed_glyphs(&self) -> usize {
        let delay = self
            .request
            .options
            .glyph_reveal_delay
            .unwrap_or(DEFAULT_GLYPH_REVEAL_DELAY);
        if delay <= 0.0 {
            return self.glyph_count();
        }
        let revealed = (self.elapsed / f64::from(delay)).floor() as usize;
        revealed.min(self.glyph_count())
    }
}

/// Page queue without any drawing. Reveal pacing is tracked so callers can
/// ask how much of the current page is visible.
#[derive(Debug, Default)]
pub struct HeadlessDialogue {
    pages: VecDeque<Page>,
    shown: Vec<DialogueRequest>,
}

impl HeadlessDialogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request ever queued, in order.
    pub fn shown(&self) -> &[DialogueRequest] {
        &self.shown
    }

    pub fn pending(&self) -> usize {
        self.pages.len()
    }

    /// Portion of the current page revealed so far.
    pub fn visible_text(&self) -> Option<String> {
        let page = self.pages.front()?;
        Some(page.request.text.chars().take(page.revealed_glyphs()).collect())
    }
}

impl DialogueBox for HeadlessDialogue {
    fn queue(&mut self, request: DialogueRequest) {
        self.shown.push(request.clone());
        self.pages.push_back(Page {
            request,
            elapsed: 0.0,
        });
    }

    fn skip(&mut self) {
        self.pages.pop_front();
    }

    fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn current(&self) -> Option<&DialogueRequest> {
        self.pages.front().map(|page| &page.request)
    }

    fn clear(&mut self) {
        self.pages.clear();
    }

    fn update(&mut self, dt: f64) {
        if let Some(page) = self.pages.front_mut() {
            page.elapsed += dt;
        }
    }
}
