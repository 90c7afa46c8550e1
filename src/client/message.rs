//! Chat message model and markdown-lite rendering

use crate::client::util::now_millis;
use crate::error::{Error, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender: Sender,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            text: text.into(),
            sender,
            timestamp: now_millis(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, Sender::User)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, Sender::Assistant)
    }

    pub fn contains_code(&self) -> bool {
        contains_code(&self.text)
    }

    pub fn to_html(&self) -> String {
        format_message_html(&self.text)
    }
}

/// Escape the five HTML-significant characters
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether the text holds a fenced code block, closed or still open
pub fn contains_code(text: &str) -> bool {
    text.contains("```")
}

/// Render message text as HTML.
///
/// All input is escaped before any markup is produced, so the only tags
/// in the output are the ones generated here. Links are only produced for
/// `http`, `https` and `mailto` targets; anything else stays as text.
pub fn format_message_html(text: &str) -> String {
    static RENDERER: OnceLock<Option<MarkdownRenderer>> = OnceLock::new();

    let renderer = RENDERER.get_or_init(|| match MarkdownRenderer::new() {
        Ok(renderer) => Some(renderer),
        Err(e) => {
            tracing::error!("Failed to build markdown renderer: {}", e);
            None
        }
    });

    match renderer {
        Some(renderer) => renderer.render(text),
        None => escape_html(text).replace('\n', "<br>"),
    }
}

/// Compiled markdown-lite rules
pub struct MarkdownRenderer {
    code_block: Regex,
    inline_code: Regex,
    link: Regex,
    link_target: Regex,
    bold_stars: Regex,
    bold_underscores: Regex,
    italic_star: Regex,
    italic_underscore: Regex,
    h3: Regex,
    h2: Regex,
    h1: Regex,
    placeholder: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Config(format!("Invalid markdown pattern '{}': {}", name, e)))
}

impl MarkdownRenderer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            code_block: compile("code_block", r"(?s)```(\w+)?\n?(.*?)```")?,
            inline_code: compile("inline_code", r"`([^`\n]*)`")?,
            link: compile(
                "link",
                r"\[([^\]\n]+)\]\(((?:[^()\s]|\([^()\s]*\))+)\)",
            )?,
            link_target: compile("link_target", r"(?i)^(https?://|mailto:)")?,
            bold_stars: compile("bold_stars", r"\*\*(.+?)\*\*")?,
            bold_underscores: compile("bold_underscores", r"__(.+?)__")?,
            italic_star: compile("italic_star", r"\*(.+?)\*")?,
            italic_underscore: compile("italic_underscore", r"_(.+?)_")?,
            h3: compile("h3", r"(?m)^### (.*)$")?,
            h2: compile("h2", r"(?m)^## (.*)$")?,
            h1: compile("h1", r"(?m)^# (.*)$")?,
            placeholder: compile("placeholder", "\u{0}(\\d+)\u{0}")?,
        })
    }

    pub fn render(&self, text: &str) -> String {
        let mut protected: Vec<String> = Vec::new();
        // NUL delimits placeholders; it never survives from the input
        let mut out = escape_html(&text.replace('\u{0}', ""));

        // Code and links are swapped for placeholders so later rules leave them alone
        out = self
            .code_block
            .replace_all(&out, |caps: &Captures| {
                let lang = caps.get(1).map_or("text", |m| m.as_str());
                let code = caps.get(2).map_or("", |m| m.as_str());
                protect(
                    &mut protected,
                    format!("<pre><code class=\"language-{}\">{}</code></pre>", lang, code),
                )
            })
            .into_owned();

        out = self
            .inline_code
            .replace_all(&out, |caps: &Captures| {
                protect(&mut protected, format!("<code>{}</code>", &caps[1]))
            })
            .into_owned();

        out = self
            .link
            .replace_all(&out, |caps: &Captures| {
                if !self.link_target.is_match(&caps[2]) {
                    return caps[0].to_string();
                }
                protect(
                    &mut protected,
                    format!("<a href=\"{}\" target=\"_blank\">{}</a>", &caps[2], &caps[1]),
                )
            })
            .into_owned();

        out = self
            .bold_stars
            .replace_all(&out, "<strong>$1</strong>")
            .into_owned();
        out = self
            .bold_underscores
            .replace_all(&out, "<strong>$1</strong>")
            .into_owned();
        out = self.italic_star.replace_all(&out, "<em>$1</em>").into_owned();
        out = self
            .italic_underscore
            .replace_all(&out, "<em>$1</em>")
            .into_owned();

        out = self.h3.replace_all(&out, "<h3>$1</h3>").into_owned();
        out = self.h2.replace_all(&out, "<h2>$1</h2>").into_owned();
        out = self.h1.replace_all(&out, "<h1>$1</h1>").into_owned();

        out = out.replace('\n', "<br>");

        self.placeholder
            .replace_all(&out, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| protected.get(i).cloned())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn protect(protected: &mut Vec<String>, html: String) -> String {
    protected.push(html);
    format!("\u{0}{}\u{0}", protected.len() - 1)
}
