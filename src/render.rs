//! Turns raw assistant text into display fragments.
//!
//! Nothing in here knows about widgets; `ui` maps the fragments onto iced.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::history::Source;

/// How long a code block shows "Copied!" after its copy button is pressed.
pub const COPY_FEEDBACK: Duration = Duration::from_secs(2);

static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(\w*)\n(.*?)```").ok());

static INLINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\*\*(?P<bold>.*?)\*\*|\*(?P<italic>.*?)\*|`(?P<code>[^`]+)`|(?P<br>\n)").ok()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Code { lang: String, code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Bold,
    Italic,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Span { text: String, style: Style },
    LineBreak,
}

/// Splits a message into text and fenced code fragments, in order.
pub fn parse_message(text: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut last = 0;

    let Some(fence) = CODE_FENCE.as_ref() else {
        if !text.is_empty() {
            fragments.push(Fragment::Text(text.to_string()));
        }
        return fragments;
    };

    for caps in fence.captures_iter(text) {
        let (Some(whole), Some(lang), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() > last {
            fragments.push(Fragment::Text(text[last..whole.start()].to_string()));
        }
        fragments.push(Fragment::Code {
            lang: lang.as_str().to_string(),
            code: body.as_str().trim().to_string(),
        });
        last = whole.end();
    }

    if last < text.len() {
        fragments.push(Fragment::Text(text[last..].to_string()));
    }
    fragments
}

/// Inline emphasis for a text fragment. The fragment is trimmed first.
pub fn parse_inline(text: &str) -> Vec<Inline> {
    let text = text.trim();
    let mut spans = Vec::new();
    let mut last = 0;

    fn push(spans: &mut Vec<Inline>, text: &str, style: Style) {
        if !text.is_empty() {
            spans.push(Inline::Span {
                text: text.to_string(),
                style,
            });
        }
    }

    let Some(inline) = INLINE.as_ref() else {
        push(&mut spans, text, Style::Plain);
        return spans;
    };

    for caps in inline.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        push(&mut spans, &text[last..whole.start()], Style::Plain);

        if let Some(m) = caps.name("bold") {
            push(&mut spans, m.as_str(), Style::Bold);
        } else if let Some(m) = caps.name("italic") {
            push(&mut spans, m.as_str(), Style::Italic);
        } else if let Some(m) = caps.name("code") {
            push(&mut spans, m.as_str(), Style::Code);
        } else if caps.name("br").is_some() {
            spans.push(Inline::LineBreak);
        }
        last = whole.end();
    }
    push(&mut spans, &text[last..], Style::Plain);
    spans
}

/// Decodes a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let (meta, payload) = url.strip_prefix("data:")?.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload.trim()).ok()
}

pub fn image_file_name(message_id: &str, index: usize) -> String {
    format!("ai-image-{}-{}.jpeg", message_id, index)
}

pub fn source_label(source: &Source) -> &str {
    if source.title.is_empty() {
        &source.uri
    } else {
        &source.title
    }
}

/// Only web links are handed to the system opener.
pub fn is_web_link(uri: &str) -> bool {
    let uri = uri.trim().to_ascii_lowercase();
    uri.starts_with("https://") || uri.starts_with("http://")
}

/// Identifies a code block: owning message id and fragment index.
pub type CodeBlockKey = (String, usize);

/// Tracks which code block currently shows the "Copied!" indicator.
#[derive(Debug, Default)]
pub struct CopyIndicator {
    current: Option<(CodeBlockKey, u64)>,
    generation: u64,
}

impl CopyIndicator {
    /// Marks a block as copied and returns the token that expires it.
    pub fn mark(&mut self, key: CodeBlockKey) -> u64 {
        self.generation += 1;
        self.current = Some((key, self.generation));
        self.generation
    }

    /// Clears the indicator unless a newer copy superseded `token`.
    pub fn expire(&mut self, token: u64) {
        if matches!(&self.current, Some((_, current)) if *current == token) {
            self.current = None;
        }
    }

    pub fn is_copied(&self, key: &CodeBlockKey) -> bool {
        matches!(&self.current, Some((current, _)) if current == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, style: Style) -> Inline {
        Inline::Span {
            text: text.to_string(),
            style,
        }
    }

    #[test]
    fn test_plain_message_is_one_fragment() {
        assert_eq!(
            parse_message("just words"),
            vec![Fragment::Text("just words".into())]
        );
        assert!(parse_message("").is_empty());
    }

    #[test]
    fn test_code_fences_split_in_order() {
        let text = "Here:\n```rust\nfn main() {}\n```\nand\n```\n  plain  \n```";
        assert_eq!(
            parse_message(text),
            vec![
                Fragment::Text("Here:\n".into()),
                Fragment::Code { lang: "rust".into(), code: "fn main() {}".into() },
                Fragment::Text("\nand\n".into()),
                Fragment::Code { lang: "".into(), code: "plain".into() },
            ]
        );
    }

    #[test]
    fn test_unterminated_fence_stays_text() {
        let text = "```python\nprint(1)";
        assert_eq!(parse_message(text), vec![Fragment::Text(text.into())]);
    }

    #[test]
    fn test_inline_emphasis() {
        assert_eq!(
            parse_inline("  a **bold** and *soft* `x + 1`\nnext  "),
            vec![
                span("a ", Style::Plain),
                span("bold", Style::Bold),
                span(" and ", Style::Plain),
                span("soft", Style::Italic),
                span(" ", Style::Plain),
                span("x + 1", Style::Code),
                Inline::LineBreak,
                span("next", Style::Plain),
            ]
        );
    }

    #[test]
    fn test_inline_without_markup() {
        assert_eq!(parse_inline("hello"), vec![span("hello", Style::Plain)]);
        assert!(parse_inline("   ").is_empty());
        // Emphasis does not span lines.
        assert_eq!(
            parse_inline("*a\nb*"),
            vec![
                span("*a", Style::Plain),
                Inline::LineBreak,
                span("b*", Style::Plain),
            ]
        );
    }

    #[test]
    fn test_data_url() {
        assert_eq!(
            decode_data_url("data:image/jpeg;base64,aGVsbG8="),
            Some(b"hello".to_vec())
        );
        assert_eq!(decode_data_url("data:text/plain,hello"), None);
        assert_eq!(decode_data_url("https://example.com/a.jpg"), None);
        assert_eq!(decode_data_url("data:image/jpeg;base64,@@@"), None);
    }

    #[test]
    fn test_source_label_falls_back_to_uri() {
        let titled = Source { uri: "http://a".into(), title: "A".into() };
        let bare = Source { uri: "http://b".into(), title: String::new() };
        assert_eq!(source_label(&titled), "A");
        assert_eq!(source_label(&bare), "http://b");
        assert_eq!(image_file_name("ai-12", 1), "ai-image-ai-12-1.jpeg");
    }

    #[test]
    fn test_only_web_links_open() {
        assert!(is_web_link("https://example.com/page"));
        assert!(is_web_link("HTTP://example.com"));
        assert!(!is_web_link("file:///etc/passwd"));
        assert!(!is_web_link("javascript:alert(1)"));
        assert!(!is_web_link("example.com"));
    }

    #[test]
    fn test_copy_indicator_reverts() {
        let mut copied = CopyIndicator::default();
        let key = ("ai-1".to_string(), 0);
        let token = copied.mark(key.clone());
        assert!(copied.is_copied(&key));
        copied.expire(token);
        assert!(!copied.is_copied(&key));
    }

    #[test]
    fn test_newer_copy_survives_older_expiry() {
        let mut copied = CopyIndicator::default();
        let first = ("ai-1".to_string(), 0);
        let second = ("ai-1".to_string(), 2);
        let old = copied.mark(first.clone());
        let new = copied.mark(second.clone());

        copied.expire(old);
        assert!(copied.is_copied(&second));
        assert!(!copied.is_copied(&first));
        copied.expire(new);
        assert!(!copied.is_copied(&second));
    }
}
