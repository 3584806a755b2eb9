//! Constrained markup sanitization.
//!
//! Rich text is rebuilt token by token: text is escaped, tags on the policy's
//! allow-list are re-emitted with only their allowed attributes, everything
//! else is dropped. Script-capable elements and event-handler attributes are
//! removed no matter what the policy says.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::link::{sanitize_url, DEFAULT_ALLOWED_PROTOCOLS};
use super::HARD_DENIED_PROTOCOLS;

/// Elements removed regardless of policy.
const DENIED_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "form",
    "input", "button", "textarea", "select", "link", "meta", "base", "svg", "math",
];

/// Denied elements whose content is dropped along with them.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements that never take a closing tag.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "wbr", "area", "col", "source", "track"];

/// Attributes whose value is a URL.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "cite", "action", "formaction", "background", "poster"];

/// What rich text may contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizationPolicy {
    /// Tag names kept in the output (lowercase)
    pub allowed_tags: BTreeSet<String>,
    /// Attribute names kept on allowed tags (lowercase)
    pub allowed_attrs: BTreeSet<String>,
    /// URL schemes that invalidate an attribute value, in addition to the
    /// hard-denied ones
    pub forbidden_protocols: BTreeSet<String>,
    /// Maximum output length in characters
    pub max_length: usize,
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        let set = |items: &[&str]| -> BTreeSet<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        Self {
            allowed_tags: set(&[
                "a", "b", "blockquote", "br", "code", "em", "i", "li", "ol", "p", "pre", "strong", "ul",
            ]),
            allowed_attrs: set(&["href", "title"]),
            forbidden_protocols: set(HARD_DENIED_PROTOCOLS),
            max_length: 5000,
        }
    }
}

impl SanitizationPolicy {
    /// Replace the allowed tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tags = tags.into_iter().map(|t| t.into().to_ascii_lowercase()).collect();
        self
    }

    /// Replace the allowed attributes.
    pub fn with_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_attrs = attrs.into_iter().map(|a| a.into().to_ascii_lowercase()).collect();
        self
    }

    /// Replace the maximum output length.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

/// Sanitize constrained markup according to `policy`.
///
/// Never fails: malformed markup degrades to escaped text.
pub fn sanitize_rich_text(input: &str, policy: &SanitizationPolicy) -> String {
    let mut out = Output::new(policy.max_length);
    let mut rest = input;

    while !rest.is_empty() && !out.full {
        match rest.find('<') {
            None => {
                out.push_text(rest);
                break;
            }
            Some(0) => {}
            Some(i) => {
                out.push_text(&rest[..i]);
                rest = &rest[i..];
                continue;
            }
        }

        if rest.starts_with("<!--") {
            rest = skip_past(rest, "-->");
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            rest = skip_past(rest, ">");
            continue;
        }

        let Some((tag, consumed)) = Tag::parse(rest) else {
            out.push_text("<");
            rest = &rest[1..];
            continue;
        };
        rest = &rest[consumed..];

        if DENIED_ELEMENTS.contains(&tag.name.as_str()) {
            if !tag.closing && !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
                rest = skip_raw_text(rest, &tag.name);
            }
            continue;
        }

        if policy.allowed_tags.contains(&tag.name) {
            if tag.closing {
                out.close_tag(&tag.name);
            } else if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
                out.push_markup(&tag.render(policy));
            } else {
                out.open_tag(&tag.name, &tag.render(policy));
            }
        }
    }

    out.finish()
}

/// Bounded output buffer counting characters.
///
/// Room for the closing tag of every open element is reserved up front, so
/// the output is balanced and within `max` even when it is cut short.
struct Output {
    buf: String,
    used: usize,
    max: usize,
    full: bool,
    /// Open elements, innermost last
    open: Vec<String>,
    /// Characters needed to close everything in `open`
    reserved: usize,
}

fn closing_width(name: &str) -> usize {
    name.len() + 3
}

impl Output {
    fn new(max: usize) -> Self {
        Self {
            buf: String::new(),
            used: 0,
            max,
            full: false,
            open: Vec::new(),
            reserved: 0,
        }
    }

    fn fits(&self, width: usize) -> bool {
        self.used + self.reserved + width <= self.max
    }

    fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            let escaped = match c {
                '<' => "&lt;",
                '>' => "&gt;",
                _ => "",
            };
            let width = if escaped.is_empty() { 1 } else { escaped.len() };
            if !self.fits(width) {
                self.full = true;
                return;
            }
            if escaped.is_empty() {
                self.buf.push(c);
            } else {
                self.buf.push_str(escaped);
            }
            self.used += width;
        }
    }

    /// Markup is all or nothing so a tag is never cut in half.
    fn push_markup(&mut self, markup: &str) {
        let width = markup.chars().count();
        if !self.fits(width) {
            self.full = true;
            return;
        }
        self.buf.push_str(markup);
        self.used += width;
    }

    /// Emit an opening tag only if its closing tag fits as well.
    fn open_tag(&mut self, name: &str, markup: &str) {
        let width = markup.chars().count();
        if !self.fits(width + closing_width(name)) {
            self.full = true;
            return;
        }
        self.buf.push_str(markup);
        self.used += width;
        self.reserved += closing_width(name);
        self.open.push(name.to_string());
    }

    /// Close `name` and anything opened inside it. Unmatched closing tags are dropped.
    fn close_tag(&mut self, name: &str) {
        if !self.open.iter().any(|open| open == name) {
            return;
        }
        while let Some(open) = self.open.pop() {
            self.emit_close(&open);
            if open == name {
                break;
            }
        }
    }

    fn emit_close(&mut self, name: &str) {
        let width = closing_width(name);
        self.reserved -= width;
        self.used += width;
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    fn finish(mut self) -> String {
        while let Some(open) = self.open.pop() {
            self.emit_close(&open);
        }
        self.buf
    }
}

#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attrs: Vec<(String, Option<String>)>,
}

impl Tag {
    /// Parse a tag at the start of `input` (which begins with `<`).
    ///
    /// Returns the tag and the number of bytes consumed, or `None` if the text
    /// is not a well-formed tag.
    fn parse(input: &str) -> Option<(Tag, usize)> {
        let bytes = input.as_bytes();
        let mut pos = 1;

        let closing = bytes.get(pos) == Some(&b'/');
        if closing {
            pos += 1;
        }

        let name_start = pos;
        if !bytes.get(pos)?.is_ascii_alphabetic() {
            return None;
        }
        while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'-') {
            pos += 1;
        }
        let name = input[name_start..pos].to_ascii_lowercase();

        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos)? {
                b'>' => {
                    pos += 1;
                    break;
                }
                b'/' => {
                    self_closing = true;
                    pos += 1;
                    continue;
                }
                _ => self_closing = false,
            }

            let attr_start = pos;
            while pos < bytes.len()
                && !bytes[pos].is_ascii_whitespace()
                && !matches!(bytes[pos], b'=' | b'>' | b'/')
            {
                pos += 1;
            }
            if pos == attr_start {
                // Stray '=' with no name
                pos += 1;
                continue;
            }
            let attr_name = input[attr_start..pos].to_ascii_lowercase();

            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if bytes.get(pos) != Some(&b'=') {
                attrs.push((attr_name, None));
                continue;
            }
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }

            let value = match bytes.get(pos)? {
                quote @ (b'"' | b'\'') => {
                    let end = input[pos + 1..].find(*quote as char)? + pos + 1;
                    let value = &input[pos + 1..end];
                    pos = end + 1;
                    value
                }
                _ => {
                    let start = pos;
                    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'>' {
                        pos += 1;
                    }
                    &input[start..pos]
                }
            };
            attrs.push((attr_name, Some(decode_entities(value))));
        }

        Some((
            Tag {
                name,
                closing,
                self_closing,
                attrs,
            },
            pos,
        ))
    }

    /// Render an opening or self-closing tag with only its permitted attributes.
    fn render(&self, policy: &SanitizationPolicy) -> String {
        let mut markup = format!("<{}", self.name);
        for (name, value) in &self.attrs {
            if name.starts_with("on") || !policy.allowed_attrs.contains(name) {
                continue;
            }
            match value {
                None => {
                    markup.push(' ');
                    markup.push_str(name);
                }
                Some(value) => {
                    if let Some(value) = clean_attr_value(name, value, policy) {
                        markup.push_str(&format!(" {}=\"{}\"", name, escape_attr(&value)));
                    }
                }
            }
        }
        if self.self_closing {
            markup.push_str(" /");
        }
        markup.push('>');
        markup
    }
}

/// Vet an attribute value, returning what may be emitted.
fn clean_attr_value(name: &str, value: &str, policy: &SanitizationPolicy) -> Option<String> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    let forbidden = HARD_DENIED_PROTOCOLS
        .iter()
        .copied()
        .chain(policy.forbidden_protocols.iter().map(String::as_str))
        .map(|p| p.trim_end_matches(':'))
        .any(|p| compact.contains(&format!("{}:", p.to_ascii_lowercase())));
    if forbidden {
        return None;
    }

    if name == "style" && (compact.contains("expression(") || compact.contains("url(")) {
        return None;
    }

    if URL_ATTRIBUTES.contains(&name) {
        let trimmed = value.trim();
        if trimmed.starts_with('/') || trimmed.starts_with('#') {
            // Browsers read a backslash as a slash, so "/\host" is protocol-relative
            if trimmed.contains('\\') || compact.starts_with("//") {
                return None;
            }
            return Some(trimmed.to_string());
        }
        return sanitize_url(trimmed, DEFAULT_ALLOWED_PROTOCOLS);
    }

    Some(value.to_string())
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Decode the character references browsers would decode in an attribute.
fn decode_entities(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let Some(semi) = rest.find(';').filter(|&i| i <= 10) else {
            decoded.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];

        let ch = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = entity.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match entity.to_ascii_lowercase().as_str() {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "colon" => Some(':'),
                "tab" => Some('\t'),
                "newline" => Some('\n'),
                _ => None,
            }
        };

        match ch {
            Some(ch) => {
                decoded.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

/// Skip past the first occurrence of `marker`, or to the end.
fn skip_past<'a>(input: &'a str, marker: &str) -> &'a str {
    match input.find(marker) {
        Some(i) => &input[i + marker.len()..],
        None => "",
    }
}

/// Skip the content of a raw-text element and its closing tag.
fn skip_raw_text<'a>(input: &'a str, name: &str) -> &'a str {
    let closing = format!("</{}", name);
    let lower = input.to_ascii_lowercase();
    match lower.find(&closing) {
        Some(i) => skip_past(&input[i..], ">"),
        None => "",
    }
}
