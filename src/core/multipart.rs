//! MIME multipart builder and parser.
//!
//! The parser is deliberately permissive: fragments it cannot make sense of
//! are skipped, so a partially corrupt body yields fewer parts instead of an
//! error. The only hard failure is a content-type header without a boundary.

use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;

const CRLF: &str = "\r\n";
const BOUNDARY_LENGTH: usize = 24;

static BOUNDARY_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)boundary\s*=\s*"?([^";\s]+)"?"#).expect("valid boundary regex"));

/// A single `name: value` header line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Values of every header called `name` (case-insensitive), in order.
pub fn header_values<'a>(headers: &'a [Header], name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let name = name.to_string();
    headers.iter().filter(move |h| h.is(&name)).map(|h| h.value.as_str())
}

/// The content-type header did not carry a boundary parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed content-type header, no boundary found: {0}")]
pub struct MalformedHeaderError(pub String);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultipartPart {
    pub headers: Vec<Header>,
    pub body: String,
}

impl MultipartPart {
    pub fn new(headers: Vec<Header>, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// First header value called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_values(&self.headers, name).next()
    }

    /// Media type of the part without parameters, lower-cased.
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").map(media_type)
    }
}

/// Strip parameters from a content-type value: `text/plain; charset=utf-8` -> `text/plain`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Rendered multipart body, ready to be handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartBody {
    pub boundary: String,
    pub body: String,
}

impl MultipartBody {
    pub fn content_type(&self) -> String {
        format!("multipart/mixed;boundary={}", self.boundary)
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Multipart {
    parts: Vec<MultipartPart>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<MultipartPart>) -> Self {
        Self { parts }
    }

    pub fn add(&mut self, part: MultipartPart) {
        self.parts.push(part);
    }

    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// First part whose media type equals `content_type`.
    pub fn part_by_type(&self, content_type: &str) -> Option<&MultipartPart> {
        self.parts
            .iter()
            .find(|p| p.content_type().as_deref() == Some(content_type))
    }

    /// Render with a freshly generated boundary.
    pub fn create(&self) -> MultipartBody {
        self.create_with_boundary(&generate_boundary())
    }

    /// Render with the given boundary.
    ///
    /// A part without headers has an empty header block: the blank line
    /// follows the delimiter directly. No closing delimiter is written when
    /// there are no parts, so an empty multipart renders as the empty string.
    pub fn create_with_boundary(&self, boundary: &str) -> MultipartBody {
        let mut lines: Vec<String> = Vec::new();

        for part in &self.parts {
            lines.push(format!("--{boundary}"));
            lines.extend(part.headers.iter().map(|h| format!("{}: {}", h.name, h.value)));
            lines.push(String::new());
            lines.push(part.body.clone());
        }

        if !self.parts.is_empty() {
            lines.push(format!("--{boundary}--"));
        }

        MultipartBody {
            boundary: boundary.to_string(),
            body: lines.join(CRLF),
        }
    }

    /// Parse `body` using the boundary announced in `content_type`.
    ///
    /// Delimiters are only recognized as whole lines. Part bodies keep their
    /// original line separators.
    ///
    /// # Errors
    /// Returns [`MalformedHeaderError`] if `content_type` has no boundary.
    pub fn parse(body: &str, content_type: &str) -> Result<Self, MalformedHeaderError> {
        let boundary = extract_boundary(content_type)
            .ok_or_else(|| MalformedHeaderError(content_type.to_string()))?;
        let delimiter = Regex::new(&format!(r"^-+{}-*\s*$", regex::escape(&boundary)))
            .map_err(|_| MalformedHeaderError(content_type.to_string()))?;

        let mut fragments: Vec<&str> = Vec::new();
        let mut start = 0;
        for (offset, line) in lines_with_offsets(body) {
            if delimiter.is_match(trim_line_end(line)) {
                // The line break before a delimiter belongs to the delimiter.
                fragments.push(strip_line_break(&body[start..offset]));
                start = offset + line.len();
            }
        }
        fragments.push(&body[start..]);

        let parts = fragments.into_iter().filter_map(parse_fragment).collect();
        Ok(Self { parts })
    }
}

/// Lines including their `\n` terminator, with their byte offset.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_inclusive('\n').scan(0, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line))
    })
}

fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn strip_line_break(fragment: &str) -> &str {
    fragment
        .strip_suffix("\r\n")
        .or_else(|| fragment.strip_suffix('\n'))
        .unwrap_or(fragment)
}

/// Split a fragment into headers and body at its first blank line.
/// Fragments without a blank line or with an empty body are dropped.
fn parse_fragment(fragment: &str) -> Option<MultipartPart> {
    let (separator, body_start) = lines_with_offsets(fragment)
        .find(|(_, line)| trim_line_end(line).is_empty())
        .map(|(offset, line)| (offset, offset + line.len()))?;

    let body = &fragment[body_start..];
    if body.is_empty() {
        return None;
    }

    let headers = fragment[..separator]
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| Header::new(name, value.trim()))
        })
        .collect();

    Some(MultipartPart {
        headers,
        body: body.to_string(),
    })
}

fn extract_boundary(content_type: &str) -> Option<String> {
    BOUNDARY_PARAM
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn generate_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LENGTH)
        .map(char::from)
        .collect()
}
