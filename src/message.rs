use log::debug;
use mailparse::parse_headers;

use crate::error::ParseError;

/// A single header field. `folded` is the lowercased name used for lookups,
/// `name` keeps the spelling found in the message. `raw` holds the exact
/// bytes of a parsed field (name, separator, value, line ending) and is
/// dropped once the field is rewritten.
#[derive(Debug, Clone, PartialEq)]
struct HeaderField {
    name: String,
    folded: String,
    value: String,
    raw: Option<Vec<u8>>,
}

impl HeaderField {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            folded: name.to_ascii_lowercase(),
            value: value.to_string(),
            raw: None,
        }
    }

    /// Split one field, continuation lines included, into name and value.
    /// The name must be printable ASCII without spaces or colons (RFC 5322 ftext).
    fn from_raw(raw: &[u8]) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedHeader(String::from_utf8_lossy(raw).trim_end().to_string());

        let colon = raw.iter().position(|b| *b == b':').ok_or_else(malformed)?;
        let name = &raw[..colon];
        if name.is_empty() || !name.iter().all(|b| (33..=126).contains(b)) {
            return Err(malformed());
        }

        let rest = &raw[colon + 1..];
        let lead = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let value = &rest[lead..];
        let value = value
            .strip_suffix(b"\r\n")
            .or_else(|| value.strip_suffix(b"\n"))
            .unwrap_or(value);

        let name = String::from_utf8_lossy(name);
        let mut field = HeaderField::new(&name, &String::from_utf8_lossy(value));
        field.raw = Some(raw.to_vec());
        Ok(field)
    }
}

/// Cut a header section into fields, keeping continuation lines (leading
/// space or tab) with the field they belong to.
fn split_fields(head: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut ix = 0;
    while ix < head.len() {
        let line_end = head[ix..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(head.len(), |p| ix + p + 1);
        let continuation = matches!(head.get(line_end), Some(b' ') | Some(b'\t'));
        if !continuation {
            fields.push(&head[start..line_end]);
            start = line_end;
        }
        ix = line_end;
    }
    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn detect(raw: &[u8]) -> Self {
        match raw.iter().position(|b| *b == b'\n') {
            Some(pos) if pos > 0 && raw[pos - 1] == b'\r' => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// Parsed RFC 5322 message: an ordered header list and an opaque body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    headers: Vec<HeaderField>,
    body: Vec<u8>,
    line_ending: LineEnding,
    separator: Vec<u8>,
}

impl Message {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        // mailparse finds where the header section ends; the fields are
        // then cut from the raw bytes so they can be written back verbatim.
        let (parsed, ix_body) = parse_headers(raw)?;
        if parsed.is_empty() {
            return Err(ParseError::NoHeaders);
        }

        let head = &raw[..ix_body];
        let (fields, separator) = if head.ends_with(b"\n\r\n") {
            (&head[..head.len() - 2], &head[head.len() - 2..])
        } else if head.ends_with(b"\n\n") {
            (&head[..head.len() - 1], &head[head.len() - 1..])
        } else {
            (head, &head[head.len()..])
        };

        let headers = split_fields(fields)
            .into_iter()
            .map(HeaderField::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        if headers.is_empty() {
            return Err(ParseError::NoHeaders);
        }

        debug!(
            "[message] parsed {} headers, body {} bytes",
            headers.len(),
            raw.len() - ix_body
        );

        Ok(Self {
            headers,
            body: raw[ix_body..].to_vec(),
            line_ending: LineEnding::detect(raw),
            separator: separator.to_vec(),
        })
    }

    /// First value of `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let folded = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|h| h.folded == folded)
            .map(|h| h.value.as_str())
    }

    /// All values of `name` in message order.
    #[cfg(test)]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let folded = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|h| h.folded == folded)
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(HeaderField::new(name, value));
    }

    /// Replace every value of `name` with a single `value`. The first
    /// occurrence keeps its position; without one the header is appended.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let folded = name.to_ascii_lowercase();
        match self.headers.iter().position(|h| h.folded == folded) {
            Some(first) => {
                let field = &mut self.headers[first];
                field.value = value.to_string();
                field.raw = None;
                let mut ix = 0;
                self.headers.retain(|h| {
                    let keep = ix <= first || h.folded != folded;
                    ix += 1;
                    keep
                });
            }
            None => self.add_header(name, value),
        }
    }

    /// Remove every value of `name`, returning how many were dropped.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let folded = name.to_ascii_lowercase();
        let before = self.headers.len();
        self.headers.retain(|h| h.folded != folded);
        before - self.headers.len()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let eol = self.line_ending.as_bytes();
        let mut out = Vec::with_capacity(self.body.len() + self.headers.len() * 64);
        for h in &self.headers {
            // A header-only message may end without a line terminator.
            if !out.is_empty() && !out.ends_with(b"\n") {
                out.extend_from_slice(eol);
            }
            match &h.raw {
                Some(raw) => out.extend_from_slice(raw),
                None => {
                    out.extend_from_slice(h.name.as_bytes());
                    out.extend_from_slice(b": ");
                    out.extend_from_slice(h.value.as_bytes());
                    out.extend_from_slice(eol);
                }
            }
        }
        if !self.separator.is_empty() {
            out.extend_from_slice(&self.separator);
        } else if !self.body.is_empty() {
            out.extend_from_slice(eol);
        }
        out.extend_from_slice(&self.body);
        out
    }
}
