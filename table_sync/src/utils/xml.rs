//! Minimal XML writing helpers for the change-log outputs.

use std::fmt::Write as _;

/// Escape text for use in element content or attribute values
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            // Control characters other than tab/newline are not legal XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {
                let _ = write!(escaped, "&#x{:x};", c as u32);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Render ` key="value"` pairs, skipping absent values
pub fn attributes(pairs: &[(&str, Option<&str>)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        if let Some(value) = value {
            let _ = write!(out, " {}=\"{}\"", key, escape(value));
        }
    }
    out
}

/// The XML declaration for the given encoding
pub fn declaration(encoding: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"{}\"?>", escape(encoding))
}

/// Small indenting element writer
#[derive(Debug, Default)]
pub struct XmlWriter {
    buffer: String,
    depth: usize,
    line_ending: String,
}

impl XmlWriter {
    pub fn new(line_ending: &str) -> Self {
        Self {
            buffer: String::new(),
            depth: 0,
            line_ending: line_ending.to_string(),
        }
    }

    /// Start writing at the given nesting level
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buffer.push_str("  ");
        }
    }

    pub fn raw_line(&mut self, line: &str) {
        self.indent();
        self.buffer.push_str(line);
        self.buffer.push_str(&self.line_ending);
    }

    pub fn open(&mut self, name: &str, attrs: &[(&str, Option<&str>)]) {
        self.indent();
        let _ = write!(self.buffer, "<{}{}>", name, attributes(attrs));
        self.buffer.push_str(&self.line_ending);
        self.depth += 1;
    }

    pub fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = write!(self.buffer, "</{}>", name);
        self.buffer.push_str(&self.line_ending);
    }

    /// `<name attrs>text</name>` on one line
    pub fn text_element(&mut self, name: &str, attrs: &[(&str, Option<&str>)], text: &str) {
        self.indent();
        let _ = write!(
            self.buffer,
            "<{}{}>{}</{}>",
            name,
            attributes(attrs),
            escape(text),
            name
        );
        self.buffer.push_str(&self.line_ending);
    }

    pub fn empty_element(&mut self, name: &str, attrs: &[(&str, Option<&str>)]) {
        self.indent();
        let _ = write!(self.buffer, "<{}{}/>", name, attributes(attrs));
        self.buffer.push_str(&self.line_ending);
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
        assert_eq!(escape("bell\u{7}"), "bell&#x7;");
        assert_eq!(escape("tab\there"), "tab\there");
    }

    #[test]
    fn test_writer() {
        let mut w = XmlWriter::new("\n");
        w.open("update", &[("row", Some("3")), ("skip", None)]);
        w.text_element("col", &[("name", Some("firstname"))], "O'Neil");
        w.empty_element("col", &[("name", Some("id"))]);
        w.close("update");
        assert_eq!(
            w.finish(),
            "<update row=\"3\">\n  <col name=\"firstname\">O&apos;Neil</col>\n  <col name=\"id\"/>\n</update>\n"
        );
    }
}
