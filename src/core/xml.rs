//! Minimal XML text helpers for response payloads.
//!
//! Payloads are small, flat documents assembled with `format!`; these helpers
//! keep element text and CDATA sections well formed.

/// Escapes `&`, `<`, `>` and quotes for element text and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Wraps `text` in a CDATA section, splitting any embedded terminator.
pub fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// `<tag>escaped</tag>`
pub fn element(tag: &str, text: &str) -> String {
    format!("<{tag}>{}</{tag}>", escape(text))
}

/// `<tag><![CDATA[text]]></tag>`
pub fn cdata_element(tag: &str, text: &str) -> String {
    format!("<{tag}>{}</{tag}>", cdata(text))
}

/// Text for an optional value; absent values render as `None`.
pub fn opt_text(value: Option<&str>) -> &str {
    value.unwrap_or("None")
}
