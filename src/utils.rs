// Text helpers shared by the interpreter and the built-in pipes

use crate::value::Value;

/// Shortest decimal form that parses back to the same number.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        // Also covers -0
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Trim the rendered output and drop whitespace runs between `>` and `<`.
pub fn collapse_tag_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.trim();
    while let Some(pos) = rest.find('>') {
        let (head, tail) = rest.split_at(pos + 1);
        out.push_str(head);
        let stripped = tail.trim_start();
        rest = if stripped.starts_with('<') { stripped } else { tail };
    }
    out.push_str(rest);
    out
}

/// Elements of an array-like value, or the value itself as a single element.
/// Strings and non-evaluable values are never spread.
pub fn to_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(obj) if obj.keys().all(|k| k.parse::<usize>().is_ok()) => value.items(),
        Value::Undefined => Vec::new(),
        other => vec![other.clone()],
    }
}
