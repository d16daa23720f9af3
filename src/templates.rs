//! Compile-time embedded templates.
//!
//! `{{ user.username }}` looks the dotted path up in a `serde_json` context
//! and inserts it HTML-escaped. `{{ form|safe }}` inserts the value as is.
//! Templates not ending in `.html` are plain text and never escaped.
//! Missing values render as an empty string.

use std::collections::HashMap;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*(\|\s*safe\s*)?\}\}").unwrap();
    static ref TEMPLATES: HashMap<&'static str, &'static str> = HashMap::from([
        ("accounts/home.html", include_str!("../templates/accounts/home.html")),
        ("accounts/signup.html", include_str!("../templates/accounts/signup.html")),
        (
            "accounts/activation_sent.html",
            include_str!("../templates/accounts/activation_sent.html"),
        ),
        (
            "accounts/activation_invalid.html",
            include_str!("../templates/accounts/activation_invalid.html"),
        ),
        (
            "accounts/activation_request.txt",
            include_str!("../templates/accounts/activation_request.txt"),
        ),
        (
            "accounts/update_profile.html",
            include_str!("../templates/accounts/update_profile.html"),
        ),
        (
            "accounts/profile_updated.html",
            include_str!("../templates/accounts/profile_updated.html"),
        ),
        ("accounts/login.html", include_str!("../templates/accounts/login.html")),
    ]);
}

/// Render a named template against `context`.
pub fn render_to_string(name: &str, context: &Value) -> anyhow::Result<String> {
    let source = TEMPLATES
        .get(name)
        .copied()
        .with_context(|| format!("template {name} not found"))?;
    let html = name.ends_with(".html");
    let out = PLACEHOLDER_RE.replace_all(source, |caps: &Captures| {
        let value = lookup(context, &caps[1]);
        if !html || caps.get(2).is_some() {
            value
        } else {
            escape_html(&value)
        }
    });
    Ok(out.into_owned())
}

fn lookup(context: &Value, path: &str) -> String {
    let mut current = context;
    for key in path.split('.') {
        match current.get(key) {
            Some(v) => current = v,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_values() {
        let out = render_to_string(
            "accounts/activation_request.txt",
            &json!({
                "user": { "username": "ada" },
                "domain": "example.org",
                "uid": "abc",
                "token": "t.o.k",
            }),
        )
        .unwrap();
        assert!(out.contains("Hi ada,"));
        assert!(out.contains("http://example.org/activate/abc/t.o.k"));
    }

    #[test]
    fn escapes_unless_safe() {
        let out = render_to_string(
            "accounts/home.html",
            &json!({ "greeting": "<b>hi</b>", "nav": "<a href=\"/\">x</a>" }),
        )
        .unwrap();
        assert!(out.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(out.contains("<a href=\"/\">x</a>"));
    }

    #[test]
    fn text_templates_are_not_escaped() {
        let out = render_to_string(
            "accounts/activation_request.txt",
            &json!({
                "user": { "username": "o'brien&co" },
                "domain": "example.org",
                "uid": "abc",
                "token": "t.o.k",
            }),
        )
        .unwrap();
        assert!(out.contains("Hi o'brien&co,"));
        assert!(!out.contains("&amp;"));
    }

    #[test]
    fn missing_values_render_empty() {
        let out = render_to_string("accounts/home.html", &json!({})).unwrap();
        assert!(out.contains("<p></p>"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(render_to_string("accounts/nope.html", &json!({})).is_err());
    }
}
