use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder regex"))
}

fn legacy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("valid legacy regex"))
}

/// Converts legacy single-brace placeholders (`{context.user.first_name}`) to `{{ }}` form.
/// Text that already uses double braces is returned unchanged.
pub fn to_handlebars(text: &str) -> String {
    if placeholder_re().is_match(text) {
        return text.to_string();
    }
    legacy_re().replace_all(text, "{{$1}}").into_owned()
}

/// Renders `{{path.to.value}}` placeholders against `data`. Unknown paths render empty.
pub fn render_template(text: &str, data: &Value) -> String {
    let text = to_handlebars(text);
    placeholder_re()
        .replace_all(&text, |caps: &Captures<'_>| lookup(data, &caps[1]))
        .into_owned()
}

fn lookup(data: &Value, path: &str) -> String {
    let mut current = data;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_paths() {
        let data = json!({"context": {"user": {"first_name": "Ada"}, "vars": {"n": 3}}});
        assert_eq!(
            render_template("Hi {{context.user.first_name}}, n={{ context.vars.n }}", &data),
            "Hi Ada, n=3"
        );
    }

    #[test]
    fn legacy_braces_are_converted() {
        assert_eq!(
            to_handlebars("Hello {context.user.first_name}"),
            "Hello {{context.user.first_name}}"
        );
        let data = json!({"contact": {"company_name": "Acme"}});
        assert_eq!(render_template("At {contact.company_name}", &data), "At Acme");
    }

    #[test]
    fn unknown_paths_render_empty() {
        assert_eq!(render_template("[{{context.missing.x}}]", &json!({})), "[]");
    }
}
