//! Placeholder substitution for selectors.
//!
//! A placeholder is `{name}` or `{name~default}`. Names start with an ASCII
//! letter or `_` and continue with ASCII alphanumerics, `_`, `.` or `-`;
//! any other text between braces is left alone, which keeps JSON objects
//! intact when substituting raw selector text.

use model::selector::{Selector, scope::ScopeCondition};
use std::collections::HashMap;
use tracing::{debug, warn};

/// The logged-in user on whose behalf a selector runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    pub id: u64,
    pub attributes: HashMap<String, String>,
}

impl UserContext {
    pub fn new(id: u64) -> Self {
        UserContext {
            id,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_lowercase(), value.to_string());
        self
    }
}

/// Request-scoped variable sources, looked up in order: query string,
/// session, user. Names are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    query: HashMap<String, String>,
    session: HashMap<String, String>,
    user: Option<UserContext>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn with_session(mut self, key: &str, value: &str) -> Self {
        self.session.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        if let Some(value) = self.query.get(&key) {
            return Some(value.clone());
        }
        if let Some(value) = self.session.get(&key) {
            return Some(value.clone());
        }
        let user = self.user.as_ref()?;
        match key.as_str() {
            "user_id" | "userid" => Some(user.id.to_string()),
            _ => user.attributes.get(&key).cloned(),
        }
    }
}

/// Outcome of a substitution pass over one piece of text.
#[derive(Debug, Clone, PartialEq)]
struct Substituted {
    text: String,
    unresolved: Vec<String>,
}

/// Substitutes placeholders in raw selector JSON before it is parsed.
///
/// Resolved values and defaults are escaped as JSON string content, so
/// neither can alter the structure of the document.
pub fn substitute_json_text(raw: &str, ctx: &RequestContext, remove_unknown: bool) -> String {
    let result = substitute(raw, ctx, remove_unknown, escape_json_fragment);
    report_unresolved(&result.unresolved, remove_unknown);
    result.text
}

/// Substitutes placeholders in the string values of every scope condition,
/// leaving the connection tree untouched.
pub fn substitute_selector(selector: &mut Selector, ctx: &RequestContext, remove_unknown: bool) {
    let mut unresolved = Vec::new();
    selector.main.walk_mut(&mut |connection| {
        for scope in &mut connection.scopes {
            for condition in &mut scope.conditions {
                substitute_condition(condition, ctx, remove_unknown, &mut unresolved);
            }
        }
    });
    report_unresolved(&unresolved, remove_unknown);
}

/// Substitutes placeholders in a plain string without escaping.
pub fn substitute_str(text: &str, ctx: &RequestContext, remove_unknown: bool) -> String {
    let result = substitute(text, ctx, remove_unknown, str::to_string);
    report_unresolved(&result.unresolved, remove_unknown);
    result.text
}

fn substitute_condition(
    condition: &mut ScopeCondition,
    ctx: &RequestContext,
    remove_unknown: bool,
    unresolved: &mut Vec<String>,
) {
    for value in &mut condition.values {
        if let serde_json::Value::String(text) = value {
            let result = substitute(text, ctx, remove_unknown, str::to_string);
            unresolved.extend(result.unresolved);
            *text = result.text;
        }
    }
}

fn report_unresolved(names: &[String], removed: bool) {
    if names.is_empty() {
        return;
    }
    if removed {
        debug!("Removed unresolved selector variables: {}", names.join(", "));
    } else {
        warn!("Unresolved selector variables kept verbatim: {}", names.join(", "));
    }
}

fn substitute(
    text: &str,
    ctx: &RequestContext,
    remove_unknown: bool,
    escape: impl Fn(&str) -> String,
) -> Substituted {
    let mut out = String::with_capacity(text.len());
    let mut unresolved = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        let Some(close) = after_open.find('}') else {
            out.push_str(&rest[open..]);
            return Substituted {
                text: out,
                unresolved,
            };
        };

        let inner = &after_open[..close];
        match Placeholder::parse(inner) {
            Some(placeholder) => {
                match ctx.lookup(placeholder.name) {
                    Some(value) => out.push_str(&escape(&value)),
                    None => match placeholder.default {
                        Some(default) => out.push_str(&escape(default)),
                        None => {
                            unresolved.push(placeholder.name.to_string());
                            if !remove_unknown {
                                out.push('{');
                                out.push_str(inner);
                                out.push('}');
                            }
                        }
                    },
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Not a placeholder; keep the brace and rescan after it so
                // `{"a":"{x}"}` still finds `{x}`.
                out.push('{');
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    Substituted {
        text: out,
        unresolved,
    }
}

#[derive(Debug, PartialEq)]
struct Placeholder<'a> {
    name: &'a str,
    default: Option<&'a str>,
}

impl<'a> Placeholder<'a> {
    fn parse(inner: &'a str) -> Option<Self> {
        let (name, default) = match inner.split_once('~') {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };

        let mut chars = name.chars();
        let first = chars.next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
            return None;
        }
        Some(Placeholder { name, default })
    }
}

/// Escapes `value` as the content of a JSON string literal (no quotes).
fn escape_json_fragment(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_selector;
    use serde_json::json;
    use tracing_test::traced_test;

    fn ctx() -> RequestContext {
        RequestContext::new()
            .with_query("color", "red")
            .with_query("Shared", "from-query")
            .with_session("shared", "from-session")
            .with_session("cart", "42")
            .with_user(UserContext::new(7).with_attribute("Email", "a@b.c"))
    }

    #[test]
    fn test_lookup_order_and_case() {
        let ctx = ctx();
        assert_eq!(ctx.lookup("COLOR").as_deref(), Some("red"));
        assert_eq!(ctx.lookup("shared").as_deref(), Some("from-query"));
        assert_eq!(ctx.lookup("cart").as_deref(), Some("42"));
        assert_eq!(ctx.lookup("user_id").as_deref(), Some("7"));
        assert_eq!(ctx.lookup("email").as_deref(), Some("a@b.c"));
        assert_eq!(ctx.lookup("nope"), None);
    }

    #[traced_test]
    #[test]
    fn test_unknown_kept_verbatim() {
        let text = substitute_str("a {missing} b {color}", &ctx(), false);
        assert_eq!(text, "a {missing} b red");
        assert!(logs_contain("kept verbatim: missing"));
    }

    #[test]
    fn test_unknown_removed() {
        let text = substitute_str("a {missing} b {color}", &ctx(), true);
        assert_eq!(text, "a  b red");
    }

    #[test]
    fn test_default_applies_regardless_of_policy() {
        assert_eq!(substitute_str("{limit~10}", &ctx(), false), "10");
        assert_eq!(substitute_str("{limit~10}", &ctx(), true), "10");
        assert_eq!(substitute_str("{limit~}", &ctx(), false), "");
        assert_eq!(substitute_str("{color~blue}", &ctx(), false), "red");
    }

    #[test]
    fn test_non_placeholders_untouched() {
        let ctx = ctx();
        for text in ["{}", "{ color }", "{1abc}", "{a b}", "{\"k\":1}", "open { only"] {
            assert_eq!(substitute_str(text, &ctx, true), text);
        }
    }

    #[test]
    fn test_json_text_substitution_escapes_values() {
        let ctx = RequestContext::new().with_query("q", "x\", \"insecure\": true, \"y\": \"");
        let raw = r#"{"main":{"entity":"product","scopes":[{"conditions":[{"field":{"key":"title"},"operator":"contains","values":["{q}"]}]}]}}"#;

        let substituted = substitute_json_text(raw, &ctx, false);
        let selector = parse_selector(&substituted).unwrap();

        assert!(!selector.insecure);
        assert_eq!(
            selector.main.scopes[0].conditions[0].values[0],
            json!("x\", \"insecure\": true, \"y\": \"")
        );
    }

    #[test]
    fn test_json_text_substitution_escapes_defaults() {
        let raw = r#"{"main":{"entity":"product"},"languageCode":"{lang~nl", "insecure": true, "x": "}"}"#;

        let substituted = substitute_json_text(raw, &RequestContext::new(), false);
        let selector = parse_selector(&substituted).unwrap();

        assert!(!selector.insecure);
        assert_eq!(
            selector.language_code.as_deref(),
            Some("nl\", \"insecure\": true, \"x\": \"")
        );
    }

    #[test]
    fn test_json_text_unquoted_position() {
        let raw = r#"{"main":{"entity":"product"},"paging":{"limit":{limit~25}}}"#;
        let selector = parse_selector(&substitute_json_text(raw, &ctx(), false)).unwrap();
        assert_eq!(selector.paging.unwrap().limit, Some(25));
    }

    #[test]
    fn test_selector_pass_only_rewrites_condition_strings() {
        let mut selector = parse_selector(
            r#"{
                "main": {
                    "entity": "{color}",
                    "scopes": [{ "conditions": [
                        { "field": { "key": "{color}" }, "operator": "in", "values": ["{color}", 5, "{gone}"] }
                    ]}],
                    "connections": [{
                        "entity": "variant",
                        "scopes": [{ "conditions": [
                            { "field": { "key": "basket" }, "operator": "equals", "values": ["{cart}"] }
                        ]}]
                    }]
                }
            }"#,
        )
        .unwrap();
        let before_shape = selector.connection_count();

        substitute_selector(&mut selector, &ctx(), true);

        assert_eq!(selector.main.entity, "{color}");
        assert_eq!(selector.main.scopes[0].conditions[0].field.key, "{color}");
        assert_eq!(
            selector.main.scopes[0].conditions[0].values,
            vec![json!("red"), json!(5), json!("")]
        );
        assert_eq!(
            selector.main.connections[0].scopes[0].conditions[0].values,
            vec![json!("42")]
        );
        assert_eq!(selector.connection_count(), before_shape);
    }
}
