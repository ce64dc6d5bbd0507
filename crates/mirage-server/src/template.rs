//! Template engine for dynamic responses.
//!
//! Route bodies, alternate bodies, header values, file paths and templatable
//! file contents are rendered with Handlebars against the incoming request.
//!
//! # Context
//!
//! - `{{method}}`, `{{path}}`
//! - `{{query.<name>}}`, `{{params.<name>}}`, `{{headers.<lowercase-name>}}`
//! - `{{body}}` (raw), `{{json.<path>}}` (parsed JSON body)
//!
//! # Helpers
//!
//! `queryParam`, `urlParam`, `header`, `body`, `now`, `uuid`, `int`, `float`,
//! `boolean`, `oneOf`, `default`, `upper`, `lower`.
//!
//! # Example
//!
//! ```yaml
//! body: '{"id": "{{urlParam "id"}}", "at": "{{now "%Y-%m-%d"}}"}'
//! ```

use crate::routing::parse_query_string;
use handlebars::{Handlebars, RenderErrorReason};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// MIME types whose content is rendered as a template.
pub const TEMPLATABLE_MIME_TYPES: &[&str] = &[
    "application/json",
    "text/html",
    "text/css",
    "text/csv",
    "application/javascript",
    "application/typescript",
    "text/plain",
    "application/xhtml+xml",
    "application/xml",
];

/// Whether a content type names a templatable MIME type. Parameters such as
/// `; charset=utf-8` are ignored.
pub fn is_templatable(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    TEMPLATABLE_MIME_TYPES.contains(&essence.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template parse error: {0}")]
    Parse(String),
    #[error("Unknown template helper: {0}")]
    MissingHelper(String),
    #[error("Template render error: {0}")]
    Render(String),
}

/// Request data exposed to templates
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestData {
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    pub query: HashMap<String, String>,
    /// Path parameters from the matched route
    pub params: HashMap<String, String>,
    /// Request headers (keys lowercased)
    pub headers: HashMap<String, String>,
    /// Raw request body, lossily decoded as UTF-8
    pub body: String,
    /// Request body parsed as JSON, when it is valid JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl RequestData {
    pub fn new(
        method: &str,
        path: &str,
        query_string: Option<&str>,
        headers: &hyper::HeaderMap,
        body: &[u8],
    ) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_lowercase(), val.to_string()))
            })
            .collect();
        let body = String::from_utf8_lossy(body).into_owned();
        let json = if body.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&body).ok()
        };

        Self {
            method: method.to_string(),
            path: path.to_string(),
            query: parse_query_string(query_string),
            params: HashMap::new(),
            headers,
            body,
            json,
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Handlebars renderer with the request helpers registered.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("queryParam", Box::new(query_param_helper));
        handlebars.register_helper("urlParam", Box::new(url_param_helper));
        handlebars.register_helper("header", Box::new(header_helper));
        handlebars.register_helper("body", Box::new(body_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("int", Box::new(int_helper));
        handlebars.register_helper("float", Box::new(float_helper));
        handlebars.register_helper("boolean", Box::new(boolean_helper));
        handlebars.register_helper("oneOf", Box::new(one_of_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Responses are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render `template` against `request`.
    ///
    /// Text without `{{` is returned unchanged.
    pub fn render(&self, template: &str, request: &RequestData) -> Result<String, TemplateError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        handlebars::Template::compile(template).map_err(|e| TemplateError::Parse(e.to_string()))?;

        self.handlebars
            .render_template(template, request)
            .map_err(|e| match e.reason() {
                RenderErrorReason::HelperNotFound(name) => TemplateError::MissingHelper(name.clone()),
                RenderErrorReason::TemplateError(te) => TemplateError::Parse(te.to_string()),
                _ => TemplateError::Render(e.to_string()),
            })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Custom Handlebars helpers

fn write_value(out: &mut dyn handlebars::Output, value: &Value) -> handlebars::HelperResult {
    match value {
        Value::Null => {}
        Value::String(s) => out.write(s)?,
        other => out.write(&other.to_string())?,
    }
    Ok(())
}

fn str_param<'a>(h: &'a handlebars::Helper, idx: usize) -> Option<&'a str> {
    h.param(idx).and_then(|v| v.value().as_str())
}

fn num_param(h: &handlebars::Helper, idx: usize) -> Option<f64> {
    h.param(idx).and_then(|v| match v.value() {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Write `ctx[section][key]` or the helper's second parameter.
fn lookup_or_default(
    h: &handlebars::Helper,
    ctx: &handlebars::Context,
    section: &str,
    key: &str,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    match ctx.data().get(section).and_then(|s| s.get(key)) {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        _ => out.write(str_param(h, 1).unwrap_or(""))?,
    }
    Ok(())
}

fn query_param_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = str_param(h, 0).unwrap_or("");
    lookup_or_default(h, ctx, "query", name, out)
}

fn url_param_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = str_param(h, 0).unwrap_or("");
    lookup_or_default(h, ctx, "params", name, out)
}

fn header_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = str_param(h, 0).unwrap_or("").to_lowercase();
    lookup_or_default(h, ctx, "headers", &name, out)
}

fn body_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let data = ctx.data();
    let path = str_param(h, 0).unwrap_or("");
    if path.is_empty() {
        return write_value(out, data.get("body").unwrap_or(&Value::Null));
    }

    let found = data
        .get("json")
        .and_then(|json| json_path(json, path))
        .filter(|v| !v.is_null());
    match found {
        Some(v) => write_value(out, v),
        None => {
            out.write(str_param(h, 1).unwrap_or(""))?;
            Ok(())
        }
    }
}

/// Walk a dotted path (`a.b.0.c`) through a JSON value.
fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(root, |current, part| match current {
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(part),
            _ => None,
        })
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use std::fmt::Write;

    let now = chrono::Utc::now();
    let Some(format) = str_param(h, 0) else {
        out.write(&now.to_rfc3339())?;
        return Ok(());
    };

    let mut rendered = String::new();
    if write!(rendered, "{}", now.format(format)).is_err() {
        return Err(RenderErrorReason::Other(format!("invalid date format '{format}'")).into());
    }
    out.write(&rendered)?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn int_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let a = num_param(h, 0).map_or(0, |v| v as i64);
    let b = num_param(h, 1).map_or(100, |v| v as i64);
    let (min, max) = if a <= b { (a, b) } else { (b, a) };

    let value = rand::thread_rng().gen_range(min..=max);
    out.write(&value.to_string())?;
    Ok(())
}

fn float_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let a = num_param(h, 0).unwrap_or(0.0);
    let b = num_param(h, 1).unwrap_or(1.0);
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    if !(max - min).is_finite() {
        return Err(RenderErrorReason::Other(format!("float range {a}..{b} is not finite")).into());
    }

    let value = if min < max {
        rand::thread_rng().gen_range(min..max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn boolean_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let value: bool = rand::thread_rng().gen();
    out.write(if value { "true" } else { "false" })?;
    Ok(())
}

fn one_of_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::seq::SliceRandom;

    let choices: Vec<&Value> = h.params().iter().map(|p| p.value()).collect();
    match choices.choose(&mut rand::thread_rng()) {
        Some(choice) => write_value(out, choice),
        None => Ok(()),
    }
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = str_param(h, 1).unwrap_or("");

    match value {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(v) if !v.is_null() && !v.is_string() => out.write(&v.to_string())?,
        _ => out.write(default)?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = str_param(h, 0).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = str_param(h, 0).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderMap, HeaderValue};

    fn request(query: Option<&str>, body: &str) -> RequestData {
        let mut headers = HeaderMap::new();
        headers.insert("X-Session", HeaderValue::from_static("abc"));
        RequestData::new("POST", "/users/42", query, &headers, body.as_bytes())
            .with_params(HashMap::from([("id".to_string(), "42".to_string())]))
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let engine = TemplateEngine::new();
        let req = request(None, "");
        for text in ["", "hello", r#"{"ok": true}"#, "{ single } braces }}"] {
            assert_eq!(engine.render(text, &req).unwrap(), text);
        }
    }

    #[test]
    fn test_rendering_is_idempotent_on_resolved_text() {
        let engine = TemplateEngine::new();
        let req = request(Some("name=Ann"), "");
        let once = engine.render("Hello {{queryParam \"name\"}}", &req).unwrap();
        let twice = engine.render(&once, &req).unwrap();
        assert_eq!(once, "Hello Ann");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_context_variables() {
        let engine = TemplateEngine::new();
        let req = request(Some("page=2"), r#"{"user": {"name": "Ann"}}"#);

        let result = engine
            .render(
                "{{method}} {{path}} {{query.page}} {{params.id}} {{headers.x-session}} {{json.user.name}}",
                &req,
            )
            .unwrap();
        assert_eq!(result, "POST /users/42 2 42 abc Ann");
    }

    #[test]
    fn test_request_helpers() {
        let engine = TemplateEngine::new();
        let req = request(Some("page=2"), r#"{"items": [{"id": 7}]}"#);

        let result = engine
            .render(
                r#"{{queryParam "page"}}|{{queryParam "missing" "none"}}|{{urlParam "id"}}|{{header "X-SESSION"}}|{{body "items.0.id"}}|{{body "nope" "fallback"}}"#,
                &req,
            )
            .unwrap();
        assert_eq!(result, "2|none|42|abc|7|fallback");
    }

    #[test]
    fn test_raw_body_helper() {
        let engine = TemplateEngine::new();
        let req = request(None, "plain text body");
        assert_eq!(engine.render("{{body}}", &req).unwrap(), "plain text body");
    }

    #[test]
    fn test_random_helpers() {
        let engine = TemplateEngine::new();
        let req = request(None, "");

        let n: i64 = engine.render("{{int 5 10}}", &req).unwrap().parse().unwrap();
        assert!((5..=10).contains(&n));

        let f: f64 = engine.render("{{float 1 2}}", &req).unwrap().parse().unwrap();
        assert!((1.0..2.0).contains(&f));

        let b = engine.render("{{boolean}}", &req).unwrap();
        assert!(b == "true" || b == "false");

        let pick = engine.render(r#"{{oneOf "a" "b" "c"}}"#, &req).unwrap();
        assert!(["a", "b", "c"].contains(&pick.as_str()));

        let id = engine.render("{{uuid}}", &req).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_float_rejects_unbounded_range() {
        let engine = TemplateEngine::new();

        for query in ["max=1e309", "max=inf", "max=NaN"] {
            let req = request(Some(query), "");
            let result = engine.render(r#"{{float 0 (queryParam "max")}}"#, &req);
            assert!(
                matches!(result, Err(TemplateError::Render(_))),
                "{query}: {result:?}"
            );
        }

        let wide = engine.render(r#"{{float "-1e308" "1e308"}}"#, &request(None, ""));
        assert!(matches!(wide, Err(TemplateError::Render(_))));
    }

    #[test]
    fn test_now_helper() {
        let engine = TemplateEngine::new();
        let req = request(None, "");

        let year = engine.render(r#"{{now "%Y"}}"#, &req).unwrap();
        assert_eq!(year.len(), 4);
        let full = engine.render("{{now}}", &req).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&full).is_ok());
    }

    #[test]
    fn test_default_upper_lower() {
        let engine = TemplateEngine::new();
        let req = request(Some("name=Ann"), "");

        let result = engine
            .render(
                r#"{{default query.missing "x"}} {{upper query.name}} {{lower query.name}}"#,
                &req,
            )
            .unwrap();
        assert_eq!(result, "x ANN ann");
    }

    #[test]
    fn test_parse_error() {
        let engine = TemplateEngine::new();
        let req = request(None, "");
        let err = engine.render("{{#each items}}x{{/with}}", &req).unwrap_err();
        assert!(matches!(err, TemplateError::Parse(_)));
    }

    #[test]
    fn test_missing_helper() {
        let engine = TemplateEngine::new();
        let req = request(None, "");
        let err = engine.render(r#"{{faker "name"}}"#, &req).unwrap_err();
        assert_eq!(err, TemplateError::MissingHelper("faker".to_string()));
    }

    #[test]
    fn test_templatable_mime_types() {
        assert!(is_templatable("application/json"));
        assert!(is_templatable("text/html; charset=utf-8"));
        assert!(is_templatable("Application/XML"));
        assert!(!is_templatable("image/png"));
        assert!(!is_templatable("application/pdf"));
        assert!(!is_templatable(""));
    }
}
