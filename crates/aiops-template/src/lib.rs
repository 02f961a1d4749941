//! The template engine from spec.md §4.3: renders every user-supplied
//! string field (command, api_endpoint, api_body, header values,
//! environment values, working_directory) against a context map built from
//! the alert, the target server, runtime variables, previously-extracted
//! values, and the execution itself.
//!
//! Rendering is strict by default: referencing an undefined key fails the
//! step with `TemplateError::UndefinedVariable`, which callers map onto
//! `aiops_types::ErrorKind::TemplateResolution`. A field can opt into
//! lenient rendering (undefined keys render as empty string) per spec.md §9's
//! escape-hatch design note.

use std::collections::BTreeMap;

use chrono::Utc;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("undefined template variable: {0}")]
    UndefinedVariable(String),
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("template render error: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertContext {
    pub name: String,
    pub severity: String,
    pub instance: String,
    pub job: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerContext {
    pub hostname: String,
    pub os_type: String,
    pub environment: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    pub id: String,
    pub mode: String,
    pub dry_run: bool,
}

/// Everything a single step's templated fields may reference.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateContext {
    pub alert: Option<AlertContext>,
    pub server: Option<ServerContext>,
    pub vars: BTreeMap<String, serde_json::Value>,
    pub extracted: BTreeMap<String, serde_json::Value>,
    pub execution: ExecutionContext,
    pub now: String,
}

impl TemplateContext {
    pub fn new(execution: ExecutionContext) -> Self {
        Self {
            alert: None,
            server: None,
            vars: BTreeMap::new(),
            extracted: BTreeMap::new(),
            execution,
            now: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_alert(mut self, alert: AlertContext) -> Self {
        self.alert = Some(alert);
        self
    }

    pub fn with_server(mut self, server: ServerContext) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, serde_json::Value>) -> Self {
        self.vars = vars;
        self
    }

    pub fn bind_extracted(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extracted.insert(key.into(), value);
    }
}

/// Renders `template` against `ctx`. `lenient = true` turns undefined
/// lookups into empty strings instead of a hard failure — the escape hatch
/// spec.md §9 calls for per-field, never as a global default.
pub fn render(template: &str, ctx: &TemplateContext, lenient: bool) -> Result<String, TemplateError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(if lenient {
        UndefinedBehavior::Lenient
    } else {
        UndefinedBehavior::Strict
    });

    let value = Value::from_serialize(ctx);

    let rendered = env
        .render_str(template, value)
        .map_err(|err| classify_error(err))?;

    Ok(rendered)
}

fn classify_error(err: minijinja::Error) -> TemplateError {
    use minijinja::ErrorKind as MjErrorKind;
    match err.kind() {
        MjErrorKind::UndefinedError => TemplateError::UndefinedVariable(err.to_string()),
        MjErrorKind::SyntaxError => TemplateError::Syntax(err.to_string()),
        _ => TemplateError::Render(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> TemplateContext {
        let mut vars = BTreeMap::new();
        vars.insert("threshold".to_string(), serde_json::json!(90));
        TemplateContext::new(ExecutionContext {
            id: "exec-1".to_string(),
            mode: "auto".to_string(),
            dry_run: false,
        })
        .with_alert(AlertContext {
            name: "NginxDown".to_string(),
            severity: "critical".to_string(),
            instance: "t-01".to_string(),
            job: "web".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        })
        .with_vars(vars)
    }

    #[test]
    fn renders_known_keys() {
        let ctx = sample_context();
        let out = render("systemctl restart {{ alert.name }}", &ctx, false).unwrap();
        assert_eq!(out, "systemctl restart NginxDown");
    }

    #[test]
    fn undefined_variable_fails_strict_render() {
        let ctx = sample_context();
        let err = render("echo {{ vars.missing }}", &ctx, false).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable(_)));
    }

    #[test]
    fn lenient_render_substitutes_empty_for_missing_key() {
        let ctx = sample_context();
        let out = render("echo [{{ vars.missing }}]", &ctx, true).unwrap();
        assert_eq!(out, "echo []");
    }

    #[test]
    fn extracted_values_are_visible_to_later_steps() {
        let mut ctx = sample_context();
        ctx.bind_extracted("disk_pct", serde_json::json!(87));
        let out = render("value={{ extracted.disk_pct }}", &ctx, false).unwrap();
        assert_eq!(out, "value=87");
    }
}
