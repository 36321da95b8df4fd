//! API linting - static analysis of endpoint and resource declarations.
//!
//! Checks a built [`Api`] for:
//! - endpoints without a description (W001)
//! - endpoints returning a debug resource (W002)
//! - required arguments that also declare a default (W003)
//! - two endpoints sharing a method and URI (E001)
//! - field-tabled resources with an empty default field set (W004)

use std::collections::HashMap;

use serde::Serialize;

use crate::api::Api;
use crate::endpoint::Endpoint;
use crate::registrar::Descriptor;
use crate::resource::{Resource, ResourceKind};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    /// Declaration path of the issue (e.g., "/endpoints/parse_time/arguments/month")
    pub path: String,
    pub message: String,
}

/// What kind of declaration a result is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Endpoint,
    Resource,
}

/// Result of linting one endpoint or resource.
#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub name: String,
    pub kind: TargetKind,
    pub status: TargetStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a whole API.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<TargetResult>,
}

impl LintResult {
    /// Returns true if no declaration failed.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Lint every endpoint and resource of `api`.
///
/// If `strict` is true, warnings are treated as failures.
pub fn lint(api: &Api, strict: bool) -> LintResult {
    let mut results: Vec<TargetResult> = Vec::new();
    let mut seen: HashMap<(String, String), String> = HashMap::new();

    for endpoint in api.endpoints() {
        let mut diagnostics = lint_endpoint(endpoint);
        let key = (endpoint.method().to_string(), endpoint.uri().to_string());
        match seen.get(&key) {
            Some(first) => diagnostics.push(Diagnostic {
                severity: Severity::Error,
                code: "E001".to_string(),
                path: format!("/endpoints/{}", endpoint.route()),
                message: format!(
                    "{} {} is already handled by `{}`",
                    key.0, key.1, first
                ),
            }),
            None => {
                seen.insert(key, endpoint.route().to_string());
            }
        }
        results.push(target_result(endpoint.route(), TargetKind::Endpoint, diagnostics));
    }

    for resource in api.resources() {
        let diagnostics = lint_resource(resource);
        results.push(target_result(resource.name(), TargetKind::Resource, diagnostics));
    }

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != TargetStatus::Ok
            } else {
                r.status == TargetStatus::Error
            }
        })
        .count();

    LintResult {
        checked: results.len(),
        passed: results.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

fn lint_endpoint(endpoint: &Endpoint) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let base = format!("/endpoints/{}", endpoint.route());

    if endpoint.description.trim().is_empty() {
        diagnostics.push(warning("W001", &base, "endpoint has no description".to_string()));
    }

    if let Ok(target) = endpoint.returns().target.resolve() {
        if target.is_debug() {
            diagnostics.push(warning(
                "W002",
                &format!("{}/returns", base),
                format!("returns debug resource `{}`", target.name()),
            ));
        }
    }

    for argument in endpoint.arguments() {
        if argument.required && argument.default.is_some() {
            diagnostics.push(warning(
                "W003",
                &format!("{}/arguments/{}", base, argument.name()),
                "required argument declares a default that always applies".to_string(),
            ));
        }
    }
    diagnostics
}

fn lint_resource(resource: &Resource) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if resource.kind() == ResourceKind::Fields && resource.default_fields().is_empty() {
        diagnostics.push(warning(
            "W004",
            &format!("/resources/{}", resource.name()),
            "resource renders no fields by default".to_string(),
        ));
    }
    diagnostics
}

fn warning(code: &str, path: &str, message: String) -> Diagnostic {
    Diagnostic {
        severity: Severity::Warning,
        code: code.to_string(),
        path: path.to_string(),
        message,
    }
}

fn target_result(name: &str, kind: TargetKind, diagnostics: Vec<Diagnostic>) -> TargetResult {
    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        TargetStatus::Error
    } else if has_warnings {
        TargetStatus::Warning
    } else {
        TargetStatus::Ok
    };

    TargetResult {
        name: name.to_string(),
        kind,
        status,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::Argument;
    use crate::endpoint::Reply;
    use crate::field::Field;
    use crate::resource::Returns;
    use serde_json::json;

    fn thing() -> std::sync::Arc<Resource> {
        Resource::builder("Thing", "a thing")
            .field("id", Field::integer("id"))
            .build()
            .unwrap()
    }

    fn get(route: &str, uri: &str) -> crate::endpoint::EndpointBuilder {
        Endpoint::get(route, uri)
            .description("does a thing")
            .handler(|_| Ok(Reply::empty()))
    }

    fn codes(result: &LintResult) -> Vec<&str> {
        result
            .results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .map(|d| d.code.as_str())
            .collect()
    }

    #[test]
    fn clean_api_passes() {
        let api = Api::builder()
            .endpoint(get("one", "/one").returns(Returns::one("thing", thing())).build().unwrap())
            .build()
            .unwrap();
        let result = lint(&api, true);
        assert!(result.is_ok());
        assert_eq!(result.errors + result.warnings, 0);
        assert_eq!(result.checked, 2);
    }

    #[test]
    fn missing_description() {
        let endpoint = Endpoint::get("bare", "/bare")
            .handler(|_| Ok(Reply::empty()))
            .build()
            .unwrap();
        let api = Api::builder().endpoint(endpoint).build().unwrap();
        let result = lint(&api, false);
        assert!(codes(&result).contains(&"W001"));
        assert!(result.is_ok());
        assert!(!lint(&api, true).is_ok());
    }

    #[test]
    fn debug_return() {
        let api = Api::builder()
            .endpoint(
                get("dump", "/dump")
                    .returns(Returns::one("dump", Resource::debug("Dump", "raw")))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert!(codes(&lint(&api, false)).contains(&"W002"));
    }

    #[test]
    fn required_with_default() {
        let api = Api::builder()
            .endpoint(
                get("page", "/page")
                    .argument("n", Argument::integer("n").required().default(json!(1)))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert!(codes(&lint(&api, false)).contains(&"W003"));
    }

    #[test]
    fn duplicate_method_and_uri() {
        let api = Api::builder()
            .endpoint(get("a", "/same").build().unwrap())
            .endpoint(get("b", "/same").build().unwrap())
            .build()
            .unwrap();
        let result = lint(&api, false);
        assert!(codes(&result).contains(&"E001"));
        assert_eq!(result.errors, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn empty_default_fields() {
        let hidden = Resource::builder("Hidden", "nothing by default")
            .field("id", Field::integer("id"))
            .default_fields::<&str>(&[])
            .build()
            .unwrap();
        let api = Api::builder().resource(hidden).build().unwrap();
        assert!(codes(&lint(&api, false)).contains(&"W004"));
    }
}
