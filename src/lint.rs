use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::models::{OpenAPI, Parameter, ParameterLocation, SecurityRequirement};
use crate::operation::DuplicatePolicy;
use crate::resolver::{escape_pointer_segment, walk_schemas, Resolver};

pub(crate) static PATH_TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}/]+)\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub location: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}: {}", self.severity, self.code, self.location, self.message)
    }
}

/// Knobs for [`lint`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintConfig {
    /// A repeated parameter is an error under `Reject`, a warning otherwise
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    fn push(&mut self, severity: Severity, code: &'static str, location: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            code,
            location: location.into(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn by_code(&self, code: &str) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.code == code).collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{}", d)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.count(Severity::Error),
            self.count(Severity::Warning)
        )
    }
}

/// For every declared security scheme, the operations whose effective requirements name it
pub fn security_usage(doc: &OpenAPI) -> BTreeMap<String, Vec<String>> {
    let mut usage: BTreeMap<String, Vec<String>> = doc
        .security_schemes()
        .map(|schemes| schemes.keys().map(|k| (k.clone(), Vec::new())).collect())
        .unwrap_or_default();

    for (path, method, op) in doc.operations() {
        let id = op
            .operationId
            .clone()
            .unwrap_or_else(|| format!("{} {}", method, path));
        let requirements = op.security.as_ref().or(doc.security.as_ref());
        for name in requirement_names(requirements.map(|r| r.as_slice()).unwrap_or(&[])) {
            if let Some(ops) = usage.get_mut(name) {
                if !ops.contains(&id) {
                    ops.push(id.clone());
                }
            }
        }
    }

    usage
}

fn requirement_names(requirements: &[SecurityRequirement]) -> Vec<&str> {
    let mut names: Vec<&str> = requirements
        .iter()
        .flat_map(|r| r.keys().map(|k| k.as_str()))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Check a document for structural problems and report them in document order
pub fn lint(doc: &OpenAPI, config: &LintConfig) -> Report {
    let mut report = Report::default();

    check_version(doc, &mut report);
    check_operations(doc, config, &mut report);
    check_schemas(doc, &mut report);
    check_security(doc, &mut report);

    debug!(
        "Lint finished with {} diagnostics for {}",
        report.diagnostics.len(),
        doc.info.title
    );
    report
}

fn check_version(doc: &OpenAPI, report: &mut Report) {
    if !doc.openapi.starts_with("3.0.") {
        report.push(
            Severity::Error,
            "unsupported-version",
            "#/openapi",
            format!("OpenAPI version {} is not 3.0.x", doc.openapi),
        );
    }
}

fn check_operations(doc: &OpenAPI, config: &LintConfig, report: &mut Report) {
    let mut seen_ids: HashMap<&str, String> = HashMap::new();

    let mut paths: Vec<&String> = doc.paths.keys().collect();
    paths.sort();

    for path in paths {
        let item = &doc.paths[path];
        let base = format!("#/paths/{}", escape_pointer_segment(path));

        check_parameter_level(&item.parameters, &format!("{}/parameters", base), config, report);

        let template_vars: Vec<&str> = PATH_TEMPLATE_REGEX
            .captures_iter(path)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        for (method, op) in item.operations() {
            let op_base = format!("{}/{}", base, method.as_str().to_lowercase());

            match &op.operationId {
                Some(id) => {
                    if let Some(first) = seen_ids.get(id.as_str()) {
                        report.push(
                            Severity::Error,
                            "duplicate-operation-id",
                            format!("{}/operationId", op_base),
                            format!("operationId {} is already used at {}", id, first),
                        );
                    } else {
                        seen_ids.insert(id.as_str(), op_base.clone());
                    }
                }
                None => report.push(
                    Severity::Warning,
                    "missing-operation-id",
                    op_base.clone(),
                    format!("{} {} has no operationId", method, path),
                ),
            }

            check_parameter_level(&op.parameters, &format!("{}/parameters", op_base), config, report);

            for var in &template_vars {
                let declared = item
                    .parameters
                    .iter()
                    .chain(op.parameters.iter())
                    .any(|p| p.in_type == ParameterLocation::Path && p.name == *var);
                if !declared {
                    report.push(
                        Severity::Error,
                        "undeclared-path-parameter",
                        op_base.clone(),
                        format!("path variable {{{}}} has no path parameter", var),
                    );
                }
            }

            if op.responses.is_empty() {
                report.push(
                    Severity::Warning,
                    "empty-responses",
                    format!("{}/responses", op_base),
                    "operation declares no responses",
                );
            }
        }
    }
}

fn check_parameter_level(params: &[Parameter], base: &str, config: &LintConfig, report: &mut Report) {
    let mut first_seen: HashMap<(&str, ParameterLocation), usize> = HashMap::new();

    for (i, param) in params.iter().enumerate() {
        let location = format!("{}/{}", base, i);

        if let Some(first) = first_seen.get(&param.key()) {
            let (severity, resolution) = match config.duplicate_policy {
                DuplicatePolicy::Reject => (Severity::Error, "the document is rejected"),
                DuplicatePolicy::FirstWins => (Severity::Warning, "the first declaration is used"),
                DuplicatePolicy::LastWins => (Severity::Warning, "this declaration replaces the first"),
            };
            report.push(
                severity,
                "duplicate-parameter",
                location.clone(),
                format!(
                    "parameter ({}, {}) is already declared at {}/{}; {}",
                    param.name, param.in_type, base, first, resolution
                ),
            );
        } else {
            first_seen.insert(param.key(), i);
        }

        if param.in_type == ParameterLocation::Path && !param.is_required() {
            report.push(
                Severity::Error,
                "path-parameter-not-required",
                location,
                format!("path parameter {} must be required", param.name),
            );
        }
    }
}

fn check_schemas(doc: &OpenAPI, report: &mut Report) {
    let resolver = Resolver::new(doc);
    for dangling in resolver.dangling_refs() {
        report.push(
            Severity::Error,
            "unresolved-ref",
            dangling.location,
            dangling.error.to_string(),
        );
    }

    for (location, schema) in walk_schemas(doc) {
        if let Some(required) = &schema.required {
            let composed = schema.allOf.is_some() || schema.anyOf.is_some() || schema.oneOf.is_some();
            if !composed {
                for name in required {
                    if !schema.properties.contains_key(name) {
                        report.push(
                            Severity::Error,
                            "required-not-in-properties",
                            format!("{}/required", location),
                            format!("required property {} is not declared in properties", name),
                        );
                    }
                }
            }
        }

        if let Some(pattern) = &schema.pattern {
            if let Err(e) = Regex::new(pattern) {
                report.push(
                    Severity::Error,
                    "invalid-pattern",
                    format!("{}/pattern", location),
                    format!("pattern {:?} does not compile: {}", pattern, e),
                );
            }
        }

        if let (Some(default), Some(values)) = (&schema.default, &schema.enum_values) {
            if !values.contains(default) {
                report.push(
                    Severity::Error,
                    "default-not-in-enum",
                    format!("{}/default", location),
                    format!("default {} is not one of the enum values", default),
                );
            }
        }
    }
}

fn check_security(doc: &OpenAPI, report: &mut Report) {
    let declared: HashSet<&str> = doc
        .security_schemes()
        .map(|s| s.keys().map(|k| k.as_str()).collect())
        .unwrap_or_default();
    let mut referenced: HashSet<&str> = HashSet::new();

    if let Some(global) = &doc.security {
        for name in requirement_names(global) {
            referenced.insert(name);
            if !declared.contains(name) {
                report.push(
                    Severity::Error,
                    "unknown-security-scheme",
                    "#/security",
                    format!("security scheme {} is not declared", name),
                );
            }
        }
    }

    for (path, method, op) in doc.operations() {
        if let Some(requirements) = &op.security {
            for name in requirement_names(requirements) {
                referenced.insert(name);
                if !declared.contains(name) {
                    report.push(
                        Severity::Error,
                        "unknown-security-scheme",
                        format!(
                            "#/paths/{}/{}/security",
                            escape_pointer_segment(path),
                            method.as_str().to_lowercase()
                        ),
                        format!("security scheme {} is not declared", name),
                    );
                }
            }
        }
    }

    let mut unused: Vec<&&str> = declared.iter().filter(|name| !referenced.contains(**name)).collect();
    unused.sort();
    for name in unused {
        report.push(
            Severity::Warning,
            "unused-security-scheme",
            format!("#/components/securitySchemes/{}", escape_pointer_segment(name)),
            format!("security scheme {} is declared but never referenced", name),
        );
    }
}
