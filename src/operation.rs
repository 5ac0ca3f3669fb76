use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::{Method, OpenAPI, Operation, Parameter, ParameterLocation, SecurityRequirement, Server};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Operation {operation} declares parameter ({name}, {location}) more than once")]
    DuplicateParameter {
        operation: String,
        name: String,
        location: ParameterLocation,
    },

    #[error("operationId {0} is used by more than one operation")]
    DuplicateOperationId(String),

    #[error("Operation not found: {0}")]
    NotFound(String),
}

/// How a repeated `(name, in)` parameter inside one operation is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Refuse to index the operation
    Reject,
    /// Keep the first declaration
    FirstWins,
    /// Keep the last declaration
    #[default]
    LastWins,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "first-wins" => Ok(Self::FirstWins),
            "last-wins" => Ok(Self::LastWins),
            other => Err(format!(
                "unknown duplicate policy '{}', expected reject, first-wins or last-wins",
                other
            )),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reject => "reject",
            Self::FirstWins => "first-wins",
            Self::LastWins => "last-wins",
        };
        f.write_str(s)
    }
}

/// An operation with its path-level context folded in
#[derive(Debug, Clone)]
pub struct IndexedOperation<'a> {
    pub operation_id: String,
    pub method: Method,
    pub path: &'a str,
    pub operation: &'a Operation,
    /// Path-item parameters overridden by operation parameters, duplicates resolved
    pub parameters: Vec<&'a Parameter>,
    /// Operation servers, else path-item servers, else document servers
    pub servers: &'a [Server],
    /// Operation requirements, else document requirements
    pub security: &'a [SecurityRequirement],
}

impl<'a> IndexedOperation<'a> {
    pub fn parameter(&self, name: &str, location: ParameterLocation) -> Option<&'a Parameter> {
        self.parameters
            .iter()
            .copied()
            .find(|p| p.key() == (name, location))
    }

    /// Names of the security schemes this operation references
    pub fn security_schemes(&self) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .security
            .iter()
            .flat_map(|req| req.keys().map(|k| k.as_str()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Operations of one document keyed by operationId
#[derive(Debug)]
pub struct OperationIndex<'a> {
    operations: BTreeMap<String, IndexedOperation<'a>>,
}

impl<'a> OperationIndex<'a> {
    pub fn build(doc: &'a OpenAPI, policy: DuplicatePolicy) -> Result<Self, OperationError> {
        let mut operations = BTreeMap::new();
        let empty: &[SecurityRequirement] = &[];

        for (path, method, op) in doc.operations() {
            let item = &doc.paths[path];
            let operation_id = op
                .operationId
                .clone()
                .unwrap_or_else(|| format!("{} {}", method, path));

            let path_params = dedupe(&item.parameters, policy, &operation_id)?;
            let op_params = dedupe(&op.parameters, policy, &operation_id)?;
            let parameters = merge_levels(path_params, op_params);

            let servers = if !op.servers.is_empty() {
                &op.servers[..]
            } else if !item.servers.is_empty() {
                &item.servers[..]
            } else {
                &doc.servers[..]
            };

            let security = op
                .security
                .as_deref()
                .or(doc.security.as_deref())
                .unwrap_or(empty);

            debug!(
                "Indexed {} {} as {} with {} parameters",
                method,
                path,
                operation_id,
                parameters.len()
            );

            let indexed = IndexedOperation {
                operation_id: operation_id.clone(),
                method,
                path,
                operation: op,
                parameters,
                servers,
                security,
            };
            if operations.insert(operation_id.clone(), indexed).is_some() {
                return Err(OperationError::DuplicateOperationId(operation_id));
            }
        }

        Ok(Self { operations })
    }

    pub fn get(&self, operation_id: &str) -> Result<&IndexedOperation<'a>, OperationError> {
        self.operations
            .get(operation_id)
            .ok_or_else(|| OperationError::NotFound(operation_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedOperation<'a>> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Resolve repeated `(name, in)` pairs within one declaration level.
/// The surviving parameter keeps the position of the first declaration.
fn dedupe<'a>(
    params: &'a [Parameter],
    policy: DuplicatePolicy,
    operation_id: &str,
) -> Result<Vec<&'a Parameter>, OperationError> {
    let mut out: Vec<&Parameter> = Vec::with_capacity(params.len());

    for param in params {
        match out.iter().position(|p| p.key() == param.key()) {
            None => out.push(param),
            Some(i) => match policy {
                DuplicatePolicy::Reject => {
                    return Err(OperationError::DuplicateParameter {
                        operation: operation_id.to_string(),
                        name: param.name.clone(),
                        location: param.in_type,
                    });
                }
                DuplicatePolicy::FirstWins => {
                    warn!(
                        "{}: ignoring repeated parameter ({}, {})",
                        operation_id, param.name, param.in_type
                    );
                }
                DuplicatePolicy::LastWins => {
                    warn!(
                        "{}: repeated parameter ({}, {}) replaces the earlier declaration",
                        operation_id, param.name, param.in_type
                    );
                    out[i] = param;
                }
            },
        }
    }

    Ok(out)
}

/// Operation-level parameters override path-level ones with the same `(name, in)`
fn merge_levels<'a>(path_params: Vec<&'a Parameter>, op_params: Vec<&'a Parameter>) -> Vec<&'a Parameter> {
    let mut merged: Vec<&Parameter> = path_params
        .into_iter()
        .filter(|p| !op_params.iter().any(|o| o.key() == p.key()))
        .collect();
    merged.extend(op_params);
    merged
}
