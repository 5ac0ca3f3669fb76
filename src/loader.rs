use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

use crate::models::{Info, Method, OpenAPI, ParameterLocation};

/// The test API definition shipped with the crate
pub const TESTAPI_YAML: &str = include_str!("../apis/testapi/testapi.v1.yaml");

static DEFINITION_FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<service>[\w-]+)\.v(?P<version>\d+)\.ya?ml$").unwrap());

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse OpenAPI document {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse OpenAPI document: {0}")]
    ParseText(#[source] serde_yaml::Error),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Version {version} of service {service} not found")]
    VersionNotFound { service: String, version: u32 },
}

/// Parse an OpenAPI document from YAML (or JSON) text
pub fn load_str(text: &str) -> Result<OpenAPI, LoadError> {
    serde_yaml::from_str(text).map_err(LoadError::ParseText)
}

/// Read and parse an OpenAPI document from disk
pub fn load_file(path: impl AsRef<Path>) -> Result<OpenAPI, LoadError> {
    let path = path.as_ref();
    debug!("Loading OpenAPI document: {:?}", path);

    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The bundled test API document
pub fn testapi_document() -> Result<OpenAPI, LoadError> {
    load_str(TESTAPI_YAML)
}

/// One parameter as shown by [`ApiDirectory::describe`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    pub required: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Shape of a single operation as shown by [`ApiDirectory::describe`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationSummary {
    pub method: Method,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub parameters: Vec<ParameterSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security: Vec<String>,
}

/// Service info plus its operations sorted by operationId
#[derive(Debug, Clone, Serialize)]
pub struct ServiceModel {
    pub info: Info,
    pub operations: BTreeMap<String, OperationSummary>,
}

impl ServiceModel {
    pub fn from_document(doc: &OpenAPI) -> Self {
        let mut operations = BTreeMap::new();

        for (path, method, op) in doc.operations() {
            let path_params = &doc.paths[path].parameters;
            let parameters = path_params
                .iter()
                .chain(op.parameters.iter())
                .map(|p| ParameterSummary {
                    name: p.name.clone(),
                    location: p.in_type,
                    required: p.is_required(),
                    type_: p.schema.as_ref().and_then(|s| s.type_.clone()),
                })
                .collect();

            let mut content_types: Vec<String> = op
                .requestBody
                .as_ref()
                .map(|body| body.content.keys().cloned().collect())
                .unwrap_or_default();
            content_types.sort();

            let mut security: Vec<String> = op
                .security
                .as_ref()
                .or(doc.security.as_ref())
                .map(|reqs| reqs.iter().flat_map(|r| r.keys().cloned()).collect())
                .unwrap_or_default();
            security.sort();
            security.dedup();

            let key = op
                .operationId
                .clone()
                .unwrap_or_else(|| format!("{} {}", method, path));

            operations.insert(
                key,
                OperationSummary {
                    method,
                    path: path.to_string(),
                    summary: op.summary.clone(),
                    parameters,
                    content_types,
                    security,
                },
            );
        }

        Self {
            info: doc.info.clone(),
            operations,
        }
    }
}

/// A directory of service definitions laid out as `<dir>/<service>/<service>.v<N>.yaml`
#[derive(Debug, Clone)]
pub struct ApiDirectory {
    root: PathBuf,
}

impl ApiDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the services found in the directory, sorted
    pub fn list_services(&self) -> Result<Vec<String>, LoadError> {
        let entries = fs::read_dir(&self.root).map_err(|source| LoadError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut services: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        services.sort();

        debug!("Found {} services in {:?}", services.len(), self.root);
        Ok(services)
    }

    /// Definition files of one service keyed by version
    pub fn versions(&self, service: &str) -> Result<BTreeMap<u32, PathBuf>, LoadError> {
        let service_dir = self.root.join(service);
        if !service_dir.is_dir() {
            return Err(LoadError::ServiceNotFound(service.to_string()));
        }

        let mut versions = BTreeMap::new();
        for entry in WalkDir::new(&service_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            match DEFINITION_FILE_REGEX.captures(&file_name) {
                Some(caps) if &caps["service"] == service => {
                    if let Ok(version) = caps["version"].parse::<u32>() {
                        versions.insert(version, entry.path().to_path_buf());
                    }
                }
                _ => debug!("Skipping non-definition file: {:?}", entry.path()),
            }
        }

        Ok(versions)
    }

    /// Load a service definition, the latest version when `version` is `None`
    pub fn load(&self, service: &str, version: Option<u32>) -> Result<OpenAPI, LoadError> {
        let versions = self.versions(service)?;

        let path = match version {
            Some(v) => versions.get(&v).ok_or_else(|| LoadError::VersionNotFound {
                service: service.to_string(),
                version: v,
            })?,
            None => match versions.values().next_back() {
                Some(path) => path,
                None => {
                    warn!("Service directory for {} holds no definitions", service);
                    return Err(LoadError::ServiceNotFound(service.to_string()));
                }
            },
        };

        load_file(path)
    }

    /// Summarise a service: its info and operations sorted by operationId
    pub fn describe(&self, service: &str, version: Option<u32>) -> Result<ServiceModel, LoadError> {
        let doc = self.load(service, version)?;
        Ok(ServiceModel::from_document(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
openapi: 3.0.2
info:
  title: Minimal
  version: "1"
paths: {}
"#;

    #[test]
    fn test_load_bundled_document() {
        let doc = testapi_document().unwrap();
        assert_eq!(doc.openapi, "3.0.2");
        assert_eq!(doc.servers.len(), 2);
        assert!(doc.servers.iter().all(|s| s.sessionEndpoint));
        assert_eq!(doc.paths.len(), 1);
    }

    #[test]
    fn test_load_json_text() {
        let doc = load_str(r#"{"openapi": "3.0.0", "info": {"title": "J", "version": "2"}}"#).unwrap();
        assert_eq!(doc.info.title, "J");
        assert!(doc.paths.is_empty());
    }

    #[test]
    fn test_load_str_reports_parse_error() {
        let err = load_str("openapi: [").unwrap_err();
        assert!(matches!(err, LoadError::ParseText(_)));
    }

    #[test]
    fn test_load_file_missing() {
        let dir = tempdir().unwrap();
        let err = load_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_directory_lists_services_and_picks_latest() {
        let dir = tempdir().unwrap();
        for (service, file) in [("beta", "beta.v1.yaml"), ("alpha", "alpha.v1.yaml"), ("alpha", "alpha.v2.yaml")] {
            let service_dir = dir.path().join(service);
            fs::create_dir_all(&service_dir).unwrap();
            let body = MINIMAL.replace("version: \"1\"", &format!("version: \"{}\"", file));
            fs::write(service_dir.join(file), body).unwrap();
        }
        fs::write(dir.path().join("alpha").join("README.md"), "not a definition").unwrap();

        let api = ApiDirectory::new(dir.path());
        assert_eq!(api.list_services().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(api.versions("alpha").unwrap().keys().copied().collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(api.load("alpha", None).unwrap().info.version, "alpha.v2.yaml");
        assert_eq!(api.load("alpha", Some(1)).unwrap().info.version, "alpha.v1.yaml");
        assert!(matches!(
            api.load("alpha", Some(7)),
            Err(LoadError::VersionNotFound { version: 7, .. })
        ));
        assert!(matches!(api.load("gamma", None), Err(LoadError::ServiceNotFound(_))));
    }

    #[test]
    fn test_describe_bundled_service() {
        let model = ServiceModel::from_document(&testapi_document().unwrap());

        let names: Vec<&String> = model.operations.keys().collect();
        assert_eq!(names, vec!["post_payload_in_body", "test_get_data"]);

        let get = &model.operations["test_get_data"];
        assert_eq!(get.method, Method::Get);
        assert_eq!(get.path, "/testapi/v1/{account_id}/test_get_data");
        // account_id, two headers and the duplicated query parameter
        assert_eq!(get.parameters.len(), 5);
        assert_eq!(get.security, vec!["X-AIMS-Auth-Token"]);

        let post = &model.operations["post_payload_in_body"];
        assert_eq!(post.content_types, vec!["application/json", "application/protobuf"]);
    }
}
