use base64::Engine;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use url::Url;

use crate::lint::PATH_TEMPLATE_REGEX;
use crate::models::{
    MediaType, Method, OpenAPI, Operation, ParameterLocation, Schema, SecurityScheme, SecuritySchemeType,
    Server,
};
use crate::operation::IndexedOperation;
use crate::resolver::{ResolveError, Resolver};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("{operation}: missing required parameter {name}")]
    MissingParameter { operation: String, name: String },

    #[error("{operation}: invalid value for {name}: {message}")]
    InvalidValue {
        operation: String,
        name: String,
        message: String,
    },

    #[error("{operation}: content type {content_type} is not supported")]
    UnsupportedContentType { operation: String, content_type: String },

    #[error("{operation}: request body is required")]
    MissingBody { operation: String },

    #[error("{operation}: no credentials for any of the security schemes {}", .schemes.join(", "))]
    MissingCredentials { operation: String, schemes: Vec<String> },

    #[error("{operation}: security scheme {scheme} cannot be applied")]
    UnsupportedSecurityScheme { operation: String, scheme: String },

    #[error("{0}: no server to send the request to")]
    NoServer(String),

    #[error("Invalid server URL {url}: {source}")]
    InvalidServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Server URL {0} cannot carry a path")]
    CannotBeABase(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Secrets used to satisfy an operation's security requirements
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Value for `apiKey` schemes, the AIMS token for Alert Logic services
    pub api_key: Option<String>,
    /// Username and password for `http`/`basic` schemes
    pub basic: Option<(String, String)>,
    /// Token for `http`/`bearer` schemes
    pub bearer: Option<String>,
}

impl Credentials {
    pub fn with_api_key(token: impl Into<String>) -> Self {
        Self {
            api_key: Some(token.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Body {
    Json(Value),
    Bytes(Vec<u8>),
}

/// A request ready to be handed to an HTTP client
#[derive(Debug, Clone, Serialize)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl PreparedRequest {
    /// Query pairs in the order they were added
    pub fn query(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

/// Builds a [`PreparedRequest`] for one operation
pub struct RequestBuilder<'d, 'o> {
    resolver: Resolver<'d>,
    operation: &'o IndexedOperation<'d>,
    endpoint: Option<String>,
    content_type: Option<String>,
    defaults: HashMap<String, Value>,
    credentials: Credentials,
    // Compiled `pattern`s, `None` when the pattern is not a valid regex
    patterns: RefCell<HashMap<String, Option<Regex>>>,
}

impl<'d, 'o> RequestBuilder<'d, 'o> {
    pub fn new(doc: &'d OpenAPI, operation: &'o IndexedOperation<'d>) -> Self {
        Self {
            resolver: Resolver::new(doc),
            operation,
            endpoint: None,
            content_type: None,
            defaults: HashMap::new(),
            credentials: Credentials::default(),
            patterns: RefCell::new(HashMap::new()),
        }
    }

    /// Pick the server whose description names this endpoint (`production`, `integration`)
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Value used for a parameter the caller leaves out, ahead of the schema default
    pub fn default_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    fn op_id(&self) -> String {
        self.operation.operation_id.clone()
    }

    pub fn build(&self, args: &Map<String, Value>) -> Result<PreparedRequest, RequestError> {
        let op = self.operation;
        debug!("Preparing {} {} ({})", op.method, op.path, op.operation_id);

        let mut path_values: HashMap<&str, String> = HashMap::new();
        let mut query: Vec<(String, String)> = Vec::new();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let mut cookies: BTreeMap<String, String> = BTreeMap::new();
        let mut consumed: Vec<&str> = Vec::new();

        for param in op.parameters.iter().copied() {
            let value = match args.get(&param.name) {
                Some(v) => {
                    consumed.push(param.name.as_str());
                    Some(v.clone())
                }
                None => self
                    .defaults
                    .get(&param.name)
                    .cloned()
                    .or_else(|| param.schema.as_ref().and_then(|s| s.default.clone())),
            };

            let value = match value {
                Some(v) => v,
                None if param.is_required() || param.in_type == ParameterLocation::Path => {
                    return Err(RequestError::MissingParameter {
                        operation: self.op_id(),
                        name: param.name.clone(),
                    });
                }
                None => continue,
            };

            if let Some(schema) = &param.schema {
                self.validate(&param.name, schema, &value)?;
            }

            match param.in_type {
                ParameterLocation::Path => {
                    path_values.insert(param.name.as_str(), simple_style(&value));
                }
                ParameterLocation::Query => match &value {
                    Value::Array(items) if param.explode.unwrap_or(true) => {
                        for item in items {
                            query.push((param.name.clone(), scalar_string(item)));
                        }
                    }
                    _ => query.push((param.name.clone(), simple_style(&value))),
                },
                ParameterLocation::Header => {
                    headers.insert(param.name.clone(), simple_style(&value));
                }
                ParameterLocation::Cookie => {
                    cookies.insert(param.name.clone(), simple_style(&value));
                }
            }
        }

        let mut url = self.base_url()?;
        self.push_path(&mut url, &path_values)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        let remaining: Map<String, Value> = args
            .iter()
            .filter(|(k, _)| !consumed.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let operation: &'d Operation = op.operation;
        let (content_type, body) = match &operation.requestBody {
            Some(request_body) => {
                let (content_type, media) = self.select_media(&request_body.content)?;
                let body = self.build_body(&content_type, media, &remaining)?;
                if body.is_none() && request_body.required.unwrap_or(false) {
                    return Err(RequestError::MissingBody { operation: self.op_id() });
                }
                (body.as_ref().map(|_| content_type), body)
            }
            None => {
                if !remaining.is_empty() {
                    let names: Vec<&String> = remaining.keys().collect();
                    warn!("{}: ignoring unknown arguments {:?}", op.operation_id, names);
                }
                (None, None)
            }
        };

        if let Some(ct) = &content_type {
            headers.insert("Content-Type".to_string(), ct.clone());
        }

        let mut request = PreparedRequest {
            method: op.method,
            url,
            headers,
            cookies,
            content_type,
            body,
        };
        self.apply_security(&mut request)?;

        Ok(request)
    }

    fn base_url(&self) -> Result<Url, RequestError> {
        let server = select_server(self.operation.servers, self.endpoint.as_deref())
            .ok_or_else(|| RequestError::NoServer(self.op_id()))?;

        let mut raw = server.url.clone();
        for (name, variable) in &server.variables {
            raw = raw.replace(&format!("{{{}}}", name), &variable.default);
        }

        Url::parse(&raw).map_err(|source| RequestError::InvalidServerUrl { url: raw, source })
    }

    fn push_path(&self, url: &mut Url, values: &HashMap<&str, String>) -> Result<(), RequestError> {
        let base = url.to_string();
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| RequestError::CannotBeABase(base))?;
        segments.pop_if_empty();

        for segment in self.operation.path.split('/').filter(|s| !s.is_empty()) {
            // One pass over the template so substituted values are never expanded again
            let expanded = PATH_TEMPLATE_REGEX.replace_all(segment, |caps: &Captures| match values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            });

            // `url` drops `.` and `..` segments, which would change the resource
            if expanded == "." || expanded == ".." {
                let names: Vec<String> = PATH_TEMPLATE_REGEX
                    .captures_iter(segment)
                    .map(|c| c[1].to_string())
                    .collect();
                return Err(self.invalid(
                    &names.join(","),
                    format!("path segment {:?} is a dot segment", expanded),
                ));
            }
            segments.push(&expanded);
        }

        Ok(())
    }

    fn select_media(
        &self,
        content: &'d HashMap<String, MediaType>,
    ) -> Result<(String, &'d MediaType), RequestError> {
        let wanted = match &self.content_type {
            Some(ct) => ct.clone(),
            None if content.contains_key(JSON_CONTENT_TYPE) => JSON_CONTENT_TYPE.to_string(),
            None => {
                let mut types: Vec<&String> = content.keys().collect();
                types.sort();
                match types.first() {
                    Some(ct) => ct.to_string(),
                    None => {
                        return Err(RequestError::UnsupportedContentType {
                            operation: self.op_id(),
                            content_type: String::new(),
                        })
                    }
                }
            }
        };

        match content.get(&wanted) {
            Some(media) => Ok((wanted, media)),
            None => Err(RequestError::UnsupportedContentType {
                operation: self.op_id(),
                content_type: wanted,
            }),
        }
    }

    fn build_body(
        &self,
        content_type: &str,
        media: &'d MediaType,
        remaining: &Map<String, Value>,
    ) -> Result<Option<Body>, RequestError> {
        let schema = match &media.schema {
            Some(schema) => Some(self.resolver.resolve_schema(schema)?),
            None => None,
        };

        // Only arguments the body schema declares go into the payload
        let mut payload = Map::new();
        for (name, value) in remaining {
            let declared = schema.map_or(true, |s| s.properties.is_empty() || s.properties.contains_key(name));
            if declared {
                payload.insert(name.clone(), value.clone());
            } else {
                warn!("{}: ignoring unknown argument {}", self.operation.operation_id, name);
            }
        }

        if let Some(schema) = schema {
            for name in schema.required.iter().flatten() {
                if !payload.contains_key(name) {
                    return Err(RequestError::MissingParameter {
                        operation: self.op_id(),
                        name: name.clone(),
                    });
                }
            }
            for (name, value) in &payload {
                if let Some(prop) = schema.properties.get(name) {
                    self.validate(name, prop, value)?;
                }
            }
        }

        if payload.is_empty() {
            return Ok(None);
        }

        if is_json(content_type) {
            if let Some(placement) = &media.bodyPlacement {
                if let Some(inner) = payload.remove(&placement.name) {
                    debug!("Unwrapping {} into the request body", placement.name);
                    payload.extend(unwrap_one_level(inner));
                }
            }
            return Ok(Some(Body::Json(Value::Object(payload))));
        }

        // Non-JSON bodies carry a single binary property
        let binary = schema.and_then(|s| {
            s.properties
                .iter()
                .find(|(name, prop)| prop.format.as_deref() == Some("binary") && payload.contains_key(*name))
                .map(|(name, _)| name.clone())
        });
        match binary.and_then(|name| payload.get(&name).map(|v| (name.clone(), v))) {
            Some((name, value)) => Ok(Some(Body::Bytes(self.to_bytes(&name, value)?))),
            None => Err(RequestError::UnsupportedContentType {
                operation: self.op_id(),
                content_type: content_type.to_string(),
            }),
        }
    }

    fn to_bytes(&self, name: &str, value: &Value) -> Result<Vec<u8>, RequestError> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| self.invalid(name, "binary data must be a string or a list of bytes"))
                })
                .collect(),
            _ => Err(self.invalid(name, "binary data must be a string or a list of bytes")),
        }
    }

    fn apply_security(&self, request: &mut PreparedRequest) -> Result<(), RequestError> {
        let requirements = self.operation.security;
        if requirements.is_empty() {
            return Ok(());
        }

        let schemes = self.resolver_schemes();
        // Requirements are alternatives; every scheme inside one must be satisfied
        'requirement: for requirement in requirements {
            let mut applied = request.clone();
            let mut names: Vec<&String> = requirement.keys().collect();
            names.sort();

            for name in names {
                let scheme = match schemes.and_then(|s| s.get(name)) {
                    Some(scheme) => scheme,
                    None => continue 'requirement,
                };

                match scheme.type_ {
                    SecuritySchemeType::ApiKey => {
                        let (Some(key), Some(location), Some(field)) =
                            (&self.credentials.api_key, scheme.in_type, &scheme.name)
                        else {
                            continue 'requirement;
                        };
                        match location {
                            ParameterLocation::Header => {
                                applied.headers.insert(field.clone(), key.clone());
                            }
                            ParameterLocation::Query => {
                                applied.url.query_pairs_mut().append_pair(field, key);
                            }
                            ParameterLocation::Cookie => {
                                applied.cookies.insert(field.clone(), key.clone());
                            }
                            ParameterLocation::Path => {
                                return Err(RequestError::UnsupportedSecurityScheme {
                                    operation: self.op_id(),
                                    scheme: name.clone(),
                                })
                            }
                        }
                    }
                    SecuritySchemeType::Http => {
                        let value = match scheme.scheme.as_deref().map(str::to_lowercase).as_deref() {
                            Some("basic") => match &self.credentials.basic {
                                Some((user, password)) => format!(
                                    "Basic {}",
                                    base64::engine::general_purpose::STANDARD
                                        .encode(format!("{}:{}", user, password))
                                ),
                                None => continue 'requirement,
                            },
                            Some("bearer") => match &self.credentials.bearer {
                                Some(token) => format!("Bearer {}", token),
                                None => continue 'requirement,
                            },
                            _ => {
                                return Err(RequestError::UnsupportedSecurityScheme {
                                    operation: self.op_id(),
                                    scheme: name.clone(),
                                })
                            }
                        };
                        applied.headers.insert("Authorization".to_string(), value);
                    }
                    SecuritySchemeType::OAuth2 | SecuritySchemeType::OpenIdConnect => {
                        match &self.credentials.bearer {
                            Some(token) => {
                                applied
                                    .headers
                                    .insert("Authorization".to_string(), format!("Bearer {}", token));
                            }
                            None => continue 'requirement,
                        }
                    }
                }
            }

            *request = applied;
            return Ok(());
        }

        let mut names: Vec<String> = requirements.iter().flat_map(|r| r.keys().cloned()).collect();
        names.sort();
        names.dedup();
        Err(RequestError::MissingCredentials {
            operation: self.op_id(),
            schemes: names,
        })
    }

    fn resolver_schemes(&self) -> Option<&'d HashMap<String, SecurityScheme>> {
        self.resolver.document().security_schemes()
    }

    fn invalid(&self, name: &str, message: impl Into<String>) -> RequestError {
        RequestError::InvalidValue {
            operation: self.op_id(),
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// `None` when the pattern does not compile; such patterns are skipped
    fn pattern_matches(&self, pattern: &str, value: &str) -> Option<bool> {
        let mut patterns = self.patterns.borrow_mut();
        let compiled = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!("Skipping invalid pattern {:?}: {}", pattern, e);
                    None
                }
            });
        compiled.as_ref().map(|re| re.is_match(value))
    }

    /// Type, enum and pattern checks for one argument
    fn validate(&self, name: &str, schema: &'d Schema, value: &Value) -> Result<(), RequestError> {
        let schema = self.resolver.resolve_schema(schema)?;

        if value.is_null() && schema.nullable.unwrap_or(false) {
            return Ok(());
        }

        let type_ok = match schema.type_.as_deref() {
            Some("string") => value.is_string(),
            Some("integer") => value.is_i64() || value.is_u64(),
            Some("number") => value.is_number(),
            Some("boolean") => value.is_boolean(),
            Some("array") => value.is_array(),
            Some("object") => value.is_object(),
            _ => true,
        };
        if !type_ok {
            return Err(self.invalid(
                name,
                format!("expected {}, got {}", schema.type_.as_deref().unwrap_or("any"), value),
            ));
        }

        if let Some(values) = &schema.enum_values {
            if !values.contains(value) {
                return Err(self.invalid(name, format!("{} is not one of {}", value, Value::Array(values.clone()))));
            }
        }

        if let (Some(pattern), Some(s)) = (&schema.pattern, value.as_str()) {
            if self.pattern_matches(pattern, s) == Some(false) {
                return Err(self.invalid(name, format!("{:?} does not match {}", s, pattern)));
            }
        }

        if let (Some(items), Value::Array(values)) = (&schema.items, value) {
            for item in values {
                self.validate(name, items, item)?;
            }
        }

        Ok(())
    }
}

/// Prefer session endpoints, then the server named by `endpoint`, then the first one
pub fn select_server<'s>(servers: &'s [Server], endpoint: Option<&str>) -> Option<&'s Server> {
    let session: Vec<&Server> = servers.iter().filter(|s| s.sessionEndpoint).collect();
    let candidates: Vec<&Server> = if session.is_empty() {
        servers.iter().collect()
    } else {
        session
    };

    if let Some(endpoint) = endpoint {
        let named = candidates
            .iter()
            .copied()
            .find(|s| s.description.as_deref() == Some(endpoint) || s.url == endpoint);
        if named.is_some() {
            return named;
        }
        warn!("No server named {}, falling back to the first server", endpoint);
    }

    candidates.first().copied()
}

/// The `x-alertlogic-schema` rule: entries of the wrapped object are unwrapped one level.
/// Object values contribute their own keys; anything else stays under its key.
pub fn unwrap_one_level(inner: Value) -> Map<String, Value> {
    let mut out = Map::new();
    match inner {
        Value::Object(entries) => {
            for (key, value) in entries {
                match value {
                    Value::Object(nested) => out.extend(nested),
                    other => {
                        out.insert(key, other);
                    }
                }
            }
        }
        other => {
            warn!("Body placement expects an object, got {}", other);
        }
    }
    out
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence == JSON_CONTENT_TYPE || essence.ends_with("+json")
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// OpenAPI `simple` style: arrays and objects become comma separated lists
fn simple_style(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(scalar_string).collect::<Vec<_>>().join(","),
        Value::Object(entries) => entries
            .iter()
            .flat_map(|(k, v)| [k.clone(), scalar_string(v)])
            .collect::<Vec<_>>()
            .join(","),
        other => scalar_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{load_str, testapi_document};
    use crate::operation::{DuplicatePolicy, OperationIndex};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("arguments must be an object"),
        }
    }

    #[test]
    fn test_get_dispatches_parameters_by_location() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("test_get_data").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .endpoint("integration")
            .credentials(Credentials::with_api_key("tok"))
            .build(&args(json!({
                "account_id": "2",
                "header_param2": 7,
                "query_param1": ["a", "b"],
            })))
            .unwrap();

        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.product.dev.alertlogic.com/testapi/v1/2/test_get_data?query_param1=a&query_param1=b"
        );
        assert_eq!(request.headers["header_param1"], "choice1");
        assert_eq!(request.headers["header_param2"], "7");
        assert_eq!(request.headers["X-AIMS-Auth-Token"], "tok");
        assert!(request.body.is_none());
        assert!(request.content_type.is_none());
    }

    #[test]
    fn test_get_rejects_values_outside_schema() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("test_get_data").unwrap();
        let builder = RequestBuilder::new(&doc, op).credentials(Credentials::with_api_key("tok"));

        let err = builder
            .build(&args(json!({"account_id": "2", "header_param1": "choice9"})))
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidValue { ref name, .. } if name == "header_param1"));

        let err = builder
            .build(&args(json!({"account_id": "2", "header_param2": "seven"})))
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidValue { ref name, .. } if name == "header_param2"));

        let err = builder.build(&args(json!({}))).unwrap_err();
        assert!(matches!(err, RequestError::MissingParameter { ref name, .. } if name == "account_id"));
    }

    #[test]
    fn test_first_wins_requires_query_param() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::FirstWins).unwrap();
        let op = index.get("test_get_data").unwrap();

        let err = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("tok"))
            .build(&args(json!({"account_id": "2"})))
            .unwrap_err();
        assert!(matches!(err, RequestError::MissingParameter { ref name, .. } if name == "query_param1"));
    }

    #[test]
    fn test_post_flattens_data_into_body() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("post_payload_in_body").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("tok"))
            .default_value("account_id", json!("12345678"))
            .build(&args(json!({"data": {"tagset": {"key1": "v1", "key2": "v2"}}})))
            .unwrap();

        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.alertlogic.com/testapi/v1/12345678/test_get_data"
        );
        assert_eq!(request.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(request.headers["Content-Type"], JSON_CONTENT_TYPE);
        assert_eq!(request.body, Some(Body::Json(json!({"key1": "v1", "key2": "v2"}))));
    }

    #[test]
    fn test_post_protobuf_sends_raw_bytes() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("post_payload_in_body").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .content_type("application/protobuf")
            .credentials(Credentials::with_api_key("tok"))
            .build(&args(json!({"account_id": "1", "data": "\u{8}\u{1}"})))
            .unwrap();

        assert_eq!(request.content_type.as_deref(), Some("application/protobuf"));
        assert_eq!(request.body, Some(Body::Bytes(vec![8, 1])));
    }

    #[test]
    fn test_post_without_data_or_credentials() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("post_payload_in_body").unwrap();

        let err = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("tok"))
            .build(&args(json!({"account_id": "1"})))
            .unwrap_err();
        assert!(matches!(err, RequestError::MissingParameter { ref name, .. } if name == "data"));

        let err = RequestBuilder::new(&doc, op)
            .build(&args(json!({"account_id": "1", "data": {}})))
            .unwrap_err();
        match err {
            RequestError::MissingCredentials { schemes, .. } => {
                assert_eq!(schemes, vec!["X-AIMS-Auth-Token".to_string()])
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = RequestBuilder::new(&doc, op)
            .content_type("text/plain")
            .credentials(Credentials::with_api_key("tok"))
            .build(&args(json!({"account_id": "1", "data": {}})))
            .unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedContentType { .. }));
    }

    #[test]
    fn test_basic_and_query_api_key_schemes() {
        let doc = load_str(
            r#"
openapi: 3.0.2
info: { title: t, version: "1" }
servers:
  - url: https://example.com/base/
paths:
  /files/{name}:
    get:
      operationId: get_file
      parameters:
        - { name: name, in: path, required: true, schema: { type: string } }
      responses: {}
      security:
        - Key: []
        - Basic: []
components:
  securitySchemes:
    Key: { type: apiKey, in: query, name: api_key }
    Basic: { type: http, scheme: basic }
"#,
        )
        .unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::Reject).unwrap();
        let op = index.get("get_file").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .credentials(Credentials {
                basic: Some(("user".to_string(), "pass".to_string())),
                ..Default::default()
            })
            .build(&args(json!({"name": "a b/c"})))
            .unwrap();
        assert_eq!(request.url.as_str(), "https://example.com/base/files/a%20b%2Fc");
        assert_eq!(request.headers["Authorization"], "Basic dXNlcjpwYXNz");

        let request = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("k"))
            .build(&args(json!({"name": "x"})))
            .unwrap();
        assert_eq!(request.query(), vec![("api_key".to_string(), "k".to_string())]);
        assert!(!request.headers.contains_key("Authorization"));
    }

    #[test]
    fn test_dot_segment_path_values_are_rejected() {
        let doc = testapi_document().unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::LastWins).unwrap();
        let op = index.get("test_get_data").unwrap();
        let builder = RequestBuilder::new(&doc, op).credentials(Credentials::with_api_key("tok"));

        for value in ["..", "."] {
            let err = builder
                .build(&args(json!({"account_id": value, "query_param1": "a"})))
                .unwrap_err();
            assert!(matches!(err, RequestError::InvalidValue { ref name, .. } if name == "account_id"));
        }

        let request = builder
            .build(&args(json!({"account_id": "...", "query_param1": "a"})))
            .unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.alertlogic.com/testapi/v1/.../test_get_data?query_param1=a"
        );
    }

    #[test]
    fn test_path_values_are_expanded_once() {
        let doc = load_str(
            r#"
openapi: 3.0.2
info: { title: t, version: "1" }
servers:
  - url: https://e.com
paths:
  /f/{a}-{b}:
    get:
      operationId: get_f
      parameters:
        - { name: a, in: path, required: true, schema: { type: string } }
        - { name: b, in: path, required: true, schema: { type: string } }
      responses: {}
"#,
        )
        .unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::Reject).unwrap();
        let op = index.get("get_f").unwrap();

        // Each build hashes the values into a fresh map
        for _ in 0..32 {
            let request = RequestBuilder::new(&doc, op)
                .build(&args(json!({"a": "{b}", "b": "x"})))
                .unwrap();
            assert_eq!(request.url.as_str(), "https://e.com/f/%7Bb%7D-x");
        }
    }

    const ITEMS_API: &str = r#"
openapi: 3.0.2
info: { title: t, version: "1" }
servers:
  - url: https://e.com
paths:
  /items:
    get:
      operationId: list_items
      parameters:
        - name: tags
          in: query
          explode: false
          schema: { type: array, items: { type: string } }
        - { name: code, in: query, schema: { type: string, pattern: '^[a-z]+$' } }
      responses: {}
      security:
        - Session: []
    post:
      operationId: create_item
      responses: {}
      security:
        - Bearer: []
components:
  securitySchemes:
    Session: { type: apiKey, in: cookie, name: sid }
    Bearer: { type: http, scheme: bearer }
"#;

    #[test]
    fn test_unexploded_query_array_and_cookie_api_key() {
        let doc = load_str(ITEMS_API).unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::Reject).unwrap();
        let op = index.get("list_items").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("s3cr3t"))
            .build(&args(json!({"tags": ["a", "b"]})))
            .unwrap();

        assert_eq!(request.query(), vec![("tags".to_string(), "a,b".to_string())]);
        assert_eq!(request.cookies["sid"], "s3cr3t");
        assert!(!request.headers.contains_key("sid"));
    }

    #[test]
    fn test_bearer_scheme() {
        let doc = load_str(ITEMS_API).unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::Reject).unwrap();
        let op = index.get("create_item").unwrap();

        let request = RequestBuilder::new(&doc, op)
            .credentials(Credentials {
                bearer: Some("t".to_string()),
                ..Default::default()
            })
            .build(&Map::new())
            .unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer t");

        // An API key does not satisfy a bearer requirement
        let err = RequestBuilder::new(&doc, op)
            .credentials(Credentials::with_api_key("k"))
            .build(&Map::new())
            .unwrap_err();
        assert!(matches!(err, RequestError::MissingCredentials { .. }));
    }

    #[test]
    fn test_patterns_compile_once_per_builder() {
        let doc = load_str(ITEMS_API).unwrap();
        let index = OperationIndex::build(&doc, DuplicatePolicy::Reject).unwrap();
        let op = index.get("list_items").unwrap();
        let builder = RequestBuilder::new(&doc, op).credentials(Credentials::with_api_key("s"));

        builder.build(&args(json!({"code": "abc"}))).unwrap();
        builder.build(&args(json!({"code": "xyz"}))).unwrap();
        let err = builder.build(&args(json!({"code": "ABC"}))).unwrap_err();
        assert!(matches!(err, RequestError::InvalidValue { ref name, .. } if name == "code"));

        assert_eq!(builder.patterns.borrow().len(), 1);
    }

    #[test]
    fn test_unwrap_one_level() {
        assert_eq!(
            Value::Object(unwrap_one_level(json!({"tagset": {"key1": "v1"}, "flag": true}))),
            json!({"key1": "v1", "flag": true})
        );
        assert!(unwrap_one_level(json!("scalar")).is_empty());
    }

    #[test]
    fn test_select_server() {
        let servers: Vec<Server> = serde_yaml::from_str(
            r#"
- url: https://plain.example.com
  description: production
- url: https://session.example.com
  description: integration
  x-alertlogic-session-endpoint: true
"#,
        )
        .unwrap();

        assert_eq!(select_server(&servers, None).unwrap().url, "https://session.example.com");
        assert_eq!(
            select_server(&servers, Some("production")).unwrap().url,
            "https://session.example.com"
        );
        assert!(select_server(&[], Some("production")).is_none());
    }
}
