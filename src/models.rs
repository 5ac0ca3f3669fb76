#![allow(non_snake_case)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Vendor extensions and any other keys the typed model does not know about
pub type Extensions = HashMap<String, serde_json::Value>;

/// Security requirement: scheme name to required scopes
pub type SecurityRequirement = HashMap<String, Vec<String>>;

/// Represents a complete OpenAPI 3.0 document
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAPI {
    pub openapi: String,
    pub info: Info,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: HashMap<String, PathItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<SecurityRequirement>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub externalDocs: Option<ExternalDocs>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl OpenAPI {
    /// Schemas declared under `components.schemas`
    pub fn schemas(&self) -> Option<&HashMap<String, Schema>> {
        self.components.as_ref().map(|c| &c.schemas)
    }

    /// Security schemes declared under `components.securitySchemes`
    pub fn security_schemes(&self) -> Option<&HashMap<String, SecurityScheme>> {
        self.components.as_ref().map(|c| &c.securitySchemes)
    }

    /// Every operation in the document as `(path, method, operation)`, ordered by path then method
    pub fn operations(&self) -> Vec<(&str, Method, &Operation)> {
        let mut paths: Vec<&String> = self.paths.keys().collect();
        paths.sort();

        paths
            .into_iter()
            .flat_map(|path| {
                self.paths[path]
                    .operations()
                    .into_iter()
                    .map(move |(method, op)| (path.as_str(), method, op))
            })
            .collect()
    }
}

/// Information about the API
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termsOfService: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
}

/// Contact information for the API
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// License information for the API
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct License {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// External documentation for the API
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExternalDocs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
}

/// Tag information for API operations
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Tag {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Server object used for API endpoints
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Server {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub variables: HashMap<String, ServerVariable>,
    /// Requests against this server authenticate with a session token
    #[serde(
        rename = "x-alertlogic-session-endpoint",
        skip_serializing_if = "std::ops::Not::not",
        default
    )]
    pub sessionEndpoint: bool,
}

/// Server variable for templated server URLs
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerVariable {
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Components object for reusable components
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Components {
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub schemas: HashMap<String, Schema>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub responses: HashMap<String, Response>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub requestBodies: HashMap<String, RequestBody>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub securitySchemes: HashMap<String, SecurityScheme>,
}

/// HTTP methods an operation can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single path item with all its operations
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PathItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Operation>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub servers: Vec<Server>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<Parameter>,
}

impl PathItem {
    /// Declared operations in method order
    pub fn operations(&self) -> Vec<(Method, &Operation)> {
        [
            (Method::Get, &self.get),
            (Method::Put, &self.put),
            (Method::Post, &self.post),
            (Method::Delete, &self.delete),
            (Method::Options, &self.options),
            (Method::Head, &self.head),
            (Method::Patch, &self.patch),
            (Method::Trace, &self.trace),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
        .collect()
    }
}

/// An operation (endpoint) of the API
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Operation {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operationId: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestBody: Option<RequestBody>,
    #[serde(default)]
    pub responses: HashMap<String, Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    /// `None` inherits the document-level requirements, an empty list disables security
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<SecurityRequirement>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub servers: Vec<Server>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

/// Where a parameter is carried in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        };
        f.write_str(s)
    }
}

/// Parameter for an operation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub in_type: ParameterLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
}

impl Parameter {
    /// `(name, in)` identifies a parameter within one operation
    pub fn key(&self) -> (&str, ParameterLocation) {
        (self.name.as_str(), self.in_type)
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }
}

/// Request body object
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub content: HashMap<String, MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Media type object
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MediaType {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
    /// How the payload is placed into the outgoing body
    #[serde(rename = "x-alertlogic-schema", skip_serializing_if = "Option::is_none")]
    pub bodyPlacement: Option<BodyPlacement>,
}

/// `x-alertlogic-schema`: the named property is unwrapped into the body rather than posted as-is
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BodyPlacement {
    pub name: String,
    #[serde(rename = "in", default = "default_placement")]
    pub in_type: String,
}

fn default_placement() -> String {
    "body".to_string()
}

/// API response
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Response {
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub content: HashMap<String, MediaType>,
}

/// Schema object, the OpenAPI 3.0 subset of JSON Schema
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Schema {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,

    // Number validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    // String validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxLength: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minLength: Option<u64>,

    // Object validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub properties: HashMap<String, Box<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additionalProperties: Option<serde_json::Value>, // Can be a boolean or Schema

    // Array validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    // Composition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allOf: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anyOf: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oneOf: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Schema>>,
}

impl Schema {
    /// Direct sub-schemas, each with the key it hangs under
    pub fn children(&self) -> Vec<(String, &Schema)> {
        let mut children: Vec<(String, &Schema)> = Vec::new();

        let mut names: Vec<&String> = self.properties.keys().collect();
        names.sort();
        for name in names {
            children.push((format!("properties/{}", name), &self.properties[name]));
        }
        if let Some(items) = &self.items {
            children.push(("items".to_string(), items));
        }
        for (key, list) in [("allOf", &self.allOf), ("anyOf", &self.anyOf), ("oneOf", &self.oneOf)] {
            if let Some(list) = list {
                for (i, schema) in list.iter().enumerate() {
                    children.push((format!("{}/{}", key, i), schema));
                }
            }
        }
        if let Some(not) = &self.not {
            children.push(("not".to_string(), not));
        }

        children
    }
}

/// Security scheme object
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub type_: SecuritySchemeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "in")]
    pub in_type: Option<ParameterLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearerFormat: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySchemeType {
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "openIdConnect")]
    OpenIdConnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_preserves_location() {
        let param: Parameter = serde_yaml::from_str(
            r#"
name: header_param2
in: header
schema:
  type: integer
"#,
        )
        .unwrap();

        assert_eq!(param.key(), ("header_param2", ParameterLocation::Header));
        assert!(!param.is_required());
        assert_eq!(param.schema.unwrap().type_.as_deref(), Some("integer"));
    }

    #[test]
    fn test_path_item_operations_in_method_order() {
        let item: PathItem = serde_yaml::from_str(
            r#"
post:
  operationId: b
get:
  operationId: a
"#,
        )
        .unwrap();

        let ops: Vec<(Method, Option<&str>)> = item
            .operations()
            .into_iter()
            .map(|(m, op)| (m, op.operationId.as_deref()))
            .collect();
        assert_eq!(ops, vec![(Method::Get, Some("a")), (Method::Post, Some("b"))]);
    }

    #[test]
    fn test_server_session_endpoint_extension() {
        let server: Server = serde_yaml::from_str(
            r#"
url: https://example.com
x-alertlogic-session-endpoint: true
"#,
        )
        .unwrap();
        assert!(server.sessionEndpoint);

        let plain: Server = serde_yaml::from_str("url: https://example.com").unwrap();
        assert!(!plain.sessionEndpoint);
    }

    #[test]
    fn test_schema_children_order() {
        let schema: Schema = serde_yaml::from_str(
            r#"
type: object
properties:
  b: { type: string }
  a: { type: array, items: { type: integer } }
"#,
        )
        .unwrap();

        let keys: Vec<String> = schema.children().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["properties/a", "properties/b"]);
    }
}
