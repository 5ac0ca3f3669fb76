use log::debug;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, rest, verify},
    sequence::{preceded, separated_pair},
    IResult,
};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::models::{MediaType, OpenAPI, Schema};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("External references are not supported: {0}")]
    External(String),

    #[error("Malformed reference: {0}")]
    Malformed(String),

    #[error("Reference {reference} points at {found}, expected {expected}")]
    WrongKind {
        reference: String,
        expected: ComponentKind,
        found: ComponentKind,
    },

    #[error("Reference target not found: {0}")]
    NotFound(String),

    #[error("Reference cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Sections of `components` a reference can point into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Schemas,
    Responses,
    Parameters,
    RequestBodies,
    SecuritySchemes,
}

impl ComponentKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "schemas" => Some(Self::Schemas),
            "responses" => Some(Self::Responses),
            "parameters" => Some(Self::Parameters),
            "requestBodies" => Some(Self::RequestBodies),
            "securitySchemes" => Some(Self::SecuritySchemes),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schemas => "schemas",
            Self::Responses => "responses",
            Self::Parameters => "parameters",
            Self::RequestBodies => "requestBodies",
            Self::SecuritySchemes => "securitySchemes",
        };
        f.write_str(s)
    }
}

/// A parsed local reference of the form `#/components/<kind>/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: ComponentKind,
    pub name: String,
}

fn component_pointer(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(preceded(
        tag("#/components/"),
        separated_pair(
            take_while1(|c: char| c != '/'),
            char('/'),
            verify(rest, |name: &str| !name.is_empty() && !name.contains('/')),
        ),
    ))(input)
}

/// Undo JSON pointer escaping (`~1` is `/`, `~0` is `~`)
pub fn unescape_pointer_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Apply JSON pointer escaping to a single segment
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

impl Reference {
    pub fn parse(reference: &str) -> Result<Self, ResolveError> {
        if !reference.starts_with('#') {
            return Err(ResolveError::External(reference.to_string()));
        }

        let (_, (kind, name)) = component_pointer(reference)
            .map_err(|_| ResolveError::Malformed(reference.to_string()))?;
        let kind = ComponentKind::from_segment(kind)
            .ok_or_else(|| ResolveError::Malformed(reference.to_string()))?;

        Ok(Self {
            kind,
            name: unescape_pointer_segment(name),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#/components/{}/{}", self.kind, escape_pointer_segment(&self.name))
    }
}

/// A `$ref` whose target cannot be resolved
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingRef {
    pub location: String,
    pub reference: String,
    pub error: ResolveError,
}

/// Resolves local `$ref` pointers against a document's components
pub struct Resolver<'a> {
    doc: &'a OpenAPI,
}

impl<'a> Resolver<'a> {
    pub fn new(doc: &'a OpenAPI) -> Self {
        Self { doc }
    }

    pub fn document(&self) -> &'a OpenAPI {
        self.doc
    }

    /// Resolve a schema reference, following chained references to the first concrete schema
    pub fn schema(&self, reference: &str) -> Result<&'a Schema, ResolveError> {
        let mut seen: Vec<String> = Vec::new();
        let mut current = reference.to_string();

        loop {
            if seen.contains(&current) {
                seen.push(current);
                return Err(ResolveError::Cycle(seen));
            }

            let parsed = Reference::parse(&current)?;
            if parsed.kind != ComponentKind::Schemas {
                return Err(ResolveError::WrongKind {
                    reference: current,
                    expected: ComponentKind::Schemas,
                    found: parsed.kind,
                });
            }

            let target = self
                .doc
                .schemas()
                .and_then(|schemas| schemas.get(&parsed.name))
                .ok_or_else(|| ResolveError::NotFound(current.clone()))?;

            seen.push(current);
            match &target.ref_ {
                Some(next) => {
                    debug!("Following chained reference {} -> {}", seen.join(" -> "), next);
                    current = next.clone();
                }
                None => return Ok(target),
            }
        }
    }

    /// The schema itself, or its target when it is a `$ref`
    pub fn resolve_schema(&self, schema: &'a Schema) -> Result<&'a Schema, ResolveError> {
        match &schema.ref_ {
            Some(reference) => self.schema(reference),
            None => Ok(schema),
        }
    }

    /// Every `$ref` in the document that does not resolve
    pub fn dangling_refs(&self) -> Vec<DanglingRef> {
        let mut dangling = Vec::new();

        for (location, schema) in walk_schemas(self.doc) {
            if let Some(reference) = &schema.ref_ {
                if let Err(error) = self.schema(reference) {
                    dangling.push(DanglingRef {
                        location,
                        reference: reference.clone(),
                        error,
                    });
                }
            }
        }

        dangling
    }
}

/// Every schema node in the document with its JSON pointer location.
/// References are not followed.
pub fn walk_schemas(doc: &OpenAPI) -> Vec<(String, &Schema)> {
    let mut out = Vec::new();

    if let Some(components) = &doc.components {
        let mut names: Vec<&String> = components.schemas.keys().collect();
        names.sort();
        for name in names {
            let location = format!("#/components/schemas/{}", escape_pointer_segment(name));
            collect_schema(location, &components.schemas[name], &mut out);
        }

        let mut names: Vec<&String> = components.requestBodies.keys().collect();
        names.sort();
        for name in names {
            let base = format!("#/components/requestBodies/{}", escape_pointer_segment(name));
            collect_content(&base, &components.requestBodies[name].content, &mut out);
        }

        let mut names: Vec<&String> = components.responses.keys().collect();
        names.sort();
        for name in names {
            let base = format!("#/components/responses/{}", escape_pointer_segment(name));
            collect_content(&base, &components.responses[name].content, &mut out);
        }
    }

    let mut paths: Vec<&String> = doc.paths.keys().collect();
    paths.sort();
    for path in paths {
        let item = &doc.paths[path];
        let base = format!("#/paths/{}", escape_pointer_segment(path));

        for (i, param) in item.parameters.iter().enumerate() {
            if let Some(schema) = &param.schema {
                collect_schema(format!("{}/parameters/{}/schema", base, i), schema, &mut out);
            }
        }

        for (method, op) in item.operations() {
            let op_base = format!("{}/{}", base, method.as_str().to_lowercase());
            for (i, param) in op.parameters.iter().enumerate() {
                if let Some(schema) = &param.schema {
                    collect_schema(format!("{}/parameters/{}/schema", op_base, i), schema, &mut out);
                }
            }
            if let Some(body) = &op.requestBody {
                collect_content(&format!("{}/requestBody", op_base), &body.content, &mut out);
            }
            let mut codes: Vec<&String> = op.responses.keys().collect();
            codes.sort();
            for code in codes {
                let response_base = format!("{}/responses/{}", op_base, code);
                collect_content(&response_base, &op.responses[code].content, &mut out);
            }
        }
    }

    out
}

fn collect_content<'a>(
    base: &str,
    content: &'a HashMap<String, MediaType>,
    out: &mut Vec<(String, &'a Schema)>,
) {
    let mut types: Vec<&String> = content.keys().collect();
    types.sort();
    for content_type in types {
        if let Some(schema) = &content[content_type].schema {
            let location = format!("{}/content/{}/schema", base, escape_pointer_segment(content_type));
            collect_schema(location, schema, out);
        }
    }
}

fn collect_schema<'a>(location: String, schema: &'a Schema, out: &mut Vec<(String, &'a Schema)>) {
    for (key, child) in schema.children() {
        collect_schema(format!("{}/{}", location, key), child, out);
    }
    out.push((location, schema));
}
