pub mod config;
pub mod lint;
pub mod loader;
pub mod models;
pub mod operation;
pub mod request;
pub mod resolver;
pub mod session;

pub use loader::{load_file, load_str, testapi_document, ApiDirectory};
pub use operation::{DuplicatePolicy, OperationIndex};
pub use request::{Credentials, PreparedRequest, RequestBuilder};
pub use session::Session;

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    use crate::config::Config;
    use crate::lint::{lint, security_usage, LintConfig};
    use crate::loader::{ApiDirectory, TESTAPI_YAML};
    use crate::models::{ParameterLocation, SecuritySchemeType};
    use crate::operation::{DuplicatePolicy, OperationIndex};
    use crate::request::Body;
    use crate::resolver::Resolver;
    use crate::session::Session;

    #[test]
    fn test_testapi_service_from_directory() {
        // Lay the bundled definition out the way a service directory is
        let dir = tempdir().unwrap();
        let service_dir = dir.path().join("testapi");
        fs::create_dir_all(&service_dir).unwrap();
        fs::write(service_dir.join("testapi.v1.yaml"), TESTAPI_YAML).unwrap();

        let api = ApiDirectory::new(dir.path());
        assert_eq!(api.list_services().unwrap(), vec!["testapi"]);

        let doc = api.load("testapi", None).unwrap();
        assert_eq!(doc.openapi, "3.0.2");

        let model = api.describe("testapi", Some(1)).unwrap();
        assert_eq!(model.info.title, "Test API");
        assert_eq!(model.operations.len(), 2);
    }

    #[test]
    fn test_testapi_document_properties() {
        let doc = crate::testapi_document().unwrap();
        let resolver = Resolver::new(&doc);

        // required lists are subsets of the declared properties
        for name in ["SimpleDataTypesModel", "NestedDataTypeModel"] {
            let schema = resolver
                .schema(&format!("#/components/schemas/{}", name))
                .unwrap();
            let required = schema.required.as_ref().unwrap();
            assert!(required.iter().all(|r| schema.properties.contains_key(r)), "{}", name);
        }
        let nested = resolver.schema("#/components/schemas/NestedDataTypeModel").unwrap();
        assert_eq!(
            nested.required.as_ref().unwrap(),
            &vec!["id".to_string(), "embedded_object".to_string()]
        );

        // one scheme in use, the Basic one declared only
        let usage = security_usage(&doc);
        assert_eq!(usage.len(), 2);
        assert_eq!(usage["X-AIMS-Auth-Token"].len(), 2);
        assert!(usage["Basic HTTP Authorization"].is_empty());
        let schemes = doc.security_schemes().unwrap();
        assert_eq!(schemes["X-AIMS-Auth-Token"].type_, SecuritySchemeType::ApiKey);
        assert_eq!(schemes["X-AIMS-Auth-Token"].in_type, Some(ParameterLocation::Header));
        assert_eq!(schemes["Basic HTTP Authorization"].scheme.as_deref(), Some("basic"));

        // the duplicate query parameter survives loading
        let get = doc.paths["/testapi/v1/{account_id}/test_get_data"].get.as_ref().unwrap();
        let dups = get
            .parameters
            .iter()
            .filter(|p| p.key() == ("query_param1", ParameterLocation::Query))
            .count();
        assert_eq!(dups, 2);
        assert!(get.responses.is_empty());

        let report = lint(&doc, &LintConfig::default());
        assert_eq!(report.by_code("duplicate-parameter").len(), 1);
        assert!(OperationIndex::build(&doc, DuplicatePolicy::Reject).is_err());
    }

    #[test]
    fn test_session_posts_flattened_payload() {
        let doc = crate::testapi_document().unwrap();
        let session = Session::with_token(
            Config {
                account_id: Some("10000001".to_string()),
                ..Default::default()
            },
            "token",
        );

        let args = json!({"data": {"tagset": {"key1": "v1", "key2": "v2"}}});
        let request = session
            .prepare(&doc, "post_payload_in_body", args.as_object().unwrap())
            .unwrap();

        assert_eq!(request.body, Some(Body::Json(json!({"key1": "v1", "key2": "v2"}))));
        assert_eq!(
            serde_json::to_value(&request).unwrap()["url"],
            json!("https://api.cloudinsight.alertlogic.com/testapi/v1/10000001/test_get_data")
        );
    }
}
