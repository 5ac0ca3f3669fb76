use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::config::{Config, ConfigError, GlobalEndpoint, Residency};
use crate::models::{Method, OpenAPI};
use crate::operation::{OperationError, OperationIndex};
use crate::request::{Credentials, PreparedRequest, RequestBuilder, RequestError};

pub const AIMS_AUTHENTICATE_PATH: &str = "/aims/v1/authenticate";
pub const AIMS_TOKEN_HEADER: &str = "X-AIMS-Auth-Token";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("authentication error: {0}")]
    Authentication(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Request(RequestError),
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::MissingCredentials { operation, schemes } => Self::Authentication(format!(
                "{} requires one of {} but the session holds no token",
                operation,
                schemes.join(", ")
            )),
            other => Self::Request(other),
        }
    }
}

/// Credentials and defaults shared by every request made for one account.
/// No network I/O happens here; callers send the prepared requests themselves.
#[derive(Debug, Clone)]
pub struct Session {
    config: Config,
    token: Option<String>,
    account_id: Option<String>,
    account_name: Option<String>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let account_id = config.account_id.clone();
        Self {
            config,
            token: None,
            account_id,
            account_name: None,
        }
    }

    /// A session that already holds an AIMS token; access keys are not needed
    pub fn with_token(config: Config, token: impl Into<String>) -> Self {
        let mut session = Self::new(config);
        session.token = Some(token.into());
        session
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    pub fn global_endpoint(&self) -> GlobalEndpoint {
        self.config.global_endpoint
    }

    pub fn residency(&self) -> Residency {
        self.config.residency
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session level default for a parameter the caller leaves out
    pub fn get_default(&self, name: &str) -> Option<Value> {
        match name {
            "account_id" => self.account_id.clone().map(Value::String),
            _ => None,
        }
    }

    /// Token for apiKey schemes, access keys for HTTP Basic
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.token.clone(),
            basic: self
                .config
                .get_auth()
                .ok()
                .map(|(id, secret)| (id.to_string(), secret.to_string())),
            bearer: None,
        }
    }

    /// The AIMS authenticate call that exchanges access keys for a token
    pub fn authentication_request(&self) -> Result<PreparedRequest, SessionError> {
        let (access_key_id, _) = self.config.get_auth()?;
        info!(
            "Authenticating '{}' user against '{}' endpoint.",
            access_key_id,
            self.config.global_endpoint.url()
        );

        let raw = format!("{}{}", self.config.global_endpoint.url(), AIMS_AUTHENTICATE_PATH);
        let url = Url::parse(&raw).map_err(|source| RequestError::InvalidServerUrl { url: raw, source })?;

        let basic = self.credentials().basic.map(|(user, password)| {
            use base64::Engine;
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
            )
        });

        let mut headers = BTreeMap::new();
        if let Some(value) = basic {
            headers.insert("Authorization".to_string(), value);
        }

        Ok(PreparedRequest {
            method: Method::Post,
            url,
            headers,
            cookies: BTreeMap::new(),
            content_type: None,
            body: None,
        })
    }

    /// Take the token, account id and account name out of an AIMS authenticate response.
    /// An account id configured up front is kept.
    pub fn accept_authentication(&mut self, response: &Value) -> Result<(), SessionError> {
        let auth = response
            .get("authentication")
            .ok_or_else(|| SessionError::Authentication("token not found in response".to_string()))?;

        let token = auth
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Authentication("token not found in response".to_string()))?;

        let account = auth.get("account");
        if self.account_id.is_none() {
            let id = account
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| SessionError::Authentication("account id not found in response".to_string()))?;
            self.account_id = Some(id.to_string());
        }

        let name = account
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Authentication("account name not found in response".to_string()))?;

        self.token = Some(token.to_string());
        self.account_name = Some(name.to_string());
        debug!("Session authenticated for account {:?}", self.account_id);
        Ok(())
    }

    /// The endpoints service lookup that maps `service` to its URL for the session's residency
    pub fn endpoint_request(&self, service: &str) -> Result<PreparedRequest, SessionError> {
        let account_id = self.account_id.as_deref().ok_or_else(|| RequestError::MissingParameter {
            operation: format!("{} endpoint lookup", service),
            name: "account_id".to_string(),
        })?;

        let raw = self.config.global_endpoint.url();
        let mut url = Url::parse(raw).map_err(|source| RequestError::InvalidServerUrl {
            url: raw.to_string(),
            source,
        })?;
        url.path_segments_mut()
            .map_err(|_| RequestError::CannotBeABase(raw.to_string()))?
            .pop_if_empty()
            .extend([
                "endpoints",
                "v1",
                account_id,
                "residency",
                self.residency().as_str(),
                "services",
                service,
                "endpoint",
            ]);

        let mut headers = BTreeMap::new();
        if let Some(token) = &self.token {
            headers.insert(AIMS_TOKEN_HEADER.to_string(), token.clone());
        }

        debug!("Looking up {} endpoint for {} residency", service, self.residency());
        Ok(PreparedRequest {
            method: Method::Get,
            url,
            headers,
            cookies: BTreeMap::new(),
            content_type: None,
            body: None,
        })
    }

    /// Service URL out of an endpoints service response: `{"<service>": "<host>"}`
    pub fn accept_endpoint(&self, service: &str, response: &Value) -> Result<Url, SessionError> {
        let host = response.get(service).and_then(Value::as_str).ok_or_else(|| {
            SessionError::Authentication(format!("invalid response from endpoints service: no {} endpoint", service))
        })?;

        Url::parse(&format!("https://{}", host))
            .map_err(|e| SessionError::Authentication(format!("invalid {} endpoint {:?}: {}", service, host, e)))
    }

    /// Prepare a call to `operation_id`, filling in the account id and the auth token
    pub fn prepare(
        &self,
        doc: &OpenAPI,
        operation_id: &str,
        args: &Map<String, Value>,
    ) -> Result<PreparedRequest, SessionError> {
        let index = OperationIndex::build(doc, self.config.duplicate_policy)?;
        let op = index.get(operation_id)?;

        let mut builder = RequestBuilder::new(doc, op)
            .endpoint(self.config.global_endpoint.as_str())
            .credentials(self.credentials());
        if let Some(account_id) = self.get_default("account_id") {
            builder = builder.default_value("account_id", account_id);
        }

        let request = builder.build(args)?;
        debug!("Calling '{}' method. URL: '{}'", request.method, request.url);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testapi_document;
    use crate::request::Body;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> Config {
        Config {
            access_key_id: Some("user".to_string()),
            secret_key: Some("pass".to_string()),
            ..Default::default()
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_prepare_with_token_and_default_account() {
        let mut cfg = config();
        cfg.account_id = Some("2".to_string());
        let session = Session::with_token(cfg, "aims-token");
        let doc = testapi_document().unwrap();

        let request = session
            .prepare(&doc, "post_payload_in_body", &args(json!({"data": {"tagset": {"key1": "v1", "key2": "v2"}}})))
            .unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.alertlogic.com/testapi/v1/2/test_get_data"
        );
        assert_eq!(request.headers["X-AIMS-Auth-Token"], "aims-token");
        assert_eq!(request.body, Some(Body::Json(json!({"key1": "v1", "key2": "v2"}))));
    }

    #[test]
    fn test_prepare_without_token_is_authentication_error() {
        let session = Session::new(config());
        let doc = testapi_document().unwrap();

        let err = session
            .prepare(&doc, "test_get_data", &args(json!({"account_id": "2"})))
            .unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));

        let err = session.prepare(&doc, "nope", &args(json!({}))).unwrap_err();
        assert!(matches!(err, SessionError::Operation(OperationError::NotFound(_))));
    }

    #[test]
    fn test_authentication_round() {
        let mut session = Session::new(config());

        let request = session.authentication_request().unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.alertlogic.com/aims/v1/authenticate"
        );
        assert_eq!(request.headers["Authorization"], "Basic dXNlcjpwYXNz");

        session
            .accept_authentication(&json!({
                "authentication": {
                    "token": "t0k",
                    "account": {"id": "67000001", "name": "Test Account"}
                }
            }))
            .unwrap();
        assert_eq!(session.token(), Some("t0k"));
        assert_eq!(session.account_id(), Some("67000001"));
        assert_eq!(session.account_name(), Some("Test Account"));
        assert_eq!(session.get_default("account_id"), Some(json!("67000001")));
        assert_eq!(session.get_default("other"), None);
    }

    #[test]
    fn test_endpoint_lookup_uses_residency() {
        let mut cfg = config();
        cfg.account_id = Some("2".to_string());
        cfg.residency = Residency::Emea;
        let session = Session::with_token(cfg, "aims-token");

        let request = session.endpoint_request("testapi").unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.url.as_str(),
            "https://api.cloudinsight.alertlogic.com/endpoints/v1/2/residency/emea/services/testapi/endpoint"
        );
        assert_eq!(request.headers[AIMS_TOKEN_HEADER], "aims-token");

        let url = session
            .accept_endpoint("testapi", &json!({"testapi": "api.testapi.alertlogic.com"}))
            .unwrap();
        assert_eq!(url.as_str(), "https://api.testapi.alertlogic.com/");

        assert!(matches!(
            session.accept_endpoint("testapi", &json!({"other": "host"})),
            Err(SessionError::Authentication(_))
        ));
    }

    #[test]
    fn test_endpoint_lookup_needs_account_id() {
        let err = Session::new(config()).endpoint_request("testapi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Request(RequestError::MissingParameter { ref name, .. }) if name == "account_id"
        ));
    }

    #[test]
    fn test_authentication_response_errors() {
        let mut session = Session::new(config());
        assert!(matches!(
            session.accept_authentication(&json!({"authentication": {}})),
            Err(SessionError::Authentication(_))
        ));
        assert!(matches!(
            session.accept_authentication(&json!({"authentication": {"token": "t", "account": {}}})),
            Err(SessionError::Authentication(_))
        ));
        assert!(session.token().is_none());

        let err = Session::new(Config::default()).authentication_request().unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::MissingCredentials)));
    }
}
