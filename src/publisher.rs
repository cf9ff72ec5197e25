//! SOAP RPC publisher.
//!
//! Takes one HTTP request body, parses it into call arguments, invokes the
//! registered operation and marshals the result through [`SoapResponse`].

use crate::config::{OperationMode, SoapRpcConfig, SoapVersion};
use crate::error::{CallError, Fault};
use crate::parser::parse_soap_action;
use crate::registry::TypeRegistry;
use crate::request::{CallArguments, SoapRequest};
use crate::response::{HttpResponse, ResponseState, ReturnValue, SoapResponse};
use async_trait::async_trait;
use glob::Pattern;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An operation callable over SOAP.
#[async_trait]
pub trait SoapOperation: Send + Sync {
    async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError>;
}

/// The parts of an HTTP request the publisher looks at.
#[derive(Debug, Clone, Default)]
pub struct SoapHttpRequest {
    pub content_type: Option<String>,
    /// Raw `SOAPAction` header value
    pub soap_action: Option<String>,
    pub body: Vec<u8>,
    /// Request identifier carried into log records
    pub correlation_id: String,
}

impl SoapHttpRequest {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_soap_action(mut self, action: impl Into<String>) -> Self {
        self.soap_action = Some(action.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// SOAP action from the `SOAPAction` header, or from the `action`
    /// parameter of a SOAP 1.2 content type.
    pub fn action(&self) -> Option<String> {
        if let Some(ref header) = self.soap_action {
            return Some(parse_soap_action(header));
        }
        self.content_type.as_deref().and_then(|ct| {
            ct.split(';')
                .skip(1)
                .filter_map(|param| param.trim().split_once('='))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("action"))
                .map(|(_, value)| parse_soap_action(value))
        })
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherMetrics {
    pub requests_processed: u64,
    pub faults_returned: u64,
    pub auth_challenges: u64,
}

/// Dispatches SOAP requests to registered operations.
pub struct SoapPublisher {
    config: SoapRpcConfig,
    registry: Arc<TypeRegistry>,
    operations: HashMap<String, Arc<dyn SoapOperation>>,
    /// Compiled operation patterns (for allowlist/denylist)
    operation_patterns: Vec<Pattern>,
    /// Metrics tracking
    requests_processed: AtomicU64,
    faults_returned: AtomicU64,
    auth_challenges: AtomicU64,
}

impl SoapPublisher {
    /// Create a publisher with the given configuration and type registry.
    pub fn new(config: SoapRpcConfig, registry: Arc<TypeRegistry>) -> Self {
        let operation_patterns = config
            .operations
            .actions
            .iter()
            .filter_map(|pattern| match Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid operation pattern");
                    None
                }
            })
            .collect();

        Self {
            config,
            registry,
            operations: HashMap::new(),
            operation_patterns,
            requests_processed: AtomicU64::new(0),
            faults_returned: AtomicU64::new(0),
            auth_challenges: AtomicU64::new(0),
        }
    }

    /// Build a publisher whose registry comes from `config.operations.types`.
    pub fn from_config(config: SoapRpcConfig) -> Self {
        let registry = Arc::new(TypeRegistry::from_config(&config.operations));
        Self::new(config, registry)
    }

    /// Register an operation under its operation name (`Foo/Bar` for `<Foo.Bar>`).
    pub fn register(mut self, name: impl Into<String>, operation: impl SoapOperation + 'static) -> Self {
        self.operations.insert(name.into(), Arc::new(operation));
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> PublisherMetrics {
        PublisherMetrics {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            faults_returned: self.faults_returned.load(Ordering::Relaxed),
            auth_challenges: self.auth_challenges.load(Ordering::Relaxed),
        }
    }

    /// Check if Content-Type is valid for SOAP.
    pub fn is_valid_content_type(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) => {
                let ct_lower = ct.to_lowercase();
                self.config
                    .settings
                    .allowed_content_types
                    .iter()
                    .any(|allowed| ct_lower.contains(&allowed.to_lowercase()))
            }
            None => false,
        }
    }

    /// Process one request, writing the outcome into `response`.
    pub async fn publish<R: HttpResponse>(
        &self,
        request: &SoapHttpRequest,
        response: R,
    ) -> SoapResponse<R> {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);

        let mut response =
            SoapResponse::new(response, "").with_missing_realm(self.config.auth.missing_realm);
        if let Some(version) = version_from_content_type(request.content_type.as_deref()) {
            response.set_version(version);
        }

        debug!(
            correlation_id = %request.correlation_id,
            content_type = ?request.content_type,
            body_size = request.body.len(),
            "Processing SOAP request"
        );

        let result = self.dispatch(request, &mut response).await;
        response.finish(result);

        match response.state() {
            ResponseState::Faulted => {
                self.faults_returned.fetch_add(1, Ordering::Relaxed);
            }
            ResponseState::AuthChallenged => {
                self.auth_challenges.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        if self.config.settings.debug_headers && !response.target().is_empty() {
            let method = crate::request::operation_name(response.target());
            response.set_header("X-SOAP-Operation", &method);
        }

        info!(
            correlation_id = %request.correlation_id,
            operation = %response.target(),
            state = ?response.state(),
            "SOAP request completed"
        );

        response
    }

    async fn dispatch<R: HttpResponse>(
        &self,
        request: &SoapHttpRequest,
        response: &mut SoapResponse<R>,
    ) -> Result<ReturnValue, CallError> {
        if !self.is_valid_content_type(request.content_type.as_deref()) {
            return Err(Fault::client(format!(
                "Unsupported content type: {}",
                request.content_type.as_deref().unwrap_or("<none>")
            ))
            .into());
        }

        if request.body.len() > self.config.settings.max_body_size {
            warn!(
                correlation_id = %request.correlation_id,
                body_size = request.body.len(),
                max_size = self.config.settings.max_body_size,
                "SOAP body too large"
            );
            return Err(Fault::client(format!(
                "Request body size {} exceeds maximum {}",
                request.body.len(),
                self.config.settings.max_body_size
            ))
            .into());
        }

        let parsed = SoapRequest::parse(&request.body, &self.registry).map_err(|e| {
            warn!(
                correlation_id = %request.correlation_id,
                error = %e,
                "SOAP parsing error"
            );
            CallError::from(Fault::client("Malformed SOAP request").with_detail(e.to_string()))
        })?;

        response.set_target(parsed.target.clone());
        response.set_version(parsed.version);

        self.check_action(request, &parsed)?;
        self.check_operation_allowed(&parsed.method)?;

        let operation = self
            .operations
            .get(&parsed.method)
            .or_else(|| self.operations.get(&parsed.target))
            .ok_or_else(|| {
                CallError::from(Fault::client(format!("Method not found: {}", parsed.method)))
            })?;

        debug!(
            correlation_id = %request.correlation_id,
            method = %parsed.method,
            argument_count = parsed.arguments.len(),
            "Invoking SOAP operation"
        );

        operation.invoke(parsed.arguments).await
    }

    /// Enforce SOAPAction presence and its match with the body operation.
    fn check_action(&self, request: &SoapHttpRequest, parsed: &SoapRequest) -> Result<(), CallError> {
        let config = &self.config.operations;
        let action = request.action();

        if config.require_soap_action_header && action.is_none() {
            return Err(Fault::client("SOAPAction header is required but not present").into());
        }

        if config.validate_action_match {
            if let Some(action) = action.filter(|a| !a.is_empty()) {
                // SOAPAction might contain namespace, extract operation name
                let action_op = action.rsplit('/').next().unwrap_or(&action);
                let action_op = action_op.rsplit('#').next().unwrap_or(action_op);

                if action_op != parsed.target {
                    warn!(
                        soap_action = %action,
                        body_operation = %parsed.target,
                        "SOAPAction mismatch with body operation"
                    );
                    return Err(Fault::client(format!(
                        "SOAPAction '{}' does not match body operation '{}'",
                        action, parsed.target
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }

    fn check_operation_allowed(&self, method: &str) -> Result<(), CallError> {
        let matches_pattern = self.operation_patterns.iter().any(|p| p.matches(method));

        let allowed = match self.config.operations.mode {
            // No patterns = allow all
            OperationMode::Allowlist => self.operation_patterns.is_empty() || matches_pattern,
            OperationMode::Denylist => !matches_pattern,
        };

        if allowed {
            Ok(())
        } else {
            Err(Fault::client(format!("Operation '{}' is not allowed", method)).into())
        }
    }
}

/// SOAP version implied by the request content type.
fn version_from_content_type(content_type: Option<&str>) -> Option<SoapVersion> {
    let ct = content_type?.to_ascii_lowercase();
    if ct.contains("application/soap+xml") {
        Some(SoapVersion::Soap12)
    } else if ct.contains("text/xml") {
        Some(SoapVersion::Soap11)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsConfig;
    use crate::error::Unauthorized;
    use crate::response::BasicResponse;
    use crate::value::SoapValue;

    struct Echo;

    #[async_trait]
    impl SoapOperation for Echo {
        async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError> {
            Ok(ReturnValue::new(
                arguments.get(0).cloned().unwrap_or(SoapValue::Null),
            ))
        }
    }

    struct Add;

    #[async_trait]
    impl SoapOperation for Add {
        async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError> {
            let mut sum = 0i64;
            for i in 0..arguments.len() {
                sum += arguments
                    .get(i)
                    .and_then(SoapValue::as_i64)
                    .ok_or_else(|| CallError::tagged("TypeError", "Add expects integers"))?;
            }
            Ok(ReturnValue::new(sum))
        }
    }

    struct Locked;

    #[async_trait]
    impl SoapOperation for Locked {
        async fn invoke(&self, _arguments: CallArguments) -> Result<ReturnValue, CallError> {
            Err(Unauthorized("login required".into()).into())
        }
    }

    fn test_config() -> SoapRpcConfig {
        SoapRpcConfig {
            settings: SettingsConfig {
                max_body_size: 1_048_576,
                debug_headers: true,
                allowed_content_types: vec![
                    "text/xml".to_string(),
                    "application/soap+xml".to_string(),
                ],
            },
            ..Default::default()
        }
    }

    fn publisher(config: SoapRpcConfig) -> SoapPublisher {
        SoapPublisher::from_config(config)
            .register("Echo", Echo)
            .register("Math/Add", Add)
            .register("Locked", Locked)
    }

    fn soap11(body: &str) -> SoapHttpRequest {
        SoapHttpRequest::new(
            "text/xml; charset=utf-8",
            format!(
                r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"
               xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <soap:Body>{}</soap:Body>
</soap:Envelope>"#,
                body
            ),
        )
    }

    // --- Content type validation ---

    #[test]
    fn test_valid_content_type() {
        let publisher = publisher(test_config());
        assert!(publisher.is_valid_content_type(Some("text/xml")));
        assert!(publisher.is_valid_content_type(Some("application/soap+xml; charset=utf-8")));
        assert!(publisher.is_valid_content_type(Some("TEXT/XML")));
        assert!(!publisher.is_valid_content_type(Some("application/json")));
        assert!(!publisher.is_valid_content_type(None));
    }

    #[test]
    fn test_version_from_content_type() {
        assert_eq!(
            version_from_content_type(Some("application/soap+xml; action=x")),
            Some(SoapVersion::Soap12)
        );
        assert_eq!(
            version_from_content_type(Some("text/xml")),
            Some(SoapVersion::Soap11)
        );
        assert_eq!(version_from_content_type(Some("application/json")), None);
        assert_eq!(version_from_content_type(None), None);
    }

    #[test]
    fn test_action_from_header_and_content_type() {
        let request = SoapHttpRequest::new("text/xml", "").with_soap_action("\"urn:svc#Echo\"");
        assert_eq!(request.action().as_deref(), Some("urn:svc#Echo"));

        let request = SoapHttpRequest::new("application/soap+xml; charset=utf-8; action=\"urn:svc/Echo\"", "");
        assert_eq!(request.action().as_deref(), Some("urn:svc/Echo"));

        assert!(SoapHttpRequest::new("text/xml", "").action().is_none());
    }

    // --- Dispatch ---

    #[tokio::test]
    async fn test_echo_round_trip() {
        let publisher = publisher(test_config());
        let request = soap11(r#"<Echo><msg xsi:type="xsd:string">hello</msg></Echo>"#);

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.state(), ResponseState::BodySet);
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(response.header("X-SOAP-Operation"), Some("Echo"));
        assert!(response
            .body_text()
            .contains(r#"<EchoResponse><return xsi:type="xsd:string">hello</return></EchoResponse>"#));
    }

    #[tokio::test]
    async fn test_dotted_operation_dispatch() {
        let publisher = publisher(test_config());
        let request = soap11(
            r#"<Math.Add><a xsi:type="xsd:int">3</a><b xsi:type="xsd:int">4</b></Math.Add>"#,
        );

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("X-SOAP-Operation"), Some("Math/Add"));
        assert!(response
            .body_text()
            .contains(r#"<Math.AddResponse><return xsi:type="xsd:int">7</return></Math.AddResponse>"#));
    }

    /// Returns the login of a registered request using the registered response type.
    struct Login;

    #[async_trait]
    impl SoapOperation for Login {
        async fn invoke(&self, arguments: CallArguments) -> Result<ReturnValue, CallError> {
            match arguments {
                CallArguments::Registered {
                    value,
                    response_type,
                } => {
                    let login = value.member("login").cloned().unwrap_or(SoapValue::Null);
                    Ok(ReturnValue {
                        value: login,
                        typecode: response_type,
                    })
                }
                CallArguments::Positional(_) => Err(CallError::tagged("TypeError", "untyped call")),
            }
        }
    }

    #[tokio::test]
    async fn test_response_type_only_reaches_registered_calls() {
        let yaml = r#"
operations:
  types:
    Echo:
      response:
        name: Echoed
        type: integer
    Login:
      request:
        name: Login
        type: struct
        fields:
          - name: login
            type: string
      response:
        name: LoggedIn
        type: string
"#;
        let config: SoapRpcConfig = serde_yaml::from_str(yaml).unwrap();
        let publisher = SoapPublisher::from_config(config)
            .register("Echo", Echo)
            .register("Login", Login);

        // Echo has no request type, so its untyped result keeps the generic shape.
        let response = publisher
            .publish(&soap11("<Echo><m>hi</m></Echo>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 200);
        assert!(response
            .body_text()
            .contains(r#"<EchoResponse><return xsi:type="xsd:string">hi</return></EchoResponse>"#));
        assert!(!response.body_text().contains("Echoed"));

        let response = publisher
            .publish(
                &soap11("<Login><login>jdoe</login></Login>"),
                BasicResponse::new(),
            )
            .await;
        assert_eq!(response.status(), 200);
        assert!(response
            .body_text()
            .contains(r#"<LoggedIn xsi:type="xsd:string">jdoe</LoggedIn>"#));
    }

    #[tokio::test]
    async fn test_soap_12_request_gets_soap_12_response() {
        let publisher = publisher(test_config());
        let request = SoapHttpRequest::new(
            "application/soap+xml",
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body><Echo><v>x</v></Echo></env:Body>
</env:Envelope>"#,
        );

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.header("content-type"), Some("application/soap+xml"));
        assert!(response
            .body_text()
            .contains("http://www.w3.org/2003/05/soap-envelope"));
    }

    #[tokio::test]
    async fn test_operation_error_becomes_fault() {
        let publisher = publisher(test_config());
        let request = soap11("<Math.Add><a>three</a></Math.Add>");

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("TypeError: Add expects integers"));
        assert_eq!(publisher.metrics().faults_returned, 1);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let publisher = publisher(test_config());
        let response = publisher
            .publish(&soap11("<Nope/>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("Method not found: Nope"));
        assert!(response.body_text().contains("soap:Client"));
    }

    #[tokio::test]
    async fn test_malformed_xml_faults() {
        let publisher = publisher(test_config());
        let request = SoapHttpRequest::new("text/xml", "<this is not valid xml>><<");

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("Malformed SOAP request"));
        assert_eq!(response.state(), ResponseState::Faulted);
        // No target was parsed, so no debug header.
        assert!(response.header("X-SOAP-Operation").is_none());
    }

    #[tokio::test]
    async fn test_wrong_content_type_faults() {
        let publisher = publisher(test_config());
        let mut request = soap11("<Echo/>");
        request.content_type = Some("application/json".to_string());

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("Unsupported content type"));
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let mut config = test_config();
        config.settings.max_body_size = 100;
        let publisher = publisher(config);
        let request = soap11(&format!("<Echo><v>{}</v></Echo>", "x".repeat(200)));

        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("exceeds maximum 100"));
    }

    #[tokio::test]
    async fn test_unauthorized_with_realm() {
        let publisher = publisher(test_config());
        let response = publisher
            .publish(&soap11("<Locked/>"), BasicResponse::new().with_realm("Zentinel"))
            .await;

        assert_eq!(response.status(), 401);
        assert_eq!(
            response.header("www-authenticate"),
            Some("basic realm=\"Zentinel\"")
        );
        assert!(response.body().is_empty());
        assert_eq!(publisher.metrics().auth_challenges, 1);
        assert_eq!(publisher.metrics().faults_returned, 0);
    }

    #[tokio::test]
    async fn test_denylisted_operation() {
        let mut config = test_config();
        config.operations.mode = OperationMode::Denylist;
        config.operations.actions = vec!["Lock*".to_string()];
        let publisher = publisher(config);

        let response = publisher
            .publish(&soap11("<Locked/>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("Operation 'Locked' is not allowed"));

        let response = publisher
            .publish(&soap11("<Echo/>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_allowlist_with_patterns() {
        let mut config = test_config();
        config.operations.actions = vec!["Math/*".to_string()];
        let publisher = publisher(config);

        let response = publisher
            .publish(&soap11("<Echo/>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 500);

        let response = publisher
            .publish(&soap11("<Math.Add/>"), BasicResponse::new())
            .await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_soap_action_required() {
        let mut config = test_config();
        config.operations.require_soap_action_header = true;
        let publisher = publisher(config);

        let response = publisher
            .publish(&soap11("<Echo/>"), BasicResponse::new())
            .await;
        assert!(response.body_text().contains("SOAPAction header is required"));

        let request = soap11("<Echo/>").with_soap_action("\"Echo\"");
        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_soap_action_mismatch() {
        let mut config = test_config();
        config.operations.validate_action_match = true;
        let publisher = publisher(config);

        let request = soap11("<Echo/>").with_soap_action("\"urn:example#Delete\"");
        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 500);
        assert!(response.body_text().contains("does not match body operation"));

        let request = soap11("<Echo/>").with_soap_action("\"urn:example#Echo\"");
        let response = publisher.publish(&request, BasicResponse::new()).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_debug_headers_disabled() {
        let mut config = test_config();
        config.settings.debug_headers = false;
        let publisher = publisher(config);

        let response = publisher
            .publish(&soap11("<Echo/>"), BasicResponse::new())
            .await;
        assert!(response.header("X-SOAP-Operation").is_none());
    }

    #[tokio::test]
    async fn test_request_counter() {
        let publisher = publisher(test_config());
        assert_eq!(publisher.metrics(), PublisherMetrics::default());

        publisher
            .publish(&soap11("<Echo/>"), BasicResponse::new())
            .await;
        publisher
            .publish(&soap11("<Nope/>"), BasicResponse::new())
            .await;

        let metrics = publisher.metrics();
        assert_eq!(metrics.requests_processed, 2);
        assert_eq!(metrics.faults_returned, 1);
    }
}
