//! Configuration types for the SOAP RPC adapter.

use crate::typecode::TypeCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration for the SOAP RPC adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapRpcConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Authentication challenge settings
    pub auth: AuthConfig,

    /// Operation dispatch and type registration
    pub operations: OperationsConfig,
}

impl Default for SoapRpcConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            auth: AuthConfig::default(),
            operations: OperationsConfig::default(),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Maximum request body size to process (bytes)
    pub max_body_size: usize,

    /// Add debug headers (X-SOAP-*) to responses
    pub debug_headers: bool,

    /// Allowed Content-Type headers for SOAP requests
    pub allowed_content_types: Vec<String>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1_048_576, // 1MB
            debug_headers: false,
            allowed_content_types: vec![
                "text/xml".to_string(),
                "application/soap+xml".to_string(),
            ],
        }
    }
}

/// Authentication challenge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Realm announced in `WWW-Authenticate`
    pub realm: Option<String>,

    /// What to do with an authorization failure when no realm is set
    pub missing_realm: MissingRealmAction,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realm: None,
            missing_realm: MissingRealmAction::Fault,
        }
    }
}

/// Handling of authorization failures without a configured realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingRealmAction {
    /// Answer with a regular SOAP fault (status 500)
    #[default]
    Fault,
    /// Leave the response untouched
    Ignore,
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

/// Operation dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Mode: allowlist or denylist
    pub mode: OperationMode,

    /// Operation name patterns (glob). An empty allowlist allows everything.
    pub actions: Vec<String>,

    /// Require SOAPAction header
    pub require_soap_action_header: bool,

    /// Validate SOAPAction matches body operation
    pub validate_action_match: bool,

    /// Registered request/response types, keyed by operation name
    pub types: HashMap<String, OperationTypes>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Allowlist,
            actions: Vec::new(),
            require_soap_action_header: false,
            validate_action_match: false,
            types: HashMap::new(),
        }
    }
}

/// Operation control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Only allow listed operations
    #[default]
    Allowlist,
    /// Block listed operations
    Denylist,
}

/// Types registered for one operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTypes {
    /// Type code the whole body root is parsed against
    pub request: Option<TypeCode>,

    /// Type code attached to the return value
    pub response: Option<TypeCode>,
}
