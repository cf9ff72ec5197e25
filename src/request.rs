//! Turning an inbound SOAP envelope into call arguments.

use crate::config::SoapVersion;
use crate::error::SoapError;
use crate::parser::{parse_soap_envelope, Element};
use crate::registry::TypeRegistry;
use crate::typecode::TypeCode;
use crate::value::SoapValue;
use tracing::debug;

/// Arguments for one operation call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArguments {
    /// The body root parsed against a registered request type, plus the
    /// registered response type (if any).
    Registered {
        value: SoapValue,
        response_type: Option<TypeCode>,
    },
    /// One generically parsed value per child of the body root, in document order.
    Positional(Vec<SoapValue>),
}

impl CallArguments {
    /// Number of arguments; a registered call always has two.
    pub fn len(&self) -> usize {
        match self {
            Self::Registered { .. } => 2,
            Self::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional argument by index, or the structured value at index 0.
    pub fn get(&self, index: usize) -> Option<&SoapValue> {
        match self {
            Self::Registered { value, .. } if index == 0 => Some(value),
            Self::Registered { .. } => None,
            Self::Positional(values) => values.get(index),
        }
    }
}

/// A parsed SOAP request.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    /// Local name of the body root
    pub target: String,
    /// `target` with every `.` replaced by `/`
    pub method: String,
    pub version: SoapVersion,
    pub arguments: CallArguments,
}

impl SoapRequest {
    /// Parse an envelope and build the call arguments for its body root.
    pub fn parse(data: &[u8], registry: &TypeRegistry) -> Result<Self, SoapError> {
        let envelope = parse_soap_envelope(data)?;
        let root = envelope
            .body_root
            .ok_or_else(|| SoapError::InvalidEnvelope("SOAP Body is empty".to_string()))?;

        let target = root.local_name.clone();
        let method = operation_name(&target);
        let arguments = build_arguments(&root, &target, &method, registry)?;

        debug!(
            target = %target,
            method = %method,
            argument_count = arguments.len(),
            "Parsed SOAP request"
        );

        Ok(Self {
            target,
            method,
            version: envelope.version,
            arguments,
        })
    }
}

/// Parse an envelope and return only its call arguments.
pub fn parse_input(data: &[u8], registry: &TypeRegistry) -> Result<CallArguments, SoapError> {
    SoapRequest::parse(data, registry).map(|request| request.arguments)
}

/// Map a body root name to an operation name (`Foo.Bar` -> `Foo/Bar`).
pub fn operation_name(target: &str) -> String {
    target.replace('.', "/")
}

fn build_arguments(
    root: &Element,
    target: &str,
    method: &str,
    registry: &TypeRegistry,
) -> Result<CallArguments, SoapError> {
    if root.children.is_empty() {
        return Ok(CallArguments::Positional(Vec::new()));
    }

    let request_type = registry
        .request_type(method)
        .or_else(|| registry.request_type(target));

    if let Some(typecode) = request_type.and_then(|r| r.typecode.as_ref()) {
        let value = typecode.parse(root)?;
        let response_type = registry
            .response_type(method)
            .or_else(|| registry.response_type(target))
            .map(|r| r.typecode.clone());
        return Ok(CallArguments::Registered {
            value,
            response_type,
        });
    }

    let any = TypeCode::any("");
    root.children
        .iter()
        .map(|child| any.parse(child))
        .collect::<Result<Vec<_>, _>>()
        .map(CallArguments::Positional)
}
