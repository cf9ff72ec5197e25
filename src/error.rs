//! Error types for the SOAP RPC adapter.
//!
//! [`SoapError`] covers envelope and marshalling failures inside the crate.
//! [`CallError`] is what an operation hands back when a call fails; the
//! response decorator turns it into a SOAP Fault or an authentication
//! challenge.

use crate::config::SoapVersion;
use crate::parser::{is_xml_char, SOAP_11_NS, SOAP_12_NS};
use thiserror::Error;

/// SOAP adapter errors.
#[derive(Error, Debug)]
pub enum SoapError {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("XXE attack detected: {0}")]
    XxeDetected(String),

    #[error("Type mismatch at {element}: expected {expected}, found {found}")]
    TypeMismatch {
        element: String,
        expected: String,
        found: String,
    },

    #[error("Missing required element: {0}")]
    MissingElement(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Marker error for failed authorization.
///
/// Anything that wraps this (directly or further down an error chain) is
/// answered with a Basic auth challenge instead of a Fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unauthorized: {0}")]
pub struct Unauthorized(pub String);

/// Legacy tag recognized as an authorization failure.
pub const UNAUTHORIZED_TAG: &str = "Unauthorized";

/// Error returned by a SOAP operation.
#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),

    /// The operation already produced a fault; it is sent as is.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// An error identified only by a string tag.
    #[error("{tag}: {message}")]
    Tagged { tag: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallError {
    /// Build a tagged error.
    pub fn tagged(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tagged {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Whether this error is an authorization failure, by type, by an
    /// `Unauthorized` somewhere in its source chain, or by legacy tag.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Tagged { tag, .. } => tag == UNAUTHORIZED_TAG,
            Self::Other(e) => e.chain().any(|cause| cause.is::<Unauthorized>()),
            Self::Fault(_) => false,
        }
    }

    /// Render the chain of underlying causes, one per line.
    pub fn traceback(&self) -> String {
        match self {
            Self::Other(e) => e
                .chain()
                .skip(1)
                .map(|cause| format!("  caused by: {}", cause))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// SOAP fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// The request was at fault (SOAP 1.2: `Sender`)
    Client,
    /// The server failed to process a valid request (SOAP 1.2: `Receiver`)
    Server,
}

impl FaultCode {
    /// Code value for the given SOAP version, without prefix.
    pub fn as_str(&self, version: SoapVersion) -> &'static str {
        match (self, version) {
            (Self::Client, SoapVersion::Soap11) => "Client",
            (Self::Server, SoapVersion::Soap11) => "Server",
            (Self::Client, SoapVersion::Soap12) => "Sender",
            (Self::Server, SoapVersion::Soap12) => "Receiver",
        }
    }
}

/// A SOAP Fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SOAP fault ({}): {string}", .code.as_str(SoapVersion::Soap11))]
pub struct Fault {
    pub code: FaultCode,
    /// `faultstring` / `Reason`
    pub string: String,
    pub actor: Option<String>,
    /// Free text placed in the `detail` element
    pub detail: Option<String>,
}

impl Fault {
    /// A fault blaming the sender.
    pub fn client(string: impl Into<String>) -> Self {
        Self {
            code: FaultCode::Client,
            string: string.into(),
            actor: None,
            detail: None,
        }
    }

    /// A fault blaming the server.
    pub fn server(string: impl Into<String>) -> Self {
        Self {
            code: FaultCode::Server,
            string: string.into(),
            actor: None,
            detail: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Render as a complete fault envelope.
    pub fn to_xml(&self, version: SoapVersion) -> String {
        match version {
            SoapVersion::Soap11 => soap_11_fault(self),
            SoapVersion::Soap12 => soap_12_fault(self),
        }
    }
}

fn soap_11_fault(fault: &Fault) -> String {
    let mut optional = String::new();
    if let Some(ref actor) = fault.actor {
        optional.push_str(&format!(
            "\n      <faultactor>{}</faultactor>",
            xml_escape(actor)
        ));
    }
    if let Some(ref detail) = fault.detail {
        optional.push_str(&format!("\n      <detail>{}</detail>", xml_escape(detail)));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{}">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:{}</faultcode>
      <faultstring>{}</faultstring>{}
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        SOAP_11_NS,
        fault.code.as_str(SoapVersion::Soap11),
        xml_escape(&fault.string),
        optional
    )
}

fn soap_12_fault(fault: &Fault) -> String {
    let mut optional = String::new();
    if let Some(ref actor) = fault.actor {
        optional.push_str(&format!(
            "\n      <soap:Role>{}</soap:Role>",
            xml_escape(actor)
        ));
    }
    if let Some(ref detail) = fault.detail {
        optional.push_str(&format!(
            "\n      <soap:Detail>{}</soap:Detail>",
            xml_escape(detail)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{}">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:{}</soap:Value>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{}</soap:Text>
      </soap:Reason>{}
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        SOAP_12_NS,
        fault.code.as_str(SoapVersion::Soap12),
        xml_escape(&fault.string),
        optional
    )
}

/// Escape markup and replace characters XML cannot carry with U+FFFD.
fn xml_escape(s: &str) -> String {
    let s: String = s
        .chars()
        .map(|c| if is_xml_char(c) { c } else { '\u{FFFD}' })
        .collect();
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
