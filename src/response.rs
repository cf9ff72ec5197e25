//! SOAP response decoration.
//!
//! [`SoapResponse`] wraps whatever response object the host server uses.
//! Everything except [`SoapResponse::set_body`] and
//! [`SoapResponse::exception`] reaches the wrapped object through `Deref`.
//! Return values are marshalled into a SOAP envelope; errors become SOAP
//! Faults or, for authorization failures, a Basic auth challenge.

use crate::config::{MissingRealmAction, SoapVersion};
use crate::error::{CallError, Fault, SoapError};
use crate::typecode::{serialize_envelope, TypeCode};
use crate::value::{premarshal, SoapValue};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info, warn};

/// Content type used unless SOAP 1.2 was negotiated.
pub const DEFAULT_CONTENT_TYPE: &str = "text/xml";
pub const SOAP_11_CONTENT_TYPE: &str = "text/xml";
pub const SOAP_12_CONTENT_TYPE: &str = "application/soap+xml";

/// The part of a host response object the SOAP layer needs.
pub trait HttpResponse {
    fn set_body(&mut self, body: Vec<u8>);

    fn body(&self) -> &[u8];

    /// Set a header, replacing any previous value.
    fn set_header(&mut self, name: &str, value: &str);

    fn set_status(&mut self, status: u16);

    /// Realm for authentication challenges, if the host configured one.
    fn realm(&self) -> Option<&str>;
}

/// In-memory response for hosts without their own response type.
#[derive(Debug, Clone)]
pub struct BasicResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    realm: Option<String>,
}

impl Default for BasicResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: Vec::new(),
            realm: None,
        }
    }
}

impl BasicResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn set_realm(&mut self, realm: Option<String>) {
        self.realm = realm;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers, names lowercased.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl HttpResponse for BasicResponse {
    fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }
}

/// A value returned by an operation, optionally carrying its own type code.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    pub value: SoapValue,
    pub typecode: Option<TypeCode>,
}

impl ReturnValue {
    pub fn new(value: impl Into<SoapValue>) -> Self {
        Self {
            value: value.into(),
            typecode: None,
        }
    }

    pub fn typed(value: impl Into<SoapValue>, typecode: TypeCode) -> Self {
        Self {
            value: value.into(),
            typecode: Some(typecode),
        }
    }

    /// Premarshal any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, SoapError> {
        premarshal(value).map(Self::new)
    }
}

impl From<SoapValue> for ReturnValue {
    fn from(value: SoapValue) -> Self {
        Self::new(value)
    }
}

/// What [`SoapResponse::set_body`] accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Value(ReturnValue),
    Fault(Fault),
}

impl From<ReturnValue> for ResponseBody {
    fn from(value: ReturnValue) -> Self {
        Self::Value(value)
    }
}

impl From<SoapValue> for ResponseBody {
    fn from(value: SoapValue) -> Self {
        Self::Value(ReturnValue::new(value))
    }
}

impl From<Fault> for ResponseBody {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// How a finished call is reflected in the response.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(ReturnValue),
    /// Fault body with status 500
    Fault(Fault),
    /// Status 401 with `WWW-Authenticate`, no body
    AuthChallenge { realm: String },
    /// Authorization failure left unanswered (no realm, `missing_realm: ignore`)
    Unchanged,
}

impl CallOutcome {
    /// Decide how a failed call is answered.
    pub fn from_error(
        error: &CallError,
        realm: Option<&str>,
        missing_realm: MissingRealmAction,
    ) -> Self {
        if error.is_unauthorized() {
            match (realm.filter(|r| !r.is_empty()), missing_realm) {
                (Some(realm), _) => {
                    return Self::AuthChallenge {
                        realm: realm.to_string(),
                    }
                }
                (None, MissingRealmAction::Ignore) => return Self::Unchanged,
                (None, MissingRealmAction::Fault) => {}
            }
        }

        match error {
            CallError::Fault(fault) => Self::Fault(fault.clone()),
            other => {
                let traceback = other.traceback();
                let fault = Fault::server(format!("{} : {}", other, traceback));
                if traceback.is_empty() {
                    Self::Fault(fault)
                } else {
                    Self::Fault(fault.with_detail(traceback))
                }
            }
        }
    }
}

/// Lifecycle of one decorated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Fresh,
    BodySet,
    Faulted,
    AuthChallenged,
}

/// SOAP decorator around a host response object.
#[derive(Debug)]
pub struct SoapResponse<R> {
    inner: R,
    /// Body root name of the request; names the generic response element
    target: String,
    soap11: bool,
    soap12: bool,
    missing_realm: MissingRealmAction,
    state: ResponseState,
}

impl<R: HttpResponse> SoapResponse<R> {
    pub fn new(inner: R, target: impl Into<String>) -> Self {
        Self {
            inner,
            target: target.into(),
            soap11: false,
            soap12: false,
            missing_realm: MissingRealmAction::default(),
            state: ResponseState::Fresh,
        }
    }

    /// Mark the negotiated SOAP version.
    pub fn with_version(mut self, version: SoapVersion) -> Self {
        self.set_version(version);
        self
    }

    pub fn with_missing_realm(mut self, action: MissingRealmAction) -> Self {
        self.missing_realm = action;
        self
    }

    pub fn set_version(&mut self, version: SoapVersion) {
        self.soap11 = version == SoapVersion::Soap11;
        self.soap12 = version == SoapVersion::Soap12;
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// Version used for envelopes written by this response.
    pub fn version(&self) -> SoapVersion {
        if self.soap12 {
            SoapVersion::Soap12
        } else {
            SoapVersion::Soap11
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Marshal a return value or fault into the wrapped response.
    ///
    /// Returns `None` when the value could not be serialized; the response
    /// then carries a fault produced by [`SoapResponse::exception`].
    pub fn set_body(&mut self, body: impl Into<ResponseBody>) -> Option<&mut Self> {
        let (xml, state) = match body.into() {
            ResponseBody::Fault(fault) => (fault.to_xml(self.version()), ResponseState::Faulted),
            ResponseBody::Value(result) => match self.serialize_value(result) {
                Ok(xml) => (xml, ResponseState::BodySet),
                Err(err) => {
                    let error = CallError::from(anyhow::Error::new(err).context(format!(
                        "failed to serialize response for {}",
                        self.target
                    )));
                    self.exception(&error);
                    return None;
                }
            },
        };

        self.inner.set_body(xml.into_bytes());
        self.set_content_headers();
        self.state = state;
        Some(self)
    }

    /// Premarshal a serializable value and set it as the body.
    pub fn set_return<T: Serialize + ?Sized>(&mut self, value: &T) -> Option<&mut Self> {
        match ReturnValue::from_serialize(value) {
            Ok(result) => self.set_body(result),
            Err(err) => {
                self.exception(&CallError::from(anyhow::Error::new(err)));
                None
            }
        }
    }

    /// Answer a failed call.
    ///
    /// Authorization failures become a 401 challenge when a realm is known
    /// and return `None`. Everything else becomes a Fault with status 500;
    /// the rendered traceback is returned.
    pub fn exception(&mut self, error: &CallError) -> Option<String> {
        let traceback = error.traceback();
        info!(
            target_name = %self.target,
            error = %error,
            traceback = %traceback,
            "SOAPException"
        );

        let outcome = CallOutcome::from_error(error, self.inner.realm(), self.missing_realm);
        let faulted = matches!(outcome, CallOutcome::Fault(_));
        self.apply(outcome);
        faulted.then_some(traceback)
    }

    /// Reflect an operation result in the response.
    pub fn finish(&mut self, result: Result<ReturnValue, CallError>) {
        match result {
            Ok(value) => {
                self.set_body(value);
            }
            Err(error) => {
                self.exception(&error);
            }
        }
    }

    fn apply(&mut self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success(value) => {
                self.set_body(value);
            }
            CallOutcome::Fault(fault) => {
                self.set_body(fault);
                self.inner.set_status(500);
            }
            CallOutcome::AuthChallenge { realm } => {
                debug!(realm = %realm, "Sending authentication challenge");
                self.inner.set_header(
                    "WWW-Authenticate",
                    &format!("basic realm=\"{}\"", quote_escape(&realm)),
                );
                self.inner.set_status(401);
                self.state = ResponseState::AuthChallenged;
            }
            CallOutcome::Unchanged => {
                warn!(
                    target_name = %self.target,
                    "Authorization failure without realm, response left unchanged"
                );
            }
        }
    }

    fn serialize_value(&self, result: ReturnValue) -> Result<String, SoapError> {
        let (typecode, value) = match result.typecode {
            Some(typecode) => (typecode, result.value),
            None => (
                TypeCode::any_list(format!("{}Response", self.target)),
                SoapValue::List(vec![result.value]),
            ),
        };
        serialize_envelope(self.version(), &typecode, &value)
    }

    fn set_content_headers(&mut self) {
        let length = self.inner.body().len();
        self.inner.set_header("content-length", &length.to_string());
        self.inner.set_header("content-type", DEFAULT_CONTENT_TYPE);
        if self.soap11 {
            self.inner.set_header("content-type", SOAP_11_CONTENT_TYPE);
        }
        if self.soap12 {
            self.inner.set_header("content-type", SOAP_12_CONTENT_TYPE);
        }
    }
}
/// Escape `"` and `\` for an HTTP quoted-string.
/// Escape `"` and `\\` for an HTTP quoted-string.
fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl<R> Deref for SoapResponse<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R> DerefMut for SoapResponse<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}
