//! SOAP 1.1/1.2 RPC adapter for Zentinel
//!
//! Turns a SOAP envelope into the arguments of an operation call, and turns
//! the call's outcome back into a SOAP response.
//!
//! # Features
//!
//! - Request parsing: `<Foo.Bar>` in the Body calls operation `Foo/Bar`
//! - Registered request/response type codes, with generic parsing as fallback
//! - Response decoration: envelopes, Faults, Basic auth challenges,
//!   `Content-Type` and `Content-Length`
//! - Operation allowlist/denylist and SOAPAction checks
//! - XXE (XML External Entity) rejection while parsing
//!
//! # Example
//!
//! ```ignore
//! use zentinel_soap_rpc::{BasicResponse, SoapHttpRequest, SoapPublisher, SoapRpcConfig};
//!
//! let publisher = SoapPublisher::from_config(SoapRpcConfig::default())
//!     .register("Echo", Echo);
//! let request = SoapHttpRequest::new("text/xml", body);
//! let response = publisher.publish(&request, BasicResponse::new()).await;
//! ```

pub mod config;
pub mod error;
pub mod parser;
pub mod publisher;
pub mod registry;
pub mod request;
pub mod response;
pub mod typecode;
pub mod value;

pub use config::SoapRpcConfig;
pub use error::{CallError, Fault, FaultCode, SoapError, Unauthorized};
pub use publisher::{SoapHttpRequest, SoapOperation, SoapPublisher};
pub use registry::TypeRegistry;
pub use request::{CallArguments, SoapRequest};
pub use response::{BasicResponse, HttpResponse, ReturnValue, SoapResponse};
pub use typecode::{TypeCode, TypeKind};
pub use value::SoapValue;
