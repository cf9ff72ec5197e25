//! Registry of request and response types per operation.
//!
//! Built once at startup and shared read-only between requests.

use crate::config::OperationsConfig;
use crate::typecode::TypeCode;
use std::collections::HashMap;

/// Resolver for an operation's request arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestType {
    /// When absent, the arguments fall back to generic per-child parsing.
    pub typecode: Option<TypeCode>,
}

/// Resolver for an operation's return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseType {
    pub typecode: TypeCode,
}

/// Read-only mapping from operation name to type resolvers.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    requests: HashMap<String, RequestType>,
    responses: HashMap<String, ResponseType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `operations.types` configuration section.
    ///
    /// Every configured operation gets a request resolver, with or without a
    /// type code; a response resolver exists only when a response type is set.
    pub fn from_config(config: &OperationsConfig) -> Self {
        let mut registry = Self::new();
        for (name, types) in &config.types {
            registry.requests.insert(
                name.clone(),
                RequestType {
                    typecode: types.request.clone(),
                },
            );
            if let Some(ref response) = types.response {
                registry.responses.insert(
                    name.clone(),
                    ResponseType {
                        typecode: response.clone(),
                    },
                );
            }
        }
        registry
    }

    pub fn with_request(mut self, operation: impl Into<String>, typecode: TypeCode) -> Self {
        self.requests.insert(
            operation.into(),
            RequestType {
                typecode: Some(typecode),
            },
        );
        self
    }

    pub fn with_response(mut self, operation: impl Into<String>, typecode: TypeCode) -> Self {
        self.responses
            .insert(operation.into(), ResponseType { typecode });
        self
    }

    pub fn request_type(&self, operation: &str) -> Option<&RequestType> {
        self.requests.get(operation)
    }

    pub fn response_type(&self, operation: &str) -> Option<&ResponseType> {
        self.responses.get(operation)
    }

    /// Number of operations with at least one registered resolver.
    pub fn len(&self) -> usize {
        let response_only = self
            .responses
            .keys()
            .filter(|name| !self.requests.contains_key(*name))
            .count();
        self.requests.len() + response_only
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.responses.is_empty()
    }
}
