//! Cache key definitions.
//!
//! A `CacheKey` is the tuple `(namespace, resource, operation, params)`.
//! Keys also have a dotted path form, `admin.orders.detail.o-1`, which is what
//! invalidation prefixes match against.

use std::fmt;

use url::form_urlencoded;

use crate::domain::{FetchRequest, Operation, QueryParams, Resource};

use super::config::TtlClass;

pub const DEFAULT_NAMESPACE: &str = "admin";

/// Canonical, order-independent rendering of query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamsDigest(String);

impl ParamsDigest {
    pub fn of(params: &QueryParams) -> Self {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params.iter() {
            serializer.append_pair(key, value);
        }
        Self(serializer.finish())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    resource: Resource,
    operation: Operation,
    params: QueryParams,
}

impl CacheKey {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn digest(&self) -> ParamsDigest {
        ParamsDigest::of(&self.params)
    }

    pub fn ttl_class(&self) -> TtlClass {
        TtlClass::for_query(self.resource, &self.operation)
    }

    /// Path segments: namespace, resource, operation name, then the id for
    /// detail keys.
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![
            self.namespace.as_str(),
            self.resource.as_str(),
            self.operation.name(),
        ];
        if let Operation::Detail(id) = &self.operation {
            segments.push(id.as_str());
        }
        segments
    }

    pub fn path(&self) -> String {
        self.segments().join(".")
    }

    /// Segment-wise prefix match; `orders.list` never matches `orders.listing`.
    pub fn starts_with(&self, prefix: &KeyPrefix) -> bool {
        let segments = self.segments();
        prefix.0.len() <= segments.len()
            && prefix
                .0
                .iter()
                .zip(segments)
                .all(|(expected, actual)| expected == actual)
    }

    /// The backend read that populates this key.
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest::new(self.resource, self.operation.clone(), self.params.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())?;
        if !self.params.is_empty() {
            write!(f, "?{}", self.digest().as_str())?;
        }
        Ok(())
    }
}

/// A path prefix selecting a family of cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPrefix(Vec<String>);

impl KeyPrefix {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Builds keys and prefixes within one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }
}

impl KeyBuilder {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn build(
        &self,
        resource: Resource,
        operation: Operation,
        params: Option<&QueryParams>,
    ) -> CacheKey {
        CacheKey {
            namespace: self.namespace.clone(),
            resource,
            operation,
            params: params.cloned().unwrap_or_default(),
        }
    }

    pub fn for_request(&self, request: &FetchRequest) -> CacheKey {
        self.build(
            request.resource,
            request.operation.clone(),
            Some(&request.params),
        )
    }

    /// Every key in the namespace.
    pub fn namespace_prefix(&self) -> KeyPrefix {
        KeyPrefix::new([self.namespace.as_str()])
    }

    /// `{resource}.*`
    pub fn resource(&self, resource: Resource) -> KeyPrefix {
        KeyPrefix::new([self.namespace.as_str(), resource.as_str()])
    }

    /// `{resource}.{operation}`; for details this covers every id.
    pub fn operation(&self, resource: Resource, operation: &'static str) -> KeyPrefix {
        KeyPrefix::new([self.namespace.as_str(), resource.as_str(), operation])
    }

    /// `{resource}.detail.{id}`
    pub fn detail(&self, resource: Resource, id: &str) -> KeyPrefix {
        KeyPrefix::new([self.namespace.as_str(), resource.as_str(), "detail", id])
    }
}

/// Build a key in the default namespace.
pub fn build_key(resource: Resource, operation: Operation, params: Option<&QueryParams>) -> CacheKey {
    KeyBuilder::default().build(resource, operation, params)
}
