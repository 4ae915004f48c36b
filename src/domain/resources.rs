//! Admin API resources, read operations and mutation requests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::error::DomainError;

/// A REST resource exposed by the admin backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Products,
    Orders,
    Customers,
    Categories,
    Dashboard,
    Analytics,
    Activity,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Products,
        Resource::Orders,
        Resource::Customers,
        Resource::Categories,
        Resource::Dashboard,
        Resource::Analytics,
        Resource::Activity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Products => "products",
            Resource::Orders => "orders",
            Resource::Customers => "customers",
            Resource::Categories => "categories",
            Resource::Dashboard => "dashboard",
            Resource::Analytics => "analytics",
            Resource::Activity => "activity",
        }
    }

    /// Entity collections support list/detail/stats reads and mutations.
    pub fn is_entity(self) -> bool {
        matches!(
            self,
            Resource::Products | Resource::Orders | Resource::Customers | Resource::Categories
        )
    }

    pub fn supports(self, operation: &Operation) -> bool {
        match (self, operation) {
            (resource, Operation::List | Operation::Detail(_) | Operation::Stats)
                if resource.is_entity() =>
            {
                true
            }
            (Resource::Dashboard, Operation::Stats | Operation::Overview) => true,
            (Resource::Analytics, Operation::Sales) => true,
            (Resource::Activity, Operation::List) => true,
            _ => false,
        }
    }

    /// Relative REST path for a read, e.g. `api/orders/o-1`.
    pub fn endpoint(self, operation: &Operation) -> Result<String, DomainError> {
        if !self.supports(operation) {
            return Err(DomainError::unsupported(self.as_str(), operation.name()));
        }
        let path = match operation {
            Operation::List => format!("api/{}", self.as_str()),
            Operation::Detail(id) => format!("api/{}/{id}", self.as_str()),
            Operation::Stats => format!("api/{}/stats", self.as_str()),
            Operation::Overview => format!("api/{}/overview", self.as_str()),
            Operation::Sales => format!("api/{}/sales", self.as_str()),
        };
        Ok(path)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| DomainError::UnknownResource(value.to_string()))
    }
}

/// A read operation against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    List,
    Detail(String),
    Stats,
    Overview,
    Sales,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Detail(_) => "detail",
            Operation::Stats => "stats",
            Operation::Overview => "overview",
            Operation::Sales => "sales",
        }
    }

    pub fn detail(id: impl Into<String>) -> Self {
        Operation::Detail(id.into())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Detail(id) => write!(f, "detail.{id}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Canonical query parameters (pagination, filters, sort).
///
/// Backed by a `BTreeMap`, so iteration order never depends on how the
/// parameters were inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn page(page: u32, limit: u32) -> Self {
        Self::new().with("page", page).with("limit", limit)
    }

    /// Build parameters from a JSON object. `null` members are dropped;
    /// nested arrays and objects are rendered as canonical JSON.
    pub fn from_json(value: &Value) -> Result<Self, DomainError> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            other => {
                return Err(DomainError::invalid_params(format!(
                    "expected an object, got `{other}`"
                )));
            }
        };

        let mut params = Self::new();
        for (key, member) in object {
            match member {
                Value::Null => {}
                Value::String(text) => params.insert(key.clone(), text),
                Value::Bool(_) | Value::Number(_) => params.insert(key.clone(), member),
                nested => params.insert(key.clone(), canonical_json(nested)),
            }
        }
        Ok(params)
    }

    /// Parse `key=value` pairs as given on the command line.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, DomainError> {
        let mut params = Self::new();
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| DomainError::invalid_params(format!("`{pair}` is not key=value")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(DomainError::invalid_params(format!("`{pair}` has no key")));
            }
            params.insert(key, value.trim());
        }
        Ok(params)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Render JSON with object members sorted by key, at every depth.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(object) => {
            let mut members: Vec<(&String, &Value)> = object.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = members
                .into_iter()
                .map(|(key, member)| format!("{}:{}", Value::from(key.as_str()), canonical_json(member)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// A read to perform against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub resource: Resource,
    pub operation: Operation,
    pub params: QueryParams,
}

impl FetchRequest {
    pub fn new(resource: Resource, operation: Operation, params: QueryParams) -> Self {
        Self {
            resource,
            operation,
            params,
        }
    }

    pub fn endpoint(&self) -> Result<String, DomainError> {
        self.resource.endpoint(&self.operation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A create/update/delete call against an entity collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub resource: Resource,
    pub action: MutationAction,
    pub id: Option<String>,
    pub payload: Option<Value>,
}

impl MutationRequest {
    pub fn create(resource: Resource, payload: Value) -> Self {
        Self {
            resource,
            action: MutationAction::Create,
            id: None,
            payload: Some(payload),
        }
    }

    pub fn update(resource: Resource, id: impl Into<String>, payload: Value) -> Self {
        Self {
            resource,
            action: MutationAction::Update,
            id: Some(id.into()),
            payload: Some(payload),
        }
    }

    pub fn delete(resource: Resource, id: impl Into<String>) -> Self {
        Self {
            resource,
            action: MutationAction::Delete,
            id: Some(id.into()),
            payload: None,
        }
    }

    /// Relative REST path: the collection for creates, the item otherwise.
    pub fn endpoint(&self) -> Result<String, DomainError> {
        if !self.resource.is_entity() {
            return Err(DomainError::unsupported(
                self.resource.as_str(),
                self.action.as_str(),
            ));
        }
        if self.action == MutationAction::Create {
            return Ok(format!("api/{}", self.resource));
        }
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(format!("api/{}/{id}", self.resource)),
            _ => Err(DomainError::MissingId {
                resource: self.resource.as_str(),
                action: self.action.as_str(),
            }),
        }
    }
}
