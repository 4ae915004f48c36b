//! Domain layer types and invariants.

pub mod error;
pub mod resources;

pub use error::DomainError;
pub use resources::{
    FetchRequest, MutationAction, MutationRequest, Operation, QueryParams, Resource,
    canonical_json,
};
