//! Backend authorization-service seam.

pub mod authorizer;

pub use authorizer::{
    AuthorizationClient, AuthorizationError, AuthorizationOutcome, AuthorizationResult,
    HttpAuthorizationClient, HttpAuthorizerConfig,
};
