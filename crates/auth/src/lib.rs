//! `evently-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it verifies
//! bearer tokens into claims and answers "may this actor manage that
//! resource?" questions. Token issuance lives with the identity provider.

pub mod claims;
pub mod guard;
pub mod jwt;
pub mod roles;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use guard::{can_create_event, can_manage};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use roles::Role;
