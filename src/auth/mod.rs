//! Bearer-token authentication: decoding and validating claims, and the
//! role-to-scope mapping used for authorization decisions in the RPC layer.

pub mod claims;
pub mod verifier;

pub use claims::{Claims, Role, Scope};
pub use verifier::AuthVerifier;
