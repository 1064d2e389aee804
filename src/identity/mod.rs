// Identity service boundary
// Request/response types and the HTTP client for the token issuer.

mod client;
pub mod types;

pub use client::IdentityClient;
pub use types::{AuthResponse, TokenPair, UserProfile};
