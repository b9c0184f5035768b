//! OAuth 2.0 client-side primitives.
//!
//! - [`pkce`] - PKCE verifier/challenge pairs, CSRF state tokens and nonces

pub mod pkce;

pub use pkce::{
    PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier, StateToken, generate_nonce,
};
