//! Core types for request mediation in the tun client.
//!
//! This crate provides the HTTP exchange types, the signed session cookie
//! codec, and the email allowlist used by the client's magic auth gate.

pub mod allowlist;
pub mod auth;
pub mod error;
pub mod protocol;

pub use auth::{CookieError, SessionCookie, SignedCookieCodec, COOKIE_LIFETIME_SECS};
pub use error::{ErrorCategory, MediationError, MediationResult};
pub use protocol::{HttpMethod, HttpRequestData, HttpResponseData, HttpVersion, RequestId};
