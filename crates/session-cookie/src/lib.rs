//! Tamper-evident session cookies
//!
//! The proxy keeps no server-side session table, so the cookie has to
//! certify itself. A token is three `|`-separated fields:
//!
//! ```text
//! base64url(payload) | issued_at (unix seconds) | base64url(HMAC-SHA256)
//! ```
//!
//! The MAC is keyed with the cookie seed and covers the cookie name, the
//! encoded payload and the issue time, so a token cannot be edited, moved to
//! another cookie name, or have its age rewound. The payload is only encoded,
//! never encrypted: clients can read it.

pub mod codec;
pub mod error;

pub use codec::{CookieCodec, sign, verify};
pub use error::{Result, VerifyError};
