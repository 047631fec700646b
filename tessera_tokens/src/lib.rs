//! Cached bearer tokens with single-flight background refresh
//!
//! Services that authenticate outbound requests with short-lived bearer
//! tokens all face the same problem: callers should not wait on the token
//! authority while a perfectly good token is at hand, yet that token has to
//! be replaced before it expires.
//!
//! A [`TokenCache`] sits in front of a token source and answers every
//! request for a token based on the state of the token it holds:
//!
//! * _fresh_: the cached token is returned
//! * _stale_: the cached token is returned, and one background refresh is
//!   started no matter how many callers notice the token going stale
//! * _expired_, or nothing cached yet: the caller waits for a new token
//!
//! When a token goes stale is decided by a [`RefreshPolicy`], either as a
//! ratio of the token's lifetime or as a fixed window before expiry. Failed
//! background refreshes leave the still-valid token in place; they only
//! become visible to callers once that token expires and a synchronous fetch
//! fails as well.
//!
//! # Token sources
//!
//! Sources implement [`AsyncTokenSource`][sources::AsyncTokenSource]. This
//! crate ships with sources for exchanging an API key, for assuming a
//! trusted profile, and for exchanging an API key for a claim-scoped token.
//!
//! ```
//! use tessera_tokens::{sources, ApiKey, TokenCache};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let source = sources::ApiKeyTokenSource::new(
//!     reqwest::Client::new(),
//!     sources::api_key::DEFAULT_AUTHORITY_URL,
//!     ApiKey::from_static("my-api-key"),
//! )
//! .expect("valid configuration");
//!
//! let cache = TokenCache::new(source);
//! # let cache = TokenCache::new(sources::ConstTokenSource::new("token"));
//!
//! let token = cache.token().await.unwrap();
//!
//! tracing::info!(token = format_args!("{:#?}", token), "current access token");
//! # }
//! ```
//!
//! # Features
//!
//! * `test-util`: exposes [`TokenCache::set_token_times`] so that tests can
//!   force a cached token to be stale or expired.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod cache;
mod error;
pub mod sources;
mod store;
mod tokens;

pub use braids::*;
pub use cache::{TokenCache, DEFAULT_REFRESH_ADVANCE};
pub use error::TokenRequestError;
pub use store::TokenStore;
pub use tokens::{RefreshPolicy, TokenData, TokenLifetimeConfig, TokenStatus};
