use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;

use crate::TokenData;

/// Holds the current token of one cache
///
/// Reads are lock-free loads of an `Arc`; replacing swaps the pointer, so a
/// reader sees either the previous token or the new one, never a mix.
#[derive(Default)]
pub struct TokenStore {
    current: ArcSwapOption<TokenData>,
}

impl TokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::const_empty(),
        }
    }

    /// Gets the current token, if one was ever stored
    #[inline]
    pub fn get(&self) -> Option<Arc<TokenData>> {
        self.current.load_full()
    }

    /// Makes `token` the current token
    #[inline]
    pub fn replace(&self, token: impl Into<Arc<TokenData>>) {
        self.current.store(Some(token.into()));
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("current", &self.current.load().as_deref())
            .finish()
    }
}
