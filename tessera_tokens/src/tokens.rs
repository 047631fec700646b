use serde::{Deserialize, Serialize};
use tessera_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// A token as returned by the authority with some additional lifetime information
///
/// Values are produced by a token source and are not modified afterwards, with
/// the exception of the `stale` and `expiry` instants, which only the token
/// cache rewrites.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenData {
    access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be refreshed
    Stale,
    /// The token is no longer valid
    Expired,
}

impl TokenData {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token, if the authority issued one
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the token's lifetime as declared by the authority
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    ///
    /// From this instant on, a replacement should be fetched in the background.
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }

    /// Copies this token with its stale time moved to `stale`, never past expiry
    pub(crate) fn with_stale(&self, stale: UnixTime) -> Self {
        Self {
            stale: stale.min(self.expiry),
            ..self.clone()
        }
    }

    pub(crate) fn without_refresh_token(self) -> Self {
        Self {
            refresh_token: None,
            ..self
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn with_times(&self, stale: UnixTime, expiry: UnixTime) -> Self {
        Self {
            stale,
            expiry,
            ..self.clone()
        }
    }
}

/// When a token stops being fresh
///
/// Authorities only report when a token expires. The policy decides how long
/// before that instant a replacement should start being fetched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RefreshPolicy {
    /// The token goes stale once this ratio of its lifetime has elapsed
    LifetimeRatio(f64),
    /// The token goes stale this long before it expires
    BeforeExpiry(DurationSecs),
}

impl Default for RefreshPolicy {
    /// Stale after 80% of the token's lifetime
    fn default() -> Self {
        RefreshPolicy::LifetimeRatio(0.8)
    }
}

impl RefreshPolicy {
    /// Computes the stale instant, clamped to `[issued, expiry]`
    pub fn stale_time(&self, issued: UnixTime, lifetime: DurationSecs, expiry: UnixTime) -> UnixTime {
        let window = match *self {
            RefreshPolicy::LifetimeRatio(ratio) => lifetime * (1.0 - ratio.clamp(0.0, 1.0)),
            RefreshPolicy::BeforeExpiry(window) => window,
        };
        (expiry - window).max(issued).min(expiry)
    }
}

/// Configuration for determining how long a token should be considered fresh
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    policy: RefreshPolicy,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses the default [`RefreshPolicy`] and the system clock.
    fn default() -> Self {
        Self::new(RefreshPolicy::default())
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration using the system clock
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            policy: self.policy,
            clock,
        }
    }

    /// The refresh policy applied to created tokens
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Constructs a token valid for `valid_duration` from now
    pub fn issue_token<A, R>(
        &self,
        access_token: A,
        refresh_token: Option<R>,
        valid_duration: DurationSecs,
    ) -> TokenData
    where
        A: Into<AccessToken>,
        R: Into<RefreshToken>,
    {
        let issued = self.clock.now();
        self.build(access_token, refresh_token, issued, valid_duration, issued + valid_duration)
    }

    /// Constructs a token from what the authority reported about its lifetime
    ///
    /// An absolute `expiration` reported by the authority wins over
    /// `issued + expires_in`. Returns `None` when neither is known.
    pub fn create_token<A, R>(
        &self,
        access_token: A,
        refresh_token: Option<R>,
        expires_in: Option<DurationSecs>,
        expiration: Option<UnixTime>,
    ) -> Option<TokenData>
    where
        A: Into<AccessToken>,
        R: Into<RefreshToken>,
    {
        let issued = self.clock.now();
        let (lifetime, expiry) = match (expires_in, expiration) {
            (Some(lifetime), Some(expiry)) => (lifetime, expiry),
            (Some(lifetime), None) => (lifetime, issued + lifetime),
            (None, Some(expiry)) => (expiry - issued, expiry),
            (None, None) => return None,
        };

        Some(self.build(access_token, refresh_token, issued, lifetime, expiry))
    }

    fn build<A, R>(
        &self,
        access_token: A,
        refresh_token: Option<R>,
        issued: UnixTime,
        lifetime: DurationSecs,
        expiry: UnixTime,
    ) -> TokenData
    where
        A: Into<AccessToken>,
        R: Into<RefreshToken>,
    {
        TokenData {
            access_token: access_token.into(),
            refresh_token: refresh_token.map(Into::into),
            lifetime,
            issued,
            stale: self.policy.stale_time(issued, lifetime, expiry),
            expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_clock::TestClock;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn config(policy: RefreshPolicy) -> TokenLifetimeConfig<TestClock> {
        TokenLifetimeConfig::new(policy).with_clock(TestClock::new(NOW))
    }

    #[test]
    fn lifetime_ratio_goes_stale_after_most_of_the_lifetime() {
        let token = config(RefreshPolicy::LifetimeRatio(0.8)).issue_token(
            "T1",
            None::<RefreshToken>,
            DurationSecs(3600),
        );

        assert_eq!(token.issued(), NOW);
        assert_eq!(token.expiry(), NOW + DurationSecs(3600));
        assert_eq!(token.stale(), NOW + DurationSecs(2880));
        assert_eq!(token.access_token().as_str(), "T1");
        assert!(token.refresh_token().is_none());
    }

    #[test]
    fn before_expiry_uses_a_fixed_window() {
        let token = config(RefreshPolicy::BeforeExpiry(DurationSecs(10)))
            .create_token("T1", None::<RefreshToken>, Some(DurationSecs(7200)), None)
            .unwrap();

        assert_eq!(token.stale(), token.expiry() - DurationSecs(10));
    }

    #[test]
    fn window_longer_than_the_lifetime_is_stale_at_issue() {
        let token = config(RefreshPolicy::BeforeExpiry(DurationSecs(600)))
            .create_token("T1", None::<RefreshToken>, Some(DurationSecs(60)), None)
            .unwrap();

        assert_eq!(token.stale(), NOW);
        assert!(token.stale() <= token.expiry());
    }

    #[test]
    fn server_expiration_wins_over_expires_in() {
        let expiration = NOW + DurationSecs(1000);
        let token = config(RefreshPolicy::LifetimeRatio(0.8))
            .create_token(
                "T1",
                Some("R1"),
                Some(DurationSecs(1200)),
                Some(expiration),
            )
            .unwrap();

        assert_eq!(token.expiry(), expiration);
        assert_eq!(token.stale(), expiration - DurationSecs(240));
        assert_eq!(token.refresh_token().map(|r| r.as_str()), Some("R1"));
    }

    #[test]
    fn lifetime_is_derived_from_a_bare_expiration() {
        let token = config(RefreshPolicy::LifetimeRatio(0.5))
            .create_token("T1", None::<RefreshToken>, None, Some(NOW + DurationSecs(100)))
            .unwrap();

        assert_eq!(token.lifetime(), DurationSecs(100));
        assert_eq!(token.stale(), NOW + DurationSecs(50));
    }

    #[test]
    fn no_lifetime_information_yields_nothing() {
        let token = config(RefreshPolicy::default()).create_token(
            "T1",
            None::<RefreshToken>,
            None,
            None,
        );
        assert!(token.is_none());
    }

    #[test]
    fn status_follows_stale_and_expiry() {
        let token = config(RefreshPolicy::BeforeExpiry(DurationSecs(60)))
            .create_token("T1", None::<RefreshToken>, Some(DurationSecs(600)), None)
            .unwrap();

        assert_eq!(token.token_status_at(NOW), TokenStatus::Fresh);
        assert_eq!(token.token_status_at(NOW + DurationSecs(540)), TokenStatus::Stale);
        assert_eq!(token.token_status_at(NOW + DurationSecs(600)), TokenStatus::Expired);
        assert_eq!(token.until_stale_at(NOW), DurationSecs(540));
        assert_eq!(token.until_expired_at(NOW + DurationSecs(700)), DurationSecs(0));
    }

    #[test]
    fn moving_stale_never_passes_expiry() {
        let token = config(RefreshPolicy::default())
            .create_token("T1", None::<RefreshToken>, Some(DurationSecs(100)), None)
            .unwrap();

        let moved = token.with_stale(NOW + DurationSecs(1_000));
        assert_eq!(moved.stale(), moved.expiry());
    }
}
