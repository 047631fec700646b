//! A token cache that refreshes ahead of expiry

use std::{
    error, fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tessera_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{
    sources::AsyncTokenSource, store::TokenStore, AccessToken, TokenData, TokenStatus,
};

/// How far the stale time of the current token is pushed out when a
/// background refresh starts
pub const DEFAULT_REFRESH_ADVANCE: DurationSecs = DurationSecs(60);

/// Caches the token of a source and decides when to go back to it
///
/// Callers never wait on the network while the cached token is valid:
///
/// * with no token, or an expired one, the caller fetches a new token and
///   waits for it; a failure is returned and nothing is cached
/// * with a stale token, the caller gets the cached token right away and at
///   most one background refresh is started; if that refresh fails the
///   cached token stays in place
/// * with a fresh token, the caller gets the cached token
///
/// Clones share the same cache.
pub struct TokenCache<S: AsyncTokenSource, C = System> {
    inner: Arc<Inner<S, C>>,
    refresh_advance: DurationSecs,
}

struct Inner<S: AsyncTokenSource, C> {
    source: S,
    store: TokenStore,
    state: Mutex<RefreshState<S::Error>>,
    // Held for the duration of any request to the source
    fetch_lock: tokio::sync::Mutex<()>,
    clock: C,
}

struct RefreshState<E> {
    in_flight: bool,
    last_error: Option<Arc<E>>,
}

impl<S: AsyncTokenSource> TokenCache<S, System> {
    /// Constructs an empty cache in front of `source`
    pub fn new(source: S) -> Self {
        Self::with_clock(source, System)
    }
}

impl<S: AsyncTokenSource, C> TokenCache<S, C> {
    /// Constructs an empty cache in front of `source` that reads time from `clock`
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store: TokenStore::new(),
                state: Mutex::new(RefreshState {
                    in_flight: false,
                    last_error: None,
                }),
                fetch_lock: tokio::sync::Mutex::new(()),
                clock,
            }),
            refresh_advance: DEFAULT_REFRESH_ADVANCE,
        }
    }

    /// Sets how far the stale time is pushed out when a background refresh starts
    ///
    /// Callers arriving while that refresh is pending see a fresh token and
    /// do not try to start another one.
    pub fn with_refresh_advance(mut self, refresh_advance: DurationSecs) -> Self {
        self.refresh_advance = refresh_advance;
        self
    }

    /// The source behind this cache
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// The currently cached token, without any validity check
    pub fn token_data(&self) -> Option<Arc<TokenData>> {
        self.inner.store.get()
    }

    /// The error of the last background refresh, if it failed
    ///
    /// Cleared once a later refresh succeeds.
    pub fn last_refresh_error(&self) -> Option<Arc<S::Error>> {
        self.inner.lock_state().last_error.clone()
    }

    /// Whether a background refresh is pending
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_state().in_flight
    }

    /// Overwrites the stale and expiry times of the cached token
    ///
    /// Returns `false` if nothing is cached yet.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_token_times(&self, stale: UnixTime, expiry: UnixTime) -> bool {
        let _state = self.inner.lock_state();
        match self.inner.store.get() {
            Some(token) => {
                self.inner.store.replace(token.with_times(stale, expiry));
                true
            }
            None => false,
        }
    }
}

impl<S: AsyncTokenSource, C: Clock> TokenCache<S, C> {
    /// The current time according to this cache's clock
    pub fn now(&self) -> UnixTime {
        self.inner.clock.now()
    }
}

impl<S, C> TokenCache<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Gets a valid access token
    pub async fn token(&self) -> Result<AccessToken, S::Error> {
        let token = self.valid_token_data().await?;
        Ok(token.access_token().to_owned())
    }

    /// Gets a valid token along with its lifetime information
    pub async fn valid_token_data(&self) -> Result<Arc<TokenData>, S::Error> {
        let now = self.inner.clock.now();

        match self.inner.store.get() {
            Some(token) => match token.token_status_at(now) {
                TokenStatus::Fresh => {
                    tracing::trace!(until_stale = token.until_stale_at(now).0, "using cached token");
                    return Ok(token);
                }
                TokenStatus::Stale => {
                    self.start_background_refresh(now);
                    return Ok(token);
                }
                TokenStatus::Expired => {
                    tracing::debug!(expiry = token.expiry().0, "cached token expired, fetching");
                }
            },
            None => tracing::debug!("no cached token, fetching"),
        }

        self.fetch_now().await
    }

    async fn fetch_now(&self) -> Result<Arc<TokenData>, S::Error> {
        let _fetch = self.inner.fetch_lock.lock().await;

        // Another caller may have stored a token while this one waited
        if let Some(token) = self.inner.store.get() {
            if token.token_status_with_clock(&self.inner.clock) != TokenStatus::Expired {
                tracing::trace!("token was refreshed while waiting");
                return Ok(token);
            }
        }

        let token = Arc::new(self.inner.source.request_token().await?);

        {
            let mut state = self.inner.lock_state();
            self.inner.store.replace(Arc::clone(&token));
            state.last_error = None;
        }

        tracing::info!(
            stale = token.stale().0,
            expiry = token.expiry().0,
            "stored new token"
        );

        Ok(token)
    }

    fn start_background_refresh(&self, now: UnixTime) {
        let mut state = self.inner.lock_state();

        let current = match self.inner.store.get() {
            Some(token) if token.token_status_at(now) == TokenStatus::Stale => token,
            _ => return,
        };

        if state.in_flight {
            tracing::trace!("background refresh already pending");
            return;
        }

        state.in_flight = true;

        let advanced = Arc::new(current.with_stale(now + self.refresh_advance));
        self.inner.store.replace(Arc::clone(&advanced));

        tracing::debug!(
            stale = current.stale().0,
            until_expired = current.until_expired_at(now).0,
            next_stale = advanced.stale().0,
            "token stale, refreshing in background"
        );

        // The claim is recorded; the flag is released by the guard however the task ends
        drop(state);
        let in_flight = InFlight(Arc::clone(&self.inner));
        tokio::spawn(in_flight.refresh(advanced));
    }
}

impl<S: AsyncTokenSource, C> Inner<S, C> {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState<S::Error>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the single-flight claim of a background refresh
///
/// Dropping it clears the claim, whether the refresh completed, panicked, or
/// its task was dropped along with the runtime.
struct InFlight<S: AsyncTokenSource, C>(Arc<Inner<S, C>>);

impl<S: AsyncTokenSource, C> InFlight<S, C> {
    async fn refresh(self, observed: Arc<TokenData>) {
        let inner = &self.0;
        let _fetch = inner.fetch_lock.lock().await;

        let superseded = inner
            .store
            .get()
            .map_or(false, |current| !Arc::ptr_eq(&current, &observed));

        if superseded {
            tracing::debug!("token replaced before background refresh ran");
            return;
        }

        let result = inner.source.request_token().await;

        let mut state = inner.lock_state();

        match result {
            Ok(token) => {
                tracing::info!(
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "stored new token from background refresh"
                );
                inner.store.replace(token);
                state.last_error = None;
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    expiry = observed.expiry().0,
                    "background refresh failed, keeping current token"
                );
                state.last_error = Some(Arc::new(error));
            }
        }
    }
}

impl<S: AsyncTokenSource, C> Drop for InFlight<S, C> {
    fn drop(&mut self) {
        self.0.lock_state().in_flight = false;
    }
}

impl<S: AsyncTokenSource, C> Clone for TokenCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            refresh_advance: self.refresh_advance,
        }
    }
}

impl<S, C> fmt::Debug for TokenCache<S, C>
where
    S: AsyncTokenSource + fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("TokenCache")
            .field("source", &self.inner.source)
            .field("store", &self.inner.store)
            .field("refresh_in_flight", &state.in_flight)
            .field("has_refresh_error", &state.last_error.is_some())
            .field("refresh_advance", &self.refresh_advance)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tessera_clock::TestClock;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{RefreshPolicy, RefreshToken, TokenLifetimeConfig, TokenRequestError};

    const START: UnixTime = UnixTime(1_700_000_000);

    /// Hands out `T1`, `T2`, … valid for two hours, counting each request
    struct CountingSource {
        calls: AtomicUsize,
        failures: Mutex<VecDeque<TokenRequestError>>,
        gate: Option<Arc<Semaphore>>,
        lifetime_config: TokenLifetimeConfig<TestClock>,
    }

    impl CountingSource {
        fn new(clock: &TestClock) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
                gate: None,
                lifetime_config: TokenLifetimeConfig::new(RefreshPolicy::LifetimeRatio(0.8))
                    .with_clock(clock.clone()),
            }
        }

        fn gated(clock: &TestClock, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(clock)
            }
        }

        fn fail_next(&self, error: TokenRequestError) {
            self.failures.lock().unwrap().push_back(error);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AsyncTokenSource for CountingSource {
        type Error = TokenRequestError;

        async fn request_token(&self) -> Result<TokenData, Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }

            Ok(self.lifetime_config.issue_token(
                format!("T{}", call),
                None::<RefreshToken>,
                DurationSecs(7200),
            ))
        }
    }

    fn rejected() -> TokenRequestError {
        TokenRequestError::Authentication {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: r#"{"errorCode":"BXNIM0415E"}"#.into(),
        }
    }

    fn cache_over(
        source: CountingSource,
        clock: &TestClock,
    ) -> TokenCache<Arc<CountingSource>, TestClock> {
        TokenCache::with_clock(Arc::new(source), clock.clone())
    }

    async fn wait_for_token<S, C>(cache: &TokenCache<S, C>, expected: &str)
    where
        S: AsyncTokenSource + 'static,
        C: Clock + Send + Sync + 'static,
    {
        for _ in 0..200 {
            let current = cache.token_data().map(|t| t.access_token().as_str().to_owned());
            if current.as_deref() == Some(expected) && !cache.is_refreshing() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("token never became {}", expected);
    }

    mod when_cache_is_empty {
        use super::*;

        #[tokio::test]
        async fn fetches_and_stores_a_token() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);

            let token = cache.token().await.unwrap();

            assert_eq!(token.as_str(), "T1");
            let data = cache.token_data().unwrap();
            assert_eq!(data.expiry(), START + DurationSecs(7200));
            assert_eq!(data.stale(), START + DurationSecs(5760));
            assert_eq!(cache.source().calls(), 1);
        }

        #[tokio::test]
        async fn failure_is_returned_and_nothing_is_cached() {
            let clock = TestClock::new(START);
            let source = CountingSource::new(&clock);
            source.fail_next(rejected());
            let cache = cache_over(source, &clock);

            let error = cache.token().await.unwrap_err();

            assert_eq!(error.status(), Some(reqwest::StatusCode::BAD_REQUEST));
            assert!(cache.token_data().is_none());
            assert!(cache.last_refresh_error().is_none());

            assert_eq!(cache.token().await.unwrap().as_str(), "T2");
        }
    }

    mod when_token_is_fresh {
        use super::*;

        #[tokio::test]
        async fn repeated_calls_reuse_the_cached_token() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);

            for _ in 0..5 {
                assert_eq!(cache.token().await.unwrap().as_str(), "T1");
                clock.inc(60);
            }

            assert_eq!(cache.source().calls(), 1);
            assert!(!cache.is_refreshing());
        }
    }

    mod when_token_is_expired {
        use super::*;

        #[tokio::test]
        async fn fetches_synchronously_and_never_returns_the_old_token() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);
            assert_eq!(cache.token().await.unwrap().as_str(), "T1");

            let now = clock.now();
            assert!(cache.set_token_times(now - DurationSecs(7200), now - DurationSecs(7200)));

            assert_eq!(cache.token().await.unwrap().as_str(), "T2");
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn clock_passing_expiry_forces_a_fetch() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);
            cache.token().await.unwrap();

            clock.inc(7200);

            assert_eq!(cache.token().await.unwrap().as_str(), "T2");
        }

        #[tokio::test]
        async fn failure_surfaces_and_keeps_nothing_new() {
            let clock = TestClock::new(START);
            let source = CountingSource::new(&clock);
            let cache = cache_over(source, &clock);
            cache.token().await.unwrap();

            clock.inc(7200);
            cache.source().fail_next(rejected());

            let error = cache.token().await.unwrap_err();
            assert!(error.is_authentication_failure());
            assert_eq!(cache.token_data().unwrap().access_token().as_str(), "T1");
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_callers_share_one_fetch() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Semaphore::new(0));
            let cache = cache_over(CountingSource::gated(&clock, Arc::clone(&gate)), &clock);

            let callers: Vec<_> = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    tokio::spawn(async move { cache.token().await })
                })
                .collect();

            gate.add_permits(1);

            for caller in callers {
                assert_eq!(caller.await.unwrap().unwrap().as_str(), "T1");
            }
            assert_eq!(cache.source().calls(), 1);
        }
    }

    mod when_token_is_stale {
        use super::*;

        #[tokio::test]
        async fn returns_cached_token_and_refreshes_in_background() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);
            cache.token().await.unwrap();

            let now = clock.now();
            cache.set_token_times(now - DurationSecs(720), now + DurationSecs(1800));

            assert_eq!(cache.token().await.unwrap().as_str(), "T1");

            wait_for_token(&cache, "T2").await;
            assert_eq!(cache.token().await.unwrap().as_str(), "T2");
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn stale_time_is_advanced_when_refresh_starts() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Semaphore::new(0));
            let cache = cache_over(CountingSource::gated(&clock, Arc::clone(&gate)), &clock);
            gate.add_permits(1);
            cache.token().await.unwrap();

            // Long idle period: stale time far in the past, still valid
            clock.inc(6000);
            let now = clock.now();
            cache.set_token_times(START, now + DurationSecs(1000));

            assert_eq!(cache.token().await.unwrap().as_str(), "T1");

            let data = cache.token_data().unwrap();
            assert_eq!(data.stale(), now + DEFAULT_REFRESH_ADVANCE);
            assert_eq!(data.token_status_at(now), TokenStatus::Fresh);
            assert!(cache.is_refreshing());

            assert_eq!(cache.token().await.unwrap().as_str(), "T1");

            gate.add_permits(1);
            wait_for_token(&cache, "T2").await;
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn advance_never_passes_expiry() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Semaphore::new(1));
            let cache = cache_over(CountingSource::gated(&clock, Arc::clone(&gate)), &clock);
            cache.token().await.unwrap();

            let now = clock.now();
            cache.set_token_times(now - DurationSecs(10), now + DurationSecs(5));

            cache.token().await.unwrap();

            let data = cache.token_data().unwrap();
            assert_eq!(data.stale(), data.expiry());
            gate.add_permits(1);
            wait_for_token(&cache, "T2").await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_callers_start_exactly_one_refresh() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Semaphore::new(1));
            let cache = cache_over(CountingSource::gated(&clock, Arc::clone(&gate)), &clock);
            cache.token().await.unwrap();

            let now = clock.now();
            cache.set_token_times(now - DurationSecs(1), now + DurationSecs(1800));

            let callers: Vec<_> = (0..32)
                .map(|_| {
                    let cache = cache.clone();
                    tokio::spawn(async move { cache.token().await })
                })
                .collect();

            for caller in callers {
                assert_eq!(caller.await.unwrap().unwrap().as_str(), "T1");
            }

            gate.add_permits(1);
            wait_for_token(&cache, "T2").await;
            assert_eq!(cache.source().calls(), 2);
        }

        #[test]
        fn dropped_refresh_task_releases_the_claim() {
            let clock = TestClock::new(START);
            let gate = Arc::new(Semaphore::new(1));
            let cache = cache_over(CountingSource::gated(&clock, Arc::clone(&gate)), &clock);

            let first = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            first.block_on(async {
                cache.token().await.unwrap();

                let now = clock.now();
                cache.set_token_times(now - DurationSecs(1), now + DurationSecs(1800));

                assert_eq!(cache.token().await.unwrap().as_str(), "T1");
                // Let the refresh reach the source, where it waits on the gate
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(cache.is_refreshing());
            });
            drop(first);

            assert!(!cache.is_refreshing());
            assert_eq!(cache.source().calls(), 2);

            let second = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            second.block_on(async {
                clock.inc(120);
                assert_eq!(
                    cache.token_data().unwrap().token_status_at(clock.now()),
                    TokenStatus::Stale
                );

                assert_eq!(cache.token().await.unwrap().as_str(), "T1");
                assert!(cache.is_refreshing());

                gate.add_permits(1);
                wait_for_token(&cache, "T3").await;
                assert_eq!(cache.source().calls(), 3);
            });
        }

        #[tokio::test]
        async fn failed_refresh_keeps_the_valid_token() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock)
                .with_refresh_advance(DurationSecs(0));
            cache.token().await.unwrap();

            let now = clock.now();
            cache.set_token_times(now - DurationSecs(1), now + DurationSecs(1800));
            cache.source().fail_next(rejected());

            assert_eq!(cache.token().await.unwrap().as_str(), "T1");
            wait_for_token(&cache, "T1").await;

            let error = cache.last_refresh_error().expect("background error recorded");
            assert_eq!(error.status(), Some(reqwest::StatusCode::BAD_REQUEST));
            assert_eq!(cache.token().await.unwrap().as_str(), "T1");

            wait_for_token(&cache, "T3").await;
            assert!(cache.last_refresh_error().is_none());
        }

        #[tokio::test]
        async fn failed_refresh_surfaces_once_the_token_expires() {
            let clock = TestClock::new(START);
            let cache = cache_over(CountingSource::new(&clock), &clock);
            cache.token().await.unwrap();

            let now = clock.now();
            cache.set_token_times(now - DurationSecs(1), now + DurationSecs(100));
            cache.source().fail_next(rejected());

            assert_eq!(cache.token().await.unwrap().as_str(), "T1");
            wait_for_token(&cache, "T1").await;
            assert!(cache.last_refresh_error().is_some());

            clock.inc(100);
            cache.source().fail_next(rejected());

            assert!(cache.token().await.unwrap_err().is_authentication_failure());
        }
    }
}
