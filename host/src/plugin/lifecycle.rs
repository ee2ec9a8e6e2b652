//! Lifespan Composition
//!
//! The host and each extension may contribute a lifespan: an async scope
//! entered once before the server accepts requests and exited once after it
//! stops. [`CombinedLifespan`] turns an ordered list of contributors into a
//! single scope.
//!
//! # Ordering
//!
//! ```text
//!   enter:  host -> ext_1 -> ext_2 -> ... -> ext_n
//!   serve
//!   exit:   ext_n -> ... -> ext_2 -> ext_1 -> host
//! ```
//!
//! If contributor `k` fails to enter, contributors `1..k-1` are exited in
//! reverse and the failure is returned. Exit attempts every contributor that
//! was entered, even when earlier exits fail or panic, and reports all
//! failures together.
//!
//! Timeouts are not part of the combinator. Wrap individual contributors
//! with [`LifespanExt::with_timeout`] instead.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::{Duration, Instant};

use super::error::{
    BoxError, ContributorFailure, LifespanEnterError, LifespanExitError, LifespanStartupError,
    LifespanTimeout,
};
use super::isolation::call_plugin_async;

/// An async startup/shutdown scope
///
/// `enter` runs before the server accepts requests and `exit` after it
/// stops. `exit` is only called if `enter` succeeded.
#[async_trait]
pub trait Lifespan: Send {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    /// Acquire resources
    async fn enter(&mut self) -> Result<(), BoxError>;

    /// Release resources
    async fn exit(&mut self) -> Result<(), BoxError>;
}

#[async_trait]
impl Lifespan for Box<dyn Lifespan> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn enter(&mut self) -> Result<(), BoxError> {
        (**self).enter().await
    }

    async fn exit(&mut self) -> Result<(), BoxError> {
        (**self).exit().await
    }
}

type PhaseFn = Box<dyn FnMut() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A lifespan built from a pair of closures
///
/// # Example
///
/// ```ignore
/// let started = Arc::new(AtomicBool::new(false));
/// let (on, off) = (started.clone(), started.clone());
/// let lifespan = LifespanFn::new(
///     "flag",
///     move || { let on = on.clone(); async move { on.store(true, Ordering::SeqCst); Ok(()) } },
///     move || { let off = off.clone(); async move { off.store(false, Ordering::SeqCst); Ok(()) } },
/// );
/// ```
pub struct LifespanFn {
    name: String,
    enter: PhaseFn,
    exit: PhaseFn,
}

impl LifespanFn {
    pub fn new<E, EF, X, XF>(name: impl Into<String>, mut enter: E, mut exit: X) -> Self
    where
        E: FnMut() -> EF + Send + 'static,
        EF: Future<Output = Result<(), BoxError>> + Send + 'static,
        X: FnMut() -> XF + Send + 'static,
        XF: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            enter: Box::new(move || Box::pin(enter())),
            exit: Box::new(move || Box::pin(exit())),
        }
    }

    /// A lifespan that only does work on enter
    pub fn on_enter<E, EF>(name: impl Into<String>, enter: E) -> Self
    where
        E: FnMut() -> EF + Send + 'static,
        EF: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(name, enter, || async { Ok::<(), BoxError>(()) })
    }
}

#[async_trait]
impl Lifespan for LifespanFn {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enter(&mut self) -> Result<(), BoxError> {
        (self.enter)().await
    }

    async fn exit(&mut self) -> Result<(), BoxError> {
        (self.exit)().await
    }
}

/// Bounds a contributor's phases with a timeout
///
/// A phase that runs out of time is dropped and reported as
/// [`LifespanTimeout`]. Ordering inside the combinator is unchanged.
pub struct WithTimeout<L> {
    inner: L,
    enter_timeout: Option<Duration>,
    exit_timeout: Option<Duration>,
}

impl<L: Lifespan> WithTimeout<L> {
    pub fn new(inner: L, enter_timeout: Option<Duration>, exit_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            enter_timeout,
            exit_timeout,
        }
    }
}

async fn bounded<F>(name: &str, phase: &'static str, limit: Option<Duration>, fut: F) -> Result<(), BoxError>
where
    F: Future<Output = Result<(), BoxError>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };
    let started = Instant::now();
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout = LifespanTimeout {
                contributor: name.to_string(),
                phase,
                elapsed_ms: started.elapsed().as_millis(),
            };
            tracing::warn!(lifespan = %name, phase = phase, "Lifespan phase timed out");
            Err(Box::new(timeout))
        }
    }
}

#[async_trait]
impl<L: Lifespan> Lifespan for WithTimeout<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn enter(&mut self) -> Result<(), BoxError> {
        let name = self.inner.name().to_string();
        bounded(&name, "enter", self.enter_timeout, self.inner.enter()).await
    }

    async fn exit(&mut self) -> Result<(), BoxError> {
        let name = self.inner.name().to_string();
        bounded(&name, "exit", self.exit_timeout, self.inner.exit()).await
    }
}

/// Convenience adapters for any [`Lifespan`]
pub trait LifespanExt: Lifespan + Sized {
    /// Bound both phases by `limit`
    fn with_timeout(self, limit: Duration) -> WithTimeout<Self> {
        WithTimeout::new(self, Some(limit), Some(limit))
    }

    fn boxed(self) -> Box<dyn Lifespan>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<L: Lifespan> LifespanExt for L {}

/// Ordered composition of lifespans into one scope
///
/// Contributors are entered in the order they were added and exited in
/// reverse. Contributors added after the scope was entered are neither
/// entered nor exited by it.
pub struct CombinedLifespan {
    name: String,
    contributors: Vec<Box<dyn Lifespan>>,
    /// Length of the entered prefix of `contributors`
    entered: usize,
    active: bool,
}

impl CombinedLifespan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contributors: Vec::new(),
            entered: 0,
            active: false,
        }
    }

    /// Build from an already ordered list
    pub fn from_contributors(name: impl Into<String>, contributors: Vec<Box<dyn Lifespan>>) -> Self {
        Self {
            contributors,
            ..Self::new(name)
        }
    }

    pub fn push(&mut self, contributor: Box<dyn Lifespan>) {
        if self.active {
            tracing::warn!(
                lifespan = %contributor.name(),
                scope = %self.name,
                "Lifespan added after scope was entered; it will not run"
            );
        }
        self.contributors.push(contributor);
    }

    pub fn with(mut self, contributor: impl Lifespan + 'static) -> Self {
        self.push(Box::new(contributor));
        self
    }

    /// Contributor names in entry order
    pub fn names(&self) -> Vec<String> {
        self.contributors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.contributors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributors.is_empty()
    }

    /// Whether the scope is currently entered
    pub fn is_entered(&self) -> bool {
        self.active
    }

    /// Enter every contributor in order
    ///
    /// Entering an already entered scope is a no-op.
    pub async fn enter(&mut self) -> Result<(), LifespanEnterError> {
        if self.active {
            tracing::debug!(scope = %self.name, "Lifespan scope already entered");
            return Ok(());
        }

        while self.entered < self.contributors.len() {
            let idx = self.entered;
            let result = call_plugin_async(self.contributors[idx].enter()).await;
            self.settle_enter(idx, result).await?;
        }

        self.finish_enter();
        Ok(())
    }

    /// Enter every contributor in order, abandoning startup if `shutdown`
    /// completes first
    ///
    /// On cancellation the in-flight enter is dropped and everything
    /// already entered is exited in reverse.
    pub async fn enter_until<S>(&mut self, shutdown: S) -> Result<(), LifespanStartupError>
    where
        S: Future<Output = ()>,
    {
        if self.active {
            tracing::debug!(scope = %self.name, "Lifespan scope already entered");
            return Ok(());
        }

        tokio::pin!(shutdown);

        while self.entered < self.contributors.len() {
            let idx = self.entered;
            let step = {
                let contributor = &mut self.contributors[idx];
                tokio::select! {
                    biased;
                    _ = &mut shutdown => None,
                    result = call_plugin_async(contributor.enter()) => Some(result),
                }
            };

            match step {
                Some(result) => self.settle_enter(idx, result).await?,
                None => {
                    let entered = self.entered;
                    tracing::warn!(
                        scope = %self.name,
                        entered = entered,
                        "Shutdown requested during startup, unwinding lifespans"
                    );
                    let unwind_failures = self.unwind().await;
                    return Err(LifespanStartupError::Cancelled {
                        entered,
                        unwind_failures,
                    });
                }
            }
        }

        self.finish_enter();
        Ok(())
    }

    /// Exit every entered contributor in reverse order
    ///
    /// Every exit is attempted. Exiting a scope that is not entered is a
    /// no-op.
    pub async fn exit(&mut self) -> Result<(), LifespanExitError> {
        if self.entered == 0 {
            self.active = false;
            return Ok(());
        }

        let failures = self.unwind().await;
        if failures.is_empty() {
            tracing::info!(scope = %self.name, "All lifespans exited");
            Ok(())
        } else {
            Err(LifespanExitError { failures })
        }
    }

    async fn settle_enter(
        &mut self,
        idx: usize,
        result: Result<Result<(), BoxError>, String>,
    ) -> Result<(), LifespanEnterError> {
        let name = self.contributors[idx].name().to_string();
        let error: BoxError = match result {
            Ok(Ok(())) => {
                self.entered += 1;
                tracing::debug!(lifespan = %name, position = idx, "Lifespan entered");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(panic) => format!("panicked: {}", panic).into(),
        };

        tracing::error!(
            lifespan = %name,
            position = idx,
            error = %error,
            "Lifespan failed to start, unwinding"
        );
        let unwind_failures = self.unwind().await;
        Err(LifespanEnterError {
            contributor: name,
            source: error,
            unwind_failures,
        })
    }

    fn finish_enter(&mut self) {
        self.active = true;
        tracing::info!(
            scope = %self.name,
            count = self.entered,
            "All lifespans entered"
        );
    }

    /// Exit the entered prefix in reverse, collecting every failure
    async fn unwind(&mut self) -> Vec<ContributorFailure> {
        let mut failures = Vec::new();

        while self.entered > 0 {
            self.entered -= 1;
            let idx = self.entered;
            let name = self.contributors[idx].name().to_string();

            match call_plugin_async(self.contributors[idx].exit()).await {
                Ok(Ok(())) => {
                    tracing::debug!(lifespan = %name, position = idx, "Lifespan exited");
                }
                Ok(Err(error)) => {
                    tracing::warn!(lifespan = %name, error = %error, "Lifespan failed to exit");
                    failures.push(ContributorFailure {
                        contributor: name,
                        error,
                    });
                }
                Err(panic) => {
                    tracing::warn!(lifespan = %name, message = %panic, "Lifespan panicked on exit");
                    failures.push(ContributorFailure {
                        contributor: name,
                        error: format!("panicked: {}", panic).into(),
                    });
                }
            }
        }

        self.active = false;
        failures
    }
}

#[async_trait]
impl Lifespan for CombinedLifespan {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enter(&mut self) -> Result<(), BoxError> {
        CombinedLifespan::enter(self).await.map_err(Into::into)
    }

    async fn exit(&mut self) -> Result<(), BoxError> {
        CombinedLifespan::exit(self).await.map_err(Into::into)
    }
}

impl std::fmt::Debug for CombinedLifespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedLifespan")
            .field("name", &self.name)
            .field("contributors", &self.names())
            .field("entered", &self.entered)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy, PartialEq)]
    enum Fault {
        None,
        Enter,
        Exit,
        PanicExit,
        HangEnter,
    }

    struct Probe {
        name: String,
        log: Log,
        fault: Fault,
    }

    fn scripted(name: &str, log: &Log, fault: Fault) -> Box<dyn Lifespan> {
        Box::new(Probe {
            name: name.to_string(),
            log: log.clone(),
            fault,
        })
    }

    #[async_trait]
    impl Lifespan for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn enter(&mut self) -> Result<(), BoxError> {
            match self.fault {
                Fault::Enter => return Err(format!("{} refused", self.name).into()),
                Fault::HangEnter => std::future::pending::<()>().await,
                _ => {}
            }
            self.log.lock().push(format!("enter:{}", self.name));
            Ok(())
        }

        async fn exit(&mut self) -> Result<(), BoxError> {
            self.log.lock().push(format!("exit:{}", self.name));
            match self.fault {
                Fault::Exit => Err(format!("{} stuck", self.name).into()),
                Fault::PanicExit => panic!("{} exploded", self.name),
                _ => Ok(()),
            }
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_exit_order_is_reverse_of_enter() {
        let log: Log = Arc::default();
        let mut combined = CombinedLifespan::from_contributors(
            "app",
            vec![
                scripted("host", &log, Fault::None),
                scripted("a", &log, Fault::None),
                scripted("b", &log, Fault::None),
            ],
        );

        combined.enter().await.unwrap();
        assert!(combined.is_entered());
        combined.exit().await.unwrap();
        assert!(!combined.is_entered());

        assert_eq!(
            entries(&log),
            vec!["enter:host", "enter:a", "enter:b", "exit:b", "exit:a", "exit:host"]
        );
    }

    #[tokio::test]
    async fn test_enter_failure_unwinds_prefix_in_reverse() {
        let log: Log = Arc::default();
        let mut combined = CombinedLifespan::from_contributors(
            "app",
            vec![
                scripted("one", &log, Fault::None),
                scripted("two", &log, Fault::None),
                scripted("three", &log, Fault::Enter),
                scripted("four", &log, Fault::None),
            ],
        );

        let err = combined.enter().await.unwrap_err();
        assert_eq!(err.contributor, "three");
        assert!(err.unwind_failures.is_empty());
        assert!(!combined.is_entered());
        assert_eq!(
            entries(&log),
            vec!["enter:one", "enter:two", "exit:two", "exit:one"]
        );
    }

    #[tokio::test]
    async fn test_second_enter_is_noop() {
        let log: Log = Arc::default();
        let mut combined =
            CombinedLifespan::from_contributors("app", vec![scripted("only", &log, Fault::None)]);

        combined.enter().await.unwrap();
        combined.enter().await.unwrap();
        combined.exit().await.unwrap();

        assert_eq!(entries(&log), vec!["enter:only", "exit:only"]);
    }

    #[tokio::test]
    async fn test_zero_contributors() {
        let mut combined = CombinedLifespan::new("empty");
        assert!(combined.is_empty());
        combined.enter().await.unwrap();
        assert!(combined.is_entered());
        combined.exit().await.unwrap();
        assert!(!combined.is_entered());
    }

    #[tokio::test]
    async fn test_exit_attempts_everything_and_collects_failures() {
        let log: Log = Arc::default();
        let mut combined = CombinedLifespan::from_contributors(
            "app",
            vec![
                scripted("host", &log, Fault::None),
                scripted("db", &log, Fault::Exit),
                scripted("cache", &log, Fault::PanicExit),
            ],
        );

        combined.enter().await.unwrap();
        let err = combined.exit().await.unwrap_err();

        assert_eq!(entries(&log)[3..], ["exit:cache", "exit:db", "exit:host"]);
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].contributor, "cache");
        assert!(err.failures[0].error.to_string().contains("cache exploded"));
        assert_eq!(err.failures[1].contributor, "db");
    }

    #[tokio::test]
    async fn test_exit_without_enter_is_noop() {
        let log: Log = Arc::default();
        let mut combined =
            CombinedLifespan::from_contributors("app", vec![scripted("a", &log, Fault::None)]);
        combined.exit().await.unwrap();
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_enter_until_cancels_and_unwinds() {
        let log: Log = Arc::default();
        let mut combined = CombinedLifespan::from_contributors(
            "app",
            vec![
                scripted("host", &log, Fault::None),
                scripted("slow", &log, Fault::HangEnter),
                scripted("never", &log, Fault::None),
            ],
        );

        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        let err = combined.enter_until(shutdown).await.unwrap_err();

        match err {
            LifespanStartupError::Cancelled {
                entered,
                unwind_failures,
            } => {
                assert_eq!(entered, 1);
                assert!(unwind_failures.is_empty());
            }
            other => panic!("expected cancellation, got {other}"),
        }
        assert_eq!(entries(&log), vec!["enter:host", "exit:host"]);
        assert!(!combined.is_entered());
    }

    #[tokio::test]
    async fn test_enter_until_completes_when_no_shutdown() {
        let log: Log = Arc::default();
        let mut combined =
            CombinedLifespan::from_contributors("app", vec![scripted("a", &log, Fault::None)]);

        combined
            .enter_until(std::future::pending::<()>())
            .await
            .unwrap();
        assert!(combined.is_entered());
        combined.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_reports_timeout() {
        let log: Log = Arc::default();
        let slow = Probe {
            name: "slow".to_string(),
            log: log.clone(),
            fault: Fault::HangEnter,
        };
        let mut combined =
            CombinedLifespan::new("app").with(slow.with_timeout(Duration::from_millis(10)));

        let err = combined.enter().await.unwrap_err();
        assert_eq!(err.contributor, "slow");
        let timeout = err.source.downcast_ref::<LifespanTimeout>().unwrap();
        assert_eq!(timeout.phase, "enter");
    }

    #[tokio::test]
    async fn test_lifespan_fn_and_nesting() {
        let log: Log = Arc::default();
        let (on, off) = (log.clone(), log.clone());
        let flag = LifespanFn::new(
            "flag",
            move || {
                let on = on.clone();
                async move {
                    on.lock().push("enter:flag".to_string());
                    Ok::<(), BoxError>(())
                }
            },
            move || {
                let off = off.clone();
                async move {
                    off.lock().push("exit:flag".to_string());
                    Ok::<(), BoxError>(())
                }
            },
        );

        let inner = CombinedLifespan::new("inner")
            .with(flag)
            .with(Probe {
                name: "x".to_string(),
                log: log.clone(),
                fault: Fault::None,
            });
        let mut outer = CombinedLifespan::from_contributors("outer", vec![scripted("host", &log, Fault::None)])
            .with(inner);

        assert_eq!(outer.names(), vec!["host", "inner"]);
        outer.enter().await.unwrap();
        outer.exit().await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "enter:host",
                "enter:flag",
                "enter:x",
                "exit:x",
                "exit:flag",
                "exit:host"
            ]
        );
    }
}
