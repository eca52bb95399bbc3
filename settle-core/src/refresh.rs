//! Refresh - The probe a poller drives
//!
//! A refresh function performs one remote status query and returns the latest
//! snapshot of the resource. It does no retrying of its own; that is the
//! poller's job.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use thiserror::Error;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed error cause carried by [`RefreshError::Failed`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One observation of a remote resource
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Latest observed representation, passed through untouched
    pub object: T,
    /// Status label as reported by the remote system
    pub state: String,
}

impl<T> Snapshot<T> {
    pub fn new(object: T, state: impl Into<String>) -> Self {
        Self {
            object,
            state: state.into(),
        }
    }

    pub fn into_object(self) -> T {
        self.object
    }
}

/// Error type for a single probe
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The remote system reports that the resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Transport or logic error from the probe itself
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
}

impl RefreshError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause; no-op on `NotFound`
    pub fn with_cause(self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        match self {
            Self::Failed { message, .. } => Self::Failed {
                message,
                cause: Some(Box::new(cause)),
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type RefreshResult<T> = Result<Snapshot<T>, RefreshError>;

/// A status probe for one remote resource
///
/// Implementations are called repeatedly and sequentially; duplicate calls
/// must be harmless.
pub trait Refresh: Send {
    /// Resource representation handed back to the caller
    type Object: Send;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<Self::Object>>;
}

impl<R: Refresh + ?Sized> Refresh for Box<R> {
    type Object = R::Object;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<Self::Object>> {
        (**self).refresh()
    }
}

impl<R: Refresh + ?Sized> Refresh for &mut R {
    type Object = R::Object;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<Self::Object>> {
        (**self).refresh()
    }
}

/// [`Refresh`] backed by an async closure, see [`refresh_fn`]
pub struct RefreshFn<F, T> {
    f: F,
    _object: PhantomData<fn() -> T>,
}

/// Wrap an async closure as a [`Refresh`]
///
/// ```
/// use settle_core::refresh::{refresh_fn, Snapshot};
///
/// let probe = refresh_fn(|| async { Ok(Snapshot::new((), "active")) });
/// # let _ = probe;
/// ```
pub fn refresh_fn<F, Fut, T>(f: F) -> RefreshFn<F, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = RefreshResult<T>> + Send + 'static,
    T: Send,
{
    RefreshFn {
        f,
        _object: PhantomData,
    }
}

impl<F, Fut, T> Refresh for RefreshFn<F, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = RefreshResult<T>> + Send + 'static,
    T: Send,
{
    type Object = T;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<T>> {
        Box::pin((self.f)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Mock probe for testing
    struct MockProbe {
        calls: usize,
    }

    impl Refresh for MockProbe {
        type Object = usize;

        fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<usize>> {
            self.calls += 1;
            let calls = self.calls;
            Box::pin(async move { Ok(Snapshot::new(calls, "active")) })
        }
    }

    #[tokio::test]
    async fn boxed_probe_delegates() {
        let mut probe: Box<dyn Refresh<Object = usize>> = Box::new(MockProbe { calls: 0 });
        assert_eq!(probe.refresh().await.unwrap().object, 1);
        assert_eq!(probe.refresh().await.unwrap().object, 2);
    }

    #[tokio::test]
    async fn refresh_fn_calls_closure_each_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut probe = refresh_fn(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Snapshot::new(n, "pending")) }
        });

        probe.refresh().await.unwrap();
        let snapshot = probe.refresh().await.unwrap();
        assert_eq!(snapshot.object, 1);
        assert_eq!(snapshot.state, "pending");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refresh_error_cause_and_display() {
        let io = std::io::Error::other("connection reset");
        let err = RefreshError::failed("get cluster").with_cause(io);
        assert_eq!(err.to_string(), "get cluster");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_not_found());

        let err = RefreshError::not_found("cluster c1").with_cause(std::io::Error::other("404"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "resource not found: cluster c1");
    }
}
