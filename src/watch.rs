//! Long-poll watch handle

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{Error, Result};
use crate::types::EtcdResult;

/// Options of a watch request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Wait for the first change at or after this index (`waitIndex`)
    pub wait_index: Option<u64>,
    /// Also report changes below the key (`recursive=true`)
    pub recursive: bool,
}

impl WatchOptions {
    /// Watch only the next change of the key itself
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `index`
    pub fn wait_index(mut self, index: u64) -> Self {
        self.wait_index = Some(index);
        self
    }

    /// Include changes below the key
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Query string for these options, starting with `?`
    pub fn query(&self) -> String {
        let mut query = String::from("?wait=true");
        if let Some(index) = self.wait_index {
            query.push_str(&format!("&waitIndex={}", index));
        }
        if self.recursive {
            query.push_str("&recursive=true");
        }
        query
    }
}

/// A watch already submitted to etcd.
///
/// Resolves once the server answers, which happens only after a matching
/// change. There is no local timeout; wrap it in `tokio::time::timeout` or
/// call [`Watch::abort`] to stop waiting. Dropping the handle aborts the
/// request.
///
/// The result is handed out once. Polling again after that resolves to
/// [`Error::Interrupted`].
#[derive(Debug)]
pub struct Watch {
    /// `None` once the result has been handed out
    handle: Option<JoinHandle<Result<EtcdResult>>>,
}

impl Watch {
    pub(crate) fn spawn<F>(runtime: &Handle, request: F) -> Self
    where
        F: Future<Output = Result<EtcdResult>> + Send + 'static,
    {
        Self {
            handle: Some(runtime.spawn(request)),
        }
    }

    /// Cancel the request. The watch then resolves to [`Error::Interrupted`].
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// True once the server answered or the request failed
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Future for Watch {
    type Output = Result<EtcdResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(handle) = self.handle.as_mut() else {
            return Poll::Ready(Err(Error::Interrupted(
                "watch result was already taken".to_string(),
            )));
        };
        let joined = ready!(Pin::new(handle).poll(cx));
        self.handle = None;
        Poll::Ready(joined.unwrap_or_else(|e| Err(join_error(e))))
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Map a failed join onto the error taxonomy. Panics are resumed.
pub(crate) fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    Error::Interrupted("request was cancelled before completion".to_string())
}
