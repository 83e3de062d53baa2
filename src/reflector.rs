use std::future::Future;
use std::time::Duration;

use backoff::RetryPolicy;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::cancel::{CancelToken, Canceller, cancellation};
use super::client::{self, Client, ListOptions, Scope, VersionMatch, WatchEvent, WatchOptions};
use super::resource::{Metadata, ObjectList, Resource};
use super::store::{self, Store};

/// The stream of decoded events a [`WatchSource`] produces.
pub type EventStream<T> = BoxStream<'static, Result<WatchEvent<T>, client::Error>>;

/// The transport a reflector drives: list for a full sync, watch for the
/// change stream.
///
/// [`Client`] implements this for every [`Resource`]; tests substitute
/// scripted sources.
pub trait WatchSource<T>: Send + Sync {
    fn list(
        &self,
        scope: &Scope,
        options: &ListOptions,
    ) -> impl Future<Output = Result<ObjectList<T>, client::Error>> + Send;

    fn watch(
        &self,
        scope: &Scope,
        options: &WatchOptions,
        resource_version: &str,
    ) -> impl Future<Output = Result<EventStream<T>, client::Error>> + Send;
}

impl<R: Resource + Send + 'static> WatchSource<R> for Client {
    async fn list(
        &self,
        scope: &Scope,
        options: &ListOptions,
    ) -> Result<ObjectList<R>, client::Error> {
        Client::list(self, scope, options).await
    }

    async fn watch(
        &self,
        scope: &Scope,
        options: &WatchOptions,
        resource_version: &str,
    ) -> Result<EventStream<R>, client::Error> {
        Client::watch(self, scope, options, resource_version).await
    }
}

/// What happened to an object, as delivered to the event callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The retry budget is exhausted; the task is over. Transient failures
    /// below this are logged and retried, never surfaced.
    #[error("gave up watching after {attempts} failed attempts")]
    MaxRetriesReached { attempts: u32 },

    /// The store rejected an object. A data defect, never retried.
    #[error(transparent)]
    InvalidObject(#[from] store::Error),
}

type EventCallback<T> = Box<dyn Fn(EventType, &T) + Send + Sync>;
type ErrorCallback = Box<dyn FnOnce(&Error) + Send + Sync>;

/// One watch cycle: either a full relist or a watch segment.
enum Cycle {
    Cancelled,
    /// The cycle finished in an orderly fashion; resume from `version`,
    /// or relist when there is none.
    Continue { version: Option<String> },
    /// The cycle failed; retry per policy, resuming from `version` or
    /// relisting when the server declared our cursor expired.
    Failed { version: Option<String> },
}

/// Watches a resource and maintains a local representation of the remote
/// state. "Reflects" the remote state locally.
///
/// The reflector relists into the store whenever it holds no resume cursor,
/// then watches from that cursor, applying every event to the store and
/// invoking the event callback. Connection loss is retried per
/// [`RetryPolicy`]; a cursor the server has compacted away ("410 Gone")
/// triggers a fresh relist instead of a resume. The default policy retries
/// forever with jittered exponential backoff.
pub struct Reflector<T, S, W> {
    source: W,
    store: S,
    scope: Scope,
    label_selector: Option<String>,
    field_selector: Option<String>,
    retry: RetryPolicy,
    on_event: Option<EventCallback<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T, S, W> Reflector<T, S, W>
where
    T: Metadata + Clone + Send + 'static,
    S: Store<T> + Send + Sync + 'static,
    W: WatchSource<T> + 'static,
{
    pub fn new(source: W, store: S, scope: Scope) -> Self {
        Reflector {
            source,
            store,
            scope,
            label_selector: None,
            field_selector: None,
            retry: RetryPolicy::exponential(
                Duration::from_millis(500),
                2,
                Duration::from_secs(30),
            )
            .jitter(0.1),
            on_event: None,
            on_error: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    /// Invoked on the reflector's task for every event applied to the
    /// store, after the store mutation. A slow callback delays subsequent
    /// delivery but cannot corrupt the store.
    pub fn on_event(mut self, callback: impl Fn(EventType, &T) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Invoked at most once, when the task terminates abnormally.
    pub fn on_error(mut self, callback: impl FnOnce(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Spawn the reflector onto the runtime. Dropping the returned task
    /// handle cancels it.
    pub fn spawn(self) -> WatchTask {
        let (canceller, token) = cancellation();
        let handle = tokio::spawn(self.run(token));

        WatchTask { canceller, handle }
    }

    /// Drive the reflector on the caller's task until it is cancelled or
    /// terminally failed. Cancellation is not an error.
    pub async fn run(mut self, token: CancelToken) -> Result<(), Error> {
        let result = self.run_inner(&token).await;

        if let Err(err) = &result {
            error!(message = "reflector terminated", %err);

            if let Some(callback) = self.on_error.take() {
                callback(err);
            }
        }

        result
    }

    async fn run_inner(&self, token: &CancelToken) -> Result<(), Error> {
        let mut attempt = 0u32;
        let mut resource_version: Option<String> = None;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let cycle = match resource_version.take() {
                None => self.sync(token).await?,
                Some(version) => self.stream(token, version, &mut attempt).await?,
            };

            match cycle {
                Cycle::Cancelled => return Ok(()),
                Cycle::Continue { version } => {
                    attempt = 0;
                    resource_version = version;
                }
                Cycle::Failed { version } => {
                    attempt += 1;
                    let Some(delay) = self.retry.delay(attempt) else {
                        return Err(Error::MaxRetriesReached { attempts: attempt });
                    };

                    debug!(message = "stream interrupted, backing off", attempt, ?delay);

                    resource_version = version;
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Fetch the full current state page by page and replace the store's
    /// content with it.
    async fn sync(&self, token: &CancelToken) -> Result<Cycle, Error> {
        let mut options = ListOptions {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            limit: Some(500),
            resource_version: Some("0".to_string()),
            version_match: Some(VersionMatch::NotOlderThan),
            ..Default::default()
        };

        let mut objects = Vec::new();
        let version = loop {
            let result = tokio::select! {
                _ = token.cancelled() => return Ok(Cycle::Cancelled),
                result = self.source.list(&self.scope, &options) => result,
            };

            let page = match result {
                Ok(page) => page,
                Err(err) => {
                    warn!(message = "failed to list", %err);
                    return Ok(Cycle::Failed { version: None });
                }
            };

            objects.extend(page.items);

            match page.metadata.r#continue {
                Some(continuation) if !continuation.is_empty() => {
                    options.continue_token = Some(continuation);
                }
                _ => break page.metadata.resource_version.unwrap_or_default(),
            }
        };

        debug!(message = "full relist complete", count = objects.len(), %version);
        self.store.replace(objects, &version)?;

        Ok(Cycle::Continue {
            version: Some(version),
        })
    }

    /// Watch from `version` until the stream ends one way or another.
    async fn stream(
        &self,
        token: &CancelToken,
        version: String,
        attempt: &mut u32,
    ) -> Result<Cycle, Error> {
        let options = WatchOptions {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: None,
            bookmarks: true,
        };

        let result = tokio::select! {
            _ = token.cancelled() => return Ok(Cycle::Cancelled),
            result = self.source.watch(&self.scope, &options, &version) => result,
        };

        let mut events = match result {
            Ok(events) => events,
            Err(err) if err.is_expired() => {
                warn!(message = "resource version expired, relisting", %err);
                return Ok(Cycle::Failed { version: None });
            }
            Err(err) => {
                warn!(message = "failed to open watch stream", %err);
                return Ok(Cycle::Failed {
                    version: Some(version),
                });
            }
        };

        // the stream is open, the failure streak is over
        *attempt = 0;
        let mut version = version;

        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return Ok(Cycle::Cancelled),
                item = events.next() => item,
            };

            match item {
                // the server routinely closes watch calls after a timeout
                None => {
                    debug!(message = "watch stream ended", %version);
                    return Ok(Cycle::Failed {
                        version: Some(version),
                    });
                }
                Some(Ok(event)) => match event {
                    WatchEvent::Added(object) => {
                        self.apply(EventType::Added, object, &mut version, attempt)?
                    }
                    WatchEvent::Modified(object) => {
                        self.apply(EventType::Modified, object, &mut version, attempt)?
                    }
                    WatchEvent::Deleted(object) => {
                        self.apply(EventType::Deleted, object, &mut version, attempt)?
                    }
                    WatchEvent::Bookmark(bookmark) => {
                        // a version-only heartbeat, nothing to store or deliver
                        version = bookmark.metadata.resource_version;
                    }
                    WatchEvent::Error(status) => {
                        if status.code == 410 {
                            warn!(
                                message = "resource version expired, relisting",
                                reason = %status.reason
                            );
                            return Ok(Cycle::Failed { version: None });
                        }

                        warn!(
                            message = "watch produced an error event",
                            code = status.code,
                            reason = %status.reason
                        );
                        return Ok(Cycle::Failed {
                            version: Some(version),
                        });
                    }
                },
                Some(Err(err)) if err.is_expired() => {
                    warn!(message = "resource version expired, relisting", %err);
                    return Ok(Cycle::Failed { version: None });
                }
                Some(Err(err)) => {
                    warn!(message = "watch stream failed", %err);
                    return Ok(Cycle::Failed {
                        version: Some(version),
                    });
                }
            }
        }
    }

    fn apply(
        &self,
        event_type: EventType,
        object: T,
        version: &mut String,
        attempt: &mut u32,
    ) -> Result<(), store::Error> {
        let observed = &object.metadata().resource_version;
        if !observed.is_empty() {
            *version = observed.clone();
        }

        match event_type {
            EventType::Deleted => {
                self.store.delete(&object)?;
                if let Some(callback) = &self.on_event {
                    callback(event_type, &object);
                }
            }
            _ => match &self.on_event {
                Some(callback) => {
                    self.store.update(object.clone())?;
                    callback(event_type, &object);
                }
                None => self.store.update(object)?,
            },
        }

        *attempt = 0;
        Ok(())
    }
}

/// The handle of a spawned reflector.
///
/// Dropping the handle cancels the task; hold on to it for as long as the
/// mirror should stay fresh.
pub struct WatchTask {
    canceller: Canceller,
    handle: JoinHandle<Result<(), Error>>,
}

impl WatchTask {
    /// Ask the task to stop. Idempotent; an in-flight connect, read or
    /// backoff sleep is abandoned promptly rather than waited out.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the task to finish and return its terminal result.
    /// Cancellation finishes with `Ok(())`.
    pub async fn join(self) -> Result<(), Error> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
