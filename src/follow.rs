use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::cancel::{CancelToken, Canceller, cancellation};
use super::client::{self, Client, LogOptions};

type LineCallback = Box<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Box<dyn FnOnce(&client::Error) + Send + Sync>;

/// Tails the log stream of a single pod.
///
/// The degenerate sibling of the `Reflector`: same cancellation discipline,
/// but no store and no reconnection. When the stream fails, the follower is
/// done and the failure is reported once.
pub struct Follower {
    client: Client,
    namespace: String,
    pod: String,
    options: LogOptions,
    on_line: Option<LineCallback>,
    on_error: Option<ErrorCallback>,
}

impl Follower {
    pub fn new(client: Client, namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Follower {
            client,
            namespace: namespace.into(),
            pod: pod.into(),
            options: LogOptions {
                follow: true,
                ..Default::default()
            },
            on_line: None,
            on_error: None,
        }
    }

    pub fn with_options(mut self, options: LogOptions) -> Self {
        self.options = options;
        self
    }

    /// Invoked on the follower's task for every received line.
    pub fn on_line(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_line = Some(Box::new(callback));
        self
    }

    /// Invoked at most once, when the stream terminates abnormally.
    pub fn on_error(mut self, callback: impl FnOnce(&client::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Spawn the follower onto the runtime. Dropping the returned task
    /// handle cancels it.
    pub fn spawn(self) -> FollowTask {
        let (canceller, token) = cancellation();
        let handle = tokio::spawn(self.run(token));

        FollowTask { canceller, handle }
    }

    /// Drive the follower on the caller's task until the stream ends, fails
    /// or is cancelled. Cancellation and an orderly end of the stream are
    /// not errors.
    pub async fn run(mut self, token: CancelToken) -> Result<(), client::Error> {
        let result = self.run_inner(&token).await;

        if let Err(err) = &result {
            error!(message = "log follower terminated", %err);

            if let Some(callback) = self.on_error.take() {
                callback(err);
            }
        }

        result
    }

    async fn run_inner(&self, token: &CancelToken) -> Result<(), client::Error> {
        let result = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = self.client.pod_logs(&self.namespace, &self.pod, &self.options) => result,
        };
        let mut lines = result?;

        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                item = lines.next() => item,
            };

            match item {
                None => {
                    debug!(message = "log stream ended");
                    return Ok(());
                }
                Some(Ok(line)) => {
                    if let Some(callback) = &self.on_line {
                        callback(&line);
                    }
                }
                Some(Err(err)) => return Err(err),
            }
        }
    }
}

/// The handle of a spawned log follower. Dropping the handle cancels it.
pub struct FollowTask {
    canceller: Canceller,
    handle: JoinHandle<Result<(), client::Error>>,
}

impl FollowTask {
    /// Ask the task to stop. Idempotent.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the task to finish and return its terminal result.
    pub async fn join(self) -> Result<(), client::Error> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(()),
        }
    }
}
