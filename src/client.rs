use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{trace, warn};

use super::config::{self, Auth, Config};
use super::resource::{ObjectList, Resource};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(config::Error),

    #[error("build http request failed, {0}")]
    BuildRequest(http::Error),

    #[error("read http response failed, {0}")]
    ReadResponse(hyper::Error),

    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),

    #[error("invalid options, {0}")]
    Validation(String),

    #[error("api server error, status: {}, reason: {}, message: {}", .0.status, .0.reason, .0.message)]
    Api(Status),

    #[error("deserialize response failed, {0}")]
    Decode(serde_json::Error),

    #[error("read stream failed, {0}")]
    ReadStream(std::io::Error),

    #[error("stream line is too large")]
    LineTooLarge,

    #[error("refresh token failed, {0}")]
    RefreshToken(std::io::Error),
}

impl Error {
    /// True when the server reported HTTP 410 Gone, which means the resource
    /// version we tried to resume from has been compacted away and a full
    /// relist is required.
    pub fn is_expired(&self) -> bool {
        matches!(self, Error::Api(status) if status.code == 410)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err)
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::ReadResponse(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BuildRequest(err)
    }
}

/// A `Status` the API server returns when a call fails.
///
/// `status` and `code` are deliberately required: they are what tells a
/// `Status` apart from a line that merely failed to decode as an event.
#[derive(Debug, Deserialize)]
pub struct Status {
    /// "Failure" for the responses we get to see here.
    pub status: String,

    /// A human readable description of the error.
    #[serde(default)]
    pub message: String,

    /// A machine readable reason, e.g. "Expired" or "Forbidden".
    #[serde(default)]
    pub reason: String,

    /// The HTTP status code applicable to this status.
    pub code: u16,
}

/// Which objects a list or watch call targets.
#[derive(Clone, Debug)]
pub enum Scope {
    /// Objects of the resource in all namespaces (or a cluster-scoped
    /// resource).
    Cluster,

    /// Objects within a single namespace.
    Namespace(String),
}

impl Scope {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Scope::Cluster => None,
            Scope::Namespace(namespace) => Some(namespace),
        }
    }
}

/// Controls how the resource version parameter is applied to list calls.
///
/// See <https://kubernetes.io/docs/reference/using-api/api-concepts/#semantics-for-get-and-list> for details.
#[derive(Debug, PartialEq)]
pub enum VersionMatch {
    /// Returns data at least as new as the provided resource version. Used
    /// together with resource version "0" this means "any cached state is
    /// fine", which is the cheapest possible list for the server.
    NotOlderThan,

    /// Return data at the exact resource version provided. The server
    /// responds with HTTP 410 Gone if that version is unavailable.
    Exact,
}

/// Common query parameters used in list calls on collections.
#[derive(Debug, Default)]
pub struct ListOptions {
    /// A selector to restrict the list of returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict the list of returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the list call, regardless of any activity or inactivity.
    pub timeout: Option<u32>,

    /// Limit the number of results. If there are more results, the server
    /// will respond with a continue token.
    ///
    /// See [Kubernetes API docs](https://kubernetes.io/docs/reference/using-api/api-concepts/#retrieving-large-results-sets-in-chunks)
    pub limit: Option<u32>,

    /// Fetch a further page of results with the token from the previous
    /// page's `ListMeta`.
    pub continue_token: Option<String>,

    /// Determines how `resource_version` is applied to the list call.
    pub version_match: Option<VersionMatch>,

    /// An explicit resourceVersion, using the given `VersionMatch` strategy.
    pub resource_version: Option<String>,
}

/// Common query parameters used in watch calls on collections.
#[derive(Debug, Default)]
pub struct WatchOptions {
    /// A selector to restrict returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the watch call, regardless of any activity or inactivity.
    /// If unset we use 290s, and we refuse anything above 295s due to
    /// [inherent watch limitations](https://github.com/kubernetes/kubernetes/issues/6513).
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK", which let us keep the
    /// resume cursor fresh through quiet periods.
    pub bookmarks: bool,
}

/// Query parameters for pod log streams.
#[derive(Debug, Default)]
pub struct LogOptions {
    /// The container for which to stream logs. Defaults to the only
    /// container if there is one container in the pod.
    pub container: Option<String>,

    /// Follow the log stream of the pod.
    pub follow: bool,

    /// If set, the number of lines from the end of the logs to show.
    pub tail_lines: Option<i64>,

    /// A relative time in seconds before the current time from which to
    /// show logs.
    pub since_seconds: Option<i64>,

    /// Add an RFC3339 timestamp at the beginning of every line.
    pub timestamps: bool,
}

/// Can only be relied upon to have metadata with a resource version.
/// Bookmarks contain apiVersion + kind + basically empty metadata.
///
/// See https://kubernetes.io/docs/reference/using-api/api-concepts/#watch-bookmarks
#[derive(Debug, Deserialize)]
pub struct Bookmark {
    pub metadata: BookmarkMeta,
}

#[derive(Debug, Deserialize)]
pub struct BookmarkMeta {
    /// The only field we need from a bookmark event.
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,
}

/// A raw event returned from a watch query.
///
/// Note that a watch query returns many of these as newline separated JSON.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<K> {
    /// Resource was added
    Added(K),
    /// Resource was modified
    Modified(K),
    /// Resource was deleted
    Deleted(K),
    /// Resource bookmark. `Bookmark` is a slimmed down `K`.
    Bookmark(Bookmark),
    /// There was some kind of error
    Error(Status),
}

/// Version info of the API server.
#[derive(Debug, Deserialize)]
pub struct Version {
    /// Major version of the API server
    pub major: String,

    /// Minor version of the API server
    pub minor: String,

    #[serde(default)]
    pub platform: String,
}

#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
}

impl Client {
    /// Builds a client from the environment, see [`Config::load`].
    pub fn new() -> Result<Self, Error> {
        let config = Config::load().map_err(Error::Config)?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self, Error> {
        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http();
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = builder.enable_http1().wrap_connector(inner);

        let http_client =
            hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector);

        let endpoint = config.cluster_url.to_string();
        let endpoint = match endpoint.strip_suffix('/') {
            Some(stripped) => stripped.to_string(),
            None => endpoint,
        };

        Ok(Client {
            http_client,
            auth: config.auth,
            endpoint,
        })
    }

    /// Retrieve version info of the API server, so compatibility can be
    /// checked before relying on newer watch features.
    pub async fn server_version(&self) -> Result<Version, Error> {
        let uri = format!("{}/version", self.endpoint);
        self.fetch_json(uri).await
    }

    /// List a collection of a resource, one page at a time.
    pub async fn list<R: Resource>(
        &self,
        scope: &Scope,
        options: &ListOptions,
    ) -> Result<ObjectList<R>, Error> {
        if let Some(version) = &options.resource_version {
            if options.version_match == Some(VersionMatch::Exact) && version == "0" {
                return Err(Error::Validation(
                    "a non-zero resource_version is required when using an Exact match".into(),
                ));
            }
        } else if options.version_match.is_some() {
            return Err(Error::Validation(
                "a resource_version is required when using an explicit match".into(),
            ));
        }

        let query = {
            let mut builder = form_urlencoded::Serializer::new(String::new());

            if let Some(field_selector) = &options.field_selector {
                builder.append_pair("fieldSelector", field_selector);
            }
            if let Some(label_selector) = &options.label_selector {
                builder.append_pair("labelSelector", label_selector);
            }
            if let Some(timeout) = &options.timeout {
                builder.append_pair("timeoutSeconds", &timeout.to_string());
            }
            if let Some(limit) = &options.limit {
                builder.append_pair("limit", &limit.to_string());
            }

            if let Some(continue_token) = &options.continue_token {
                builder.append_pair("continue", continue_token);
            } else if let Some(version) = &options.resource_version {
                // When there's a continue token the server refuses an
                // explicit resourceVersion.
                if version != "0" || options.limit.is_none() {
                    builder.append_pair("resourceVersion", version);

                    match options.version_match {
                        None => {}
                        Some(VersionMatch::NotOlderThan) => {
                            builder.append_pair("resourceVersionMatch", "NotOlderThan");
                        }
                        Some(VersionMatch::Exact) => {
                            builder.append_pair("resourceVersionMatch", "Exact");
                        }
                    }
                }
            }

            builder.finish()
        };

        let uri = format!(
            "{}{}?{}",
            self.endpoint,
            R::url_path(scope.namespace()),
            query
        );

        self.fetch_json(uri).await
    }

    /// Open a watch stream for a resource, starting at `resource_version`.
    ///
    /// The returned stream produces decoded `WatchEvent`s and simply ends
    /// when the server closes the call (which it does routinely, see the
    /// timeout note on [`WatchOptions`]). Callers have to watch again to
    /// keep getting notified; the `Reflector` does exactly that.
    pub async fn watch<R: Resource + Send + 'static>(
        &self,
        scope: &Scope,
        options: &WatchOptions,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<R>, Error>>, Error> {
        if let Some(timeout) = options.timeout {
            if timeout >= 295 {
                return Err(Error::Validation("invalid timeout limit".into()));
            }
        }

        let query = {
            let mut builder = form_urlencoded::Serializer::new(String::new());

            builder.append_pair("watch", "true");
            builder.append_pair("resourceVersion", resource_version);
            // https://github.com/kubernetes/kubernetes/issues/6513
            builder.append_pair(
                "timeoutSeconds",
                options.timeout.unwrap_or(290).to_string().as_str(),
            );

            if let Some(label_selector) = &options.label_selector {
                builder.append_pair("labelSelector", label_selector);
            }
            if let Some(field_selector) = &options.field_selector {
                builder.append_pair("fieldSelector", field_selector);
            }
            if options.bookmarks {
                builder.append_pair("allowWatchBookmarks", "true");
            }

            builder.finish()
        };

        let uri = format!(
            "{}{}?{}",
            self.endpoint,
            R::url_path(scope.namespace()),
            query
        );

        let lines = self.request_lines(uri).await?;

        Ok(Box::pin(lines.filter_map(|result| async {
            let line = match result {
                Ok(line) => line,
                Err(err) => return Some(Err(err)),
            };

            match serde_json::from_str::<WatchEvent<R>>(&line) {
                Ok(event) => Some(Ok(event)),
                Err(err) => {
                    // Ignore EOF errors that happen for an incomplete line
                    // from `decode_eof`.
                    if err.is_eof() {
                        return None;
                    }

                    // The server sends a bare `Status` for call-level errors.
                    if let Ok(status) = serde_json::from_str::<Status>(&line) {
                        return Some(Err(Error::Api(status)));
                    }

                    Some(Err(Error::Decode(err)))
                }
            }
        })))
    }

    /// Stream the logs of a pod, line by line.
    pub async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        options: &LogOptions,
    ) -> Result<BoxStream<'static, Result<String, Error>>, Error> {
        let query = {
            let mut builder = form_urlencoded::Serializer::new(String::new());

            if let Some(container) = &options.container {
                builder.append_pair("container", container);
            }
            if options.follow {
                builder.append_pair("follow", "true");
            }
            if let Some(lines) = &options.tail_lines {
                builder.append_pair("tailLines", &lines.to_string());
            }
            if let Some(seconds) = &options.since_seconds {
                builder.append_pair("sinceSeconds", &seconds.to_string());
            }
            if options.timestamps {
                builder.append_pair("timestamps", "true");
            }

            builder.finish()
        };

        let uri = format!(
            "{}/api/v1/namespaces/{}/pods/{}/log?{}",
            self.endpoint, namespace, name, query
        );

        self.request_lines(uri).await
    }

    fn get_request(&self, uri: String) -> Result<Request<Full<Bytes>>, Error> {
        trace!(message = "doing http request", uri);

        let mut req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::<Bytes>::default())?;

        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        Ok(req)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, uri: String) -> Result<T, Error> {
        let req = self.get_request(uri)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.collect().await?.to_bytes();

        if !parts.status.is_success() {
            let status = serde_json::from_slice::<Status>(&body)?;
            return Err(Error::Api(status));
        }

        serde_json::from_slice(&body).map_err(Error::Decode)
    }

    /// Issue a request and frame the chunked response body into lines.
    async fn request_lines(
        &self,
        uri: String,
    ) -> Result<BoxStream<'static, Result<String, Error>>, Error> {
        let req = self.get_request(uri)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;

        if !resp.status().is_success() {
            let body = resp.into_body().collect().await?.to_bytes();
            let status = serde_json::from_slice::<Status>(&body)?;
            return Err(Error::Api(status));
        }

        let frames = FramedRead::new(
            StreamReader::new(resp.into_body().into_data_stream().map_err(|err| {
                // Unexpected EOF from the chunked decoder. Tends to happen
                // when watching for 300+s. This will be ignored below.
                if err.to_string().contains("unexpected EOF during check") {
                    return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err);
                }

                std::io::Error::other(err)
            })),
            LinesCodec::new(),
        );

        Ok(Box::pin(frames.filter_map(|result| async {
            match result {
                Ok(line) => Some(Ok(line)),
                Err(LinesCodecError::Io(err)) => match err.kind() {
                    // Our client timeout.
                    std::io::ErrorKind::TimedOut => {
                        warn!(message = "timeout in poll", %err);
                        None
                    }
                    // Unexpected EOF from the chunked decoder, after 300+s
                    // of watching.
                    std::io::ErrorKind::UnexpectedEof => {
                        warn!(message = "eof in poll", %err);
                        None
                    }
                    _ => Some(Err(Error::ReadStream(err))),
                },

                // Reached the maximum line length without finding a newline.
                // This should never happen because we're using the default
                // `usize::MAX`.
                Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(Error::LineTooLarge)),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        metadata: crate::resource::ObjectMeta,
    }

    impl crate::resource::Metadata for Probe {
        fn metadata(&self) -> &crate::resource::ObjectMeta {
            &self.metadata
        }
    }

    #[test]
    fn decode_watch_events() {
        let added = r#"{"type":"ADDED","object":{"metadata":{"name":"a","resourceVersion":"1"}}}"#;
        match serde_json::from_str::<WatchEvent<Probe>>(added).unwrap() {
            WatchEvent::Added(probe) => assert_eq!(probe.metadata.resource_version, "1"),
            _ => panic!("expected an ADDED event"),
        }

        let bookmark =
            r#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"42"}}}"#;
        match serde_json::from_str::<WatchEvent<Probe>>(bookmark).unwrap() {
            WatchEvent::Bookmark(bookmark) => {
                assert_eq!(bookmark.metadata.resource_version, "42")
            }
            _ => panic!("expected a BOOKMARK event"),
        }

        let error = r#"{"type":"ERROR","object":{"status":"Failure","reason":"Expired","code":410}}"#;
        match serde_json::from_str::<WatchEvent<Probe>>(error).unwrap() {
            WatchEvent::Error(status) => assert_eq!(status.code, 410),
            _ => panic!("expected an ERROR event"),
        }
    }

    #[test]
    fn expired_detection() {
        let expired = Error::Api(Status {
            status: "Failure".into(),
            message: String::new(),
            reason: "Expired".into(),
            code: 410,
        });
        assert!(expired.is_expired());

        let forbidden = Error::Api(Status {
            status: "Failure".into(),
            message: String::new(),
            reason: "Forbidden".into(),
            code: 403,
        });
        assert!(!forbidden.is_expired());
    }
}
