mod file;
mod incluster;

use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InCluster(#[from] incluster::Error),

    #[error(transparent)]
    File(#[from] file::Error),
}

struct Inner {
    token: String,
    expire_at: Instant,
}

/// A bearer token re-read from its mounted file at most once a minute, so
/// rotated service-account credentials are picked up without restarting.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .finish()
    }
}

impl RefreshableToken {
    pub(crate) fn new(path: PathBuf) -> std::io::Result<Self> {
        let token = std::fs::read_to_string(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new(Inner {
                token,
                expire_at: Instant::now(),
            })),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if now > inner.expire_at {
            inner.token = std::fs::read_to_string(&self.path)?;
            inner.expire_at = now + Duration::from_secs(60);
        }

        Ok(inner.token.clone())
    }
}

/// Stores information to tell the cluster who you are.
#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req.headers_mut()
                    .typed_insert(Authorization::basic(username, password));
            }
            Auth::Bearer { token } => {
                req.headers_mut()
                    .typed_insert(Authorization::bearer(token).map_err(std::io::Error::other)?);
            }
            Auth::RefreshableToken(refreshable_token) => {
                let token = refreshable_token.token()?;
                req.headers_mut()
                    .typed_insert(Authorization::bearer(&token).map_err(std::io::Error::other)?);
            }
        }

        Ok(())
    }
}

/// Configuration object detailing cluster URL, default namespace, trust
/// material and credentials.
///
/// Prefer [`Config::load`] unless you have particular needs; it exists to be
/// consumed by the `Client`.
#[derive(Debug)]
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// The configured default namespace.
    pub default_namespace: String,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    pub tls: rustls::ClientConfig,
}

impl Config {
    /// Resolves a config from the environment: the kubeconfig in `$HOME`
    /// first, the in-cluster service account second.
    pub fn load() -> Result<Config, Error> {
        if let Ok(home) = std::env::var("HOME") {
            let path = format!("{}/.kube/config", home);
            if let Ok(config) = file::from_kubeconfig(path) {
                return Ok(config);
            }
        }

        incluster::from_environment().map_err(Into::into)
    }
}
