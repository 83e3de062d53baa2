use std::path::{Path, PathBuf};

use rustls::pki_types::pem::{self, SectionKind};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_native_certs::CertificateResult;
use serde::Deserialize;
use tracing::debug;

use super::{Auth, Config, RefreshableToken};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read kube config
    #[error("failed to read '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    /// Failed to parse kube config YAML
    #[error("failed to parse kube config YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// Failed to determine current context
    #[error("failed to determine current context")]
    CurrentContextNotSet,

    /// Failed to load current context
    #[error("failed to load current context: {0}")]
    LoadContext(String),

    /// Failed to load the cluster of context
    #[error("failed to load the cluster of context: {0}")]
    LoadClusterOfContext(String),

    /// Failed to find named user
    #[error("failed to find named user: {0}")]
    FindUser(String),

    /// Cluster url is missing on selected cluster
    #[error("cluster url is missing on selected cluster")]
    MissingClusterUrl,

    /// Failed to parse cluster uri
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),

    /// Certificate validation cannot be turned off
    #[error("insecure-skip-tls-verify is not supported")]
    InsecureCluster,

    /// Failed to decode inline base64 data
    #[error("failed to decode base64 data: {0}")]
    DecodeBase64(#[source] base64::DecodeError),

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] ::pem::PemError),

    /// Client identity PEM is invalid
    #[error("client identity PEM is invalid: {0}")]
    InvalidIdentityPem(#[source] pem::Error),

    /// Client identity is incomplete
    #[error("client identity needs both a certificate and a private key")]
    IncompleteIdentity,

    /// Invalid private key
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] rustls::Error),

    /// Failed to add a root certificate
    #[error("failed to add a root certificate: {0}")]
    AddRootCertificate(#[source] rustls::Error),

    /// Load native certificates failed
    #[error("load native certificates: {0:?}")]
    LoadNativeCertificates(Vec<rustls_native_certs::Error>),
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AuthInfo {
    /// The username for basic authentication to the kubernetes cluster.
    username: Option<String>,
    /// The password for basic authentication to the kubernetes cluster.
    password: Option<String>,

    /// The bearer token for authentication to the kubernetes cluster.
    token: Option<String>,
    /// Pointer to a file that contains a bearer token (as described above).
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,

    /// Path to a client cert file for TLS.
    #[serde(rename = "client-certificate")]
    client_certificate: Option<PathBuf>,
    /// PEM-encoded data from a client cert file for TLS. Overrides `client-certificate`.
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: Option<String>,

    /// Path to a client key file for TLS.
    #[serde(rename = "client-key")]
    client_key: Option<PathBuf>,
    /// PEM-encoded data from a client key file for TLS. Overrides `client-key`.
    #[serde(rename = "client-key-data")]
    client_key_data: Option<String>,
}

/// Cluster stores information to connect to a Kubernetes cluster.
#[derive(Clone, Deserialize)]
struct Cluster {
    /// The address of the kubernetes cluster (https://hostname:port).
    server: Option<String>,

    /// Skips the validity check for the server's certificate. This would
    /// make HTTPS connections insecure, and is rejected.
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,

    /// The path to a cert file for the certificate authority.
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<PathBuf>,

    /// PEM-encoded certificate authority certificates. Overrides `certificate-authority`.
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
}

#[derive(Clone, Deserialize)]
struct Context {
    /// Name of the cluster for this context.
    cluster: String,

    /// Name of the user for this context.
    user: String,

    /// The default namespace to use on unspecified requests.
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct Named<T> {
    name: String,

    #[serde(alias = "cluster", alias = "user", alias = "context")]
    value: Option<T>,
}

/// The on-disk format of `~/.kube/config`, reduced to the fields we need.
///
/// An analogue of the [config type from client-go](https://github.com/kubernetes/client-go/blob/master/tools/clientcmd/api/types.go).
#[derive(Deserialize)]
struct KubeConfig {
    clusters: Vec<Named<Cluster>>,

    #[serde(rename = "users")]
    auth_infos: Vec<Named<AuthInfo>>,

    contexts: Vec<Named<Context>>,

    /// The name of the context to use by default.
    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

fn select<T: Clone>(entries: &[Named<T>], name: &str) -> Option<T> {
    entries
        .iter()
        .find(|named| named.name == name)
        .and_then(|named| named.value.clone())
}

pub fn from_kubeconfig(path: impl AsRef<Path>) -> Result<Config, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|err| Error::ReadFile(err, path.into()))?;
    let config = serde_yaml::from_slice::<KubeConfig>(&data).map_err(Error::Parse)?;

    let context_name = config.current_context.ok_or(Error::CurrentContextNotSet)?;
    let context =
        select(&config.contexts, &context_name).ok_or(Error::LoadContext(context_name))?;
    let cluster = select(&config.clusters, &context.cluster)
        .ok_or_else(|| Error::LoadClusterOfContext(context.cluster.clone()))?;
    let auth_info =
        select(&config.auth_infos, &context.user).ok_or_else(|| Error::FindUser(context.user))?;

    if cluster.insecure_skip_tls_verify {
        return Err(Error::InsecureCluster);
    }

    let cluster_url = cluster
        .server
        .clone()
        .ok_or(Error::MissingClusterUrl)?
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUri)?;
    let default_namespace = context.namespace.unwrap_or_else(|| String::from("default"));

    let tls = build_tls(&cluster, &auth_info)?;

    let auth = if let (Some(username), Some(password)) = (auth_info.username, auth_info.password) {
        Auth::Basic { username, password }
    } else if let Some(path) = auth_info.token_file {
        let token = RefreshableToken::new(path.clone())
            .map_err(|err| Error::ReadFile(err, path))?;
        Auth::RefreshableToken(token)
    } else if let Some(token) = auth_info.token {
        Auth::Bearer { token }
    } else {
        Auth::None
    };

    Ok(Config {
        cluster_url,
        default_namespace,
        auth,
        tls,
    })
}

fn build_tls(cluster: &Cluster, auth_info: &AuthInfo) -> Result<ClientConfig, Error> {
    let roots = match pem_material(
        cluster.certificate_authority_data.as_deref(),
        cluster.certificate_authority.as_deref(),
    )? {
        Some(data) => custom_roots(&data)?,
        None => native_roots()?,
    };

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let cert = pem_material(
        auth_info.client_certificate_data.as_deref(),
        auth_info.client_certificate.as_deref(),
    )?;
    let key = pem_material(
        auth_info.client_key_data.as_deref(),
        auth_info.client_key.as_deref(),
    )?;

    match (cert, key) {
        (Some(cert), Some(key)) => {
            let mut identity = key;
            identity.extend_from_slice(&cert);
            let (chain, private_key) = client_identity(&identity)?;

            builder
                .with_client_auth_cert(chain, private_key)
                .map_err(Error::InvalidPrivateKey)
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(Error::IncompleteIdentity),
    }
}

/// Inline `*-data` fields hold base64-encoded PEM and win over their file
/// siblings, which hold plain PEM on disk.
fn pem_material(data: Option<&str>, file: Option<&Path>) -> Result<Option<Vec<u8>>, Error> {
    use base64::Engine;

    if let Some(data) = data {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(Error::DecodeBase64)?;
        return Ok(Some(decoded));
    }

    match file {
        Some(path) => {
            let data = std::fs::read(path).map_err(|err| Error::ReadFile(err, path.into()))?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

fn custom_roots(data: &[u8]) -> Result<RootCertStore, Error> {
    let certs = ::pem::parse_many(data)
        .map_err(Error::ParseCertificates)?
        .into_iter()
        .filter_map(|p| {
            if p.tag() == "CERTIFICATE" {
                Some(p.into_contents())
            } else {
                None
            }
        });

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(CertificateDer::from(cert))
            .map_err(Error::AddRootCertificate)?;
    }

    Ok(roots)
}

fn native_roots() -> Result<RootCertStore, Error> {
    let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
    if !errors.is_empty() {
        return Err(Error::LoadNativeCertificates(errors));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        if let Err(err) = roots.add(cert) {
            debug!(message = "skipping unparsable native certificate", %err);
        }
    }

    Ok(roots)
}

fn client_identity(
    data: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let mut chain = Vec::new();
    let mut private_key = None;
    let mut reader = std::io::Cursor::new(data);

    while let Some((kind, der)) = pem::from_buf(&mut reader).map_err(Error::InvalidIdentityPem)? {
        match kind {
            SectionKind::Certificate => chain.push(der.into()),
            SectionKind::PrivateKey => private_key = Some(PrivateKeyDer::Pkcs8(der.into())),
            SectionKind::RsaPrivateKey => private_key = Some(PrivateKeyDer::Pkcs1(der.into())),
            SectionKind::EcPrivateKey => private_key = Some(PrivateKeyDer::Sec1(der.into())),
            _ => {}
        }
    }

    match private_key {
        Some(key) if !chain.is_empty() => Ok((chain, key)),
        _ => Err(Error::IncompleteIdentity),
    }
}
