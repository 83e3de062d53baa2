use std::env;
use std::path::PathBuf;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use super::{Auth, Config, RefreshableToken};

const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";

// Mounted credential files
const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const SERVICE_DEFAULT_NS: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Errors from loading in-cluster config
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read the in-cluster environment variables
    #[error("failed to read an in-cluster environment variable {0}, {1}")]
    ReadEnvironmentVariable(&'static str, #[source] env::VarError),

    /// Failed to parse cluster port value
    #[error("failed to parse cluster port: {0}")]
    ParseClusterPort(#[source] std::num::ParseIntError),

    /// Failed to parse cluster url
    #[error("failed to parse cluster uri: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),

    /// Failed to read the default namespace for the service account
    #[error("failed to read the default namespace: {0}")]
    ReadDefaultNamespace(#[source] std::io::Error),

    /// Failed to read a certificate
    #[error("failed to read the certificate file: {0}")]
    ReadCertificate(#[source] std::io::Error),

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),

    #[error("failed to build a RootCertStore: {0}")]
    BuildRootCertStore(#[source] rustls::Error),

    /// Failed to read token file
    #[error("failed to read token file '{1:?}': {0}")]
    ReadTokenFile(#[source] std::io::Error, PathBuf),
}

/// Builds a [`Config`] from the environment a pod is started with: the
/// `KUBERNETES_SERVICE_*` variables plus the mounted service-account files.
pub fn from_environment() -> Result<Config, Error> {
    let cluster_url = api_server_uri()?;
    let default_namespace =
        std::fs::read_to_string(SERVICE_DEFAULT_NS).map_err(Error::ReadDefaultNamespace)?;
    let tls = load_tls()?;
    let token = RefreshableToken::new(PathBuf::from(SERVICE_TOKENFILE))
        .map_err(|err| Error::ReadTokenFile(err, SERVICE_TOKENFILE.into()))?;

    Ok(Config {
        cluster_url,
        default_namespace,
        auth: Auth::RefreshableToken(token),
        tls,
    })
}

/// Returns the URI of the API server by reading the `KUBERNETES_SERVICE_HOST`
/// and `KUBERNETES_SERVICE_PORT` environment variables.
fn api_server_uri() -> Result<http::Uri, Error> {
    let host = env::var(SERVICE_HOSTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_HOSTENV, err))?;
    let port = env::var(SERVICE_PORTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_PORTENV, err))?
        .parse::<u16>()
        .map_err(Error::ParseClusterPort)?;

    // Ensure that IPv6 addresses are properly bracketed, and only spell the
    // port out when it is not the https default.
    let uri = match host.parse::<std::net::IpAddr>() {
        Ok(ip) if ip.is_ipv6() => {
            if port == 443 {
                format!("https://[{ip}]")
            } else {
                format!("https://[{ip}]:{port}")
            }
        }
        _ => {
            if port == 443 {
                format!("https://{host}")
            } else {
                format!("https://{host}:{port}")
            }
        }
    };

    uri.parse().map_err(Error::ParseClusterUri)
}

/// Builds client TLS trusting the mounted cluster certificate.
fn load_tls() -> Result<ClientConfig, Error> {
    let data = std::fs::read(SERVICE_CERTFILE).map_err(Error::ReadCertificate)?;
    let certs = pem::parse_many(data)
        .map_err(Error::ParseCertificates)?
        .into_iter()
        .filter_map(|p| {
            if p.tag() == "CERTIFICATE" {
                Some(p.into_contents())
            } else {
                None
            }
        });

    let mut root_store = RootCertStore::empty();
    for cert in certs {
        root_store
            .add(CertificateDer::from(cert))
            .map_err(Error::BuildRootCertStore)?;
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}
