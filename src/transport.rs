use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::config::HostSpec;
use crate::error::StompError;

/// Marker for the raw byte streams a connection can run over.
pub(crate) trait RawIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawIo for T {}

pub(crate) type BoxedStream = Box<dyn RawIo>;

/// Open a byte stream to one candidate broker, plain TCP or TLS per the
/// `HostSpec`. TLS certificates are verified against the webpki root set.
pub(crate) async fn open_stream(host: &HostSpec) -> Result<BoxedStream, StompError> {
    let tcp = TcpStream::connect((host.host.as_str(), host.port)).await?;
    if !host.ssl {
        return Ok(Box::new(tcp));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let name = ServerName::try_from(host.host.clone())
        .map_err(|_| StompError::Config(format!("invalid TLS server name: {:?}", host.host)))?;
    let tls = connector.connect(name, tcp).await?;
    Ok(Box::new(tls))
}
