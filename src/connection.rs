//! Internal module for establishing connections to IMAP servers.
//!
//! Supports implicit TLS (IMAPS) and plain TCP.

use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// Byte stream an IMAP session runs over.
pub(crate) trait ImapTransport: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug {}

impl<T> ImapTransport for T where T: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug {}

/// Either a TLS or a plain stream.
pub(crate) type ImapStream = Box<dyn ImapTransport>;

/// A TLS stream over TCP.
type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Connects to `target_addr`, wrapping the stream in TLS when `use_tls` is set.
#[instrument(
    name = "connection::establish",
    skip_all,
    fields(host = %host, target_addr = %target_addr, use_tls)
)]
pub(crate) async fn establish(host: &str, target_addr: &str, use_tls: bool) -> Result<ImapStream> {
    let tcp_stream = connect_direct(target_addr).await?;

    if use_tls {
        let tls_stream = establish_tls(host, target_addr, tcp_stream).await?;
        Ok(Box::new(tls_stream))
    } else {
        Ok(Box::new(tcp_stream))
    }
}

/// Performs the TLS handshake on an open TCP stream.
#[instrument(name = "connection::establish_tls", skip_all, fields(host = %host))]
async fn establish_tls(host: &str, target_addr: &str, tcp_stream: TcpStream) -> Result<TlsStream> {
    let connector = create_tls_connector();
    let server_name = parse_server_name(host)?;

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// Parses server name for TLS SNI.
pub(crate) fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

/// Direct TCP connection.
#[instrument(name = "connection::direct", skip_all)]
async fn connect_direct(target_addr: &str) -> Result<TcpStream> {
    debug!(target = %target_addr, "Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}
