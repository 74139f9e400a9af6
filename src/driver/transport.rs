//! Broker connections for samsa.
//!
//! # Transport Module
//!
//! [`Transport`] implements samsa's `BrokerConnection`, so samsa's consumers,
//! consumer groups and cluster metadata dial brokers through it. One
//! connection type covers every combination the command line allows:
//!
//! - plain TCP or TLS, with or without a client certificate, with or without
//!   server certificate verification;
//! - no SASL, SASL PLAIN or SASL SCRAM.
//!
//! Every TCP connect is bounded by the configured dial timeout. Messages are
//! size delimited: a big endian `i32` length followed by the payload.
use std::{
    fmt,
    fs::File,
    io::{self, BufReader},
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use samsa::prelude::{
    do_sasl_v2, encode::ToByte, protocol, BrokerAddress, BrokerConnection, Error, KafkaCode,
    Result, SaslConfig,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};
use tokio_rustls::{
    rustls::{
        self,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        DigitallySignedStruct, SignatureScheme,
    },
    TlsConnector,
};
use tracing::instrument;

use crate::config::ConnectConfig;

const PLAIN_MECHANISM: &str = "PLAIN";

trait Socket: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Socket for T {}

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Tried in order when opening a connection without a specific address.
    pub addresses: Vec<BrokerAddress>,
    pub connect: Arc<ConnectConfig>,
    pub correlation_id: i32,
}

/// A connection to one broker.
#[derive(Clone)]
pub struct Transport {
    peer: BrokerAddress,
    stream: Arc<Mutex<Box<dyn Socket>>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("peer", &self.peer).finish()
    }
}

impl Transport {
    pub fn peer(&self) -> &BrokerAddress {
        &self.peer
    }

    /// Connect, and authenticate when credentials are configured.
    #[instrument(name = "transport-connect", level = "debug", skip(config))]
    pub async fn connect(addr: BrokerAddress, config: &TransportConfig) -> Result<Self> {
        let connect = &config.connect;
        if !connect.sasl_enabled() {
            return Self::open(addr, connect.clone()).await;
        }

        if connect.scram {
            let sasl = SaslConfig::new(
                connect.api_key.clone(),
                connect.api_secret.clone(),
                Some(config.correlation_id),
                Some(connect.client_id.clone()),
            );
            let factory_addr = addr.clone();
            let factory_config = connect.clone();
            return do_sasl_v2(
                move || Self::open(factory_addr.clone(), factory_config.clone()),
                config.correlation_id,
                &connect.client_id,
                sasl,
            )
            .await;
        }

        let mut conn = Self::open(addr, connect.clone()).await?;
        conn.authenticate_plain(config.correlation_id, connect).await?;
        Ok(conn)
    }

    /// Open the TCP, and possibly TLS, session without authenticating.
    async fn open(addr: BrokerAddress, connect: Arc<ConnectConfig>) -> Result<Self> {
        tracing::debug!("Connecting to {}:{}", addr.host, addr.port);
        let tcp = tokio::time::timeout(
            connect.timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        .map_err(|_| {
            tracing::warn!("Timed out connecting to {}:{}", addr.host, addr.port);
            Error::IoError(io::ErrorKind::TimedOut)
        })?
        .map_err(|err| {
            tracing::warn!("Error connecting to {}:{} {:?}", addr.host, addr.port, err);
            Error::IoError(err.kind())
        })?;

        let stream: Box<dyn Socket> = if connect.tls {
            let domain = ServerName::try_from(addr.host.clone())
                .map_err(|_| Error::IoError(io::ErrorKind::InvalidInput))?;
            let tls = tls_config(&connect).map_err(|err| {
                tracing::error!("Error preparing tls configuration {:?}", err);
                Error::IoError(err.kind())
            })?;
            let stream = TlsConnector::from(Arc::new(tls))
                .connect(domain, tcp)
                .await
                .map_err(|err| {
                    tracing::warn!("Tls handshake with {} failed {:?}", addr.host, err);
                    Error::IoError(err.kind())
                })?;
            tracing::debug!("tls connected to {}", addr.host);
            Box::new(stream)
        } else {
            Box::new(tcp)
        };

        Ok(Self {
            peer: addr,
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    async fn authenticate_plain(&mut self, correlation_id: i32, connect: &ConnectConfig) -> Result<()> {
        let handshake = protocol::SaslHandshakeRequest::new(
            correlation_id,
            &connect.client_id,
            PLAIN_MECHANISM.to_owned(),
        );
        self.send_frame(&handshake).await?;
        let response = protocol::SaslHandshakeResponse::try_from(self.receive_frame().await?.freeze())?;
        if response.error_code != KafkaCode::None {
            tracing::error!("sasl handshake failed with: {:?}", response);
            return Err(Error::KafkaError(response.error_code));
        }

        let mut token = Vec::with_capacity(connect.api_key.len() + connect.api_secret.len() + 2);
        token.push(0);
        token.extend_from_slice(connect.api_key.as_bytes());
        token.push(0);
        token.extend_from_slice(connect.api_secret.as_bytes());

        let authenticate = protocol::SaslAuthenticationRequest::new(
            correlation_id,
            &connect.client_id,
            Bytes::from(token),
        );
        self.send_frame(&authenticate).await?;
        let response =
            protocol::SaslAuthenticationResponse::try_from(self.receive_frame().await?.freeze())?;
        match response.error_code {
            KafkaCode::None => {
                tracing::info!("Using PLAIN for our SASL Mechanism");
                Ok(())
            }
            KafkaCode::SaslAuthenticationFailed => {
                let message = response
                    .error_message
                    .map(|m| String::from_utf8_lossy(&m).into_owned())
                    .unwrap_or_default();
                Err(Error::SaslAuthFailed(message))
            }
            code => Err(Error::KafkaError(code)),
        }
    }

    async fn send_frame<R: ToByte + Send>(&mut self, req: &R) -> Result<()> {
        let mut buffer = Vec::with_capacity(64);

        buffer.extend_from_slice(&[0, 0, 0, 0]);
        req.encode(&mut buffer)?;

        let size = buffer.len() as i32 - 4;
        size.encode(&mut &mut buffer[..])?;

        tracing::trace!("Sending bytes {}", buffer.len());
        let mut stream = self.stream.lock().await;
        stream
            .write_all(&buffer)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;
        stream.flush().await.map_err(|e| Error::IoError(e.kind()))
    }

    async fn receive_frame(&mut self) -> Result<BytesMut> {
        let mut stream = self.stream.lock().await;

        let length = stream
            .read_u32()
            .await
            .map_err(|e| Error::IoError(e.kind()))?;

        tracing::trace!("Reading {} bytes", length);
        let mut buffer = BytesMut::zeroed(length as usize);
        stream
            .read_exact(&mut buffer)
            .await
            .map_err(|e| Error::IoError(e.kind()))?;

        Ok(buffer)
    }

    /// Shut the connection down. Clones share the socket, so this affects
    /// them too.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.stream.lock().await.shutdown().await
    }
}

#[async_trait]
impl BrokerConnection for Transport {
    type ConnConfig = TransportConfig;

    async fn send_request<R: ToByte + Sync + Send>(&mut self, req: &R) -> Result<()> {
        self.send_frame(req).await
    }

    async fn receive_response(&mut self) -> Result<BytesMut> {
        self.receive_frame().await
    }

    /// Connect to the first configured address that accepts.
    async fn new(config: Self::ConnConfig) -> Result<Self> {
        let mut propagated_err = Error::IoError(io::ErrorKind::NotFound);
        for addr in config.addresses.iter() {
            match Self::connect(addr.clone(), &config).await {
                Ok(conn) => return Ok(conn),
                Err(err) => propagated_err = err,
            }
        }
        Err(propagated_err)
    }

    async fn from_addr(config: Self::ConnConfig, addr: BrokerAddress) -> Result<Self> {
        Self::connect(addr, &config).await
    }
}

fn tls_config(connect: &ConnectConfig) -> io::Result<rustls::ClientConfig> {
    let builder = if connect.skip_tls_verify {
        tracing::warn!("Skipping tls certificate verification");
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification))
    } else {
        let mut roots = rustls::RootCertStore::empty();
        match &connect.tls_ca {
            Some(cafile) => {
                for cert in load_certs(cafile)? {
                    roots
                        .add(cert)
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        rustls::ClientConfig::builder().with_root_certificates(roots)
    };

    match (&connect.tls_cert, &connect.tls_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err)),
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no private key found in {}", path.display()),
        )
    })
}

/// Accepts any server certificate. Only used when verification is disabled.
#[derive(Debug)]
struct SkipVerification;

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod test {
    use tokio::net::TcpListener;

    use super::*;

    fn config(addresses: Vec<BrokerAddress>) -> TransportConfig {
        TransportConfig {
            addresses,
            connect: Arc::new(ConnectConfig::default()),
            correlation_id: 1,
        }
    }

    #[tokio::test]
    async fn frames_are_length_prefixed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let length = socket.read_u32().await.unwrap();
            let mut request = vec![0; length as usize];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_u32(3).await.unwrap();
            socket.write_all(b"abc").await.unwrap();
            request
        });

        let addr = BrokerAddress {
            host: "127.0.0.1".to_owned(),
            port,
        };
        let mut conn = Transport::new(config(vec![addr])).await.unwrap();
        conn.send_request(&7_i32).await.unwrap();
        let response = conn.receive_response().await.unwrap();

        assert_eq!(&response[..], b"abc");
        assert_eq!(server.await.unwrap(), 7_i32.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn new_falls_through_to_a_reachable_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let addresses = vec![
            BrokerAddress {
                host: "127.0.0.1".to_owned(),
                port: closed_port,
            },
            BrokerAddress {
                host: "127.0.0.1".to_owned(),
                port,
            },
        ];
        let conn = Transport::new(config(addresses)).await.unwrap();
        assert_eq!(conn.peer().port, port);
    }

    #[tokio::test]
    async fn no_addresses_is_an_error() {
        assert!(Transport::new(config(vec![])).await.is_err());
    }

    #[test]
    fn client_auth_needs_a_private_key() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        let connect = ConnectConfig {
            tls: true,
            skip_tls_verify: true,
            tls_cert: Some(cert.path().to_owned()),
            tls_key: Some(key.path().to_owned()),
            ..Default::default()
        };

        let err = tls_config(&connect).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("no private key found"));
    }

    #[test]
    fn missing_ca_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let connect = ConnectConfig {
            tls: true,
            tls_ca: Some(dir.path().join("missing.pem")),
            ..Default::default()
        };

        let err = tls_config(&connect).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
