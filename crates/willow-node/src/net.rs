//! Host networking: TCP and mutual-TLS byte streams for the MQTT session,
//! and an offline uplink for runs without a broker

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use embedded_io::ErrorKind;
use log::{debug, info, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use willow_core::config::MqttConfig;
use willow_core::uplink::{Connector, MqttSession, Uplink, UplinkError};

use crate::tls::{self, TlsSetupError};

fn error_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
        io::ErrorKind::NotConnected => ErrorKind::NotConnected,
        io::ErrorKind::AddrInUse => ErrorKind::AddrInUse,
        io::ErrorKind::AddrNotAvailable => ErrorKind::AddrNotAvailable,
        io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
        io::ErrorKind::InvalidData => ErrorKind::InvalidData,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
        io::ErrorKind::Interrupted => ErrorKind::Interrupted,
        io::ErrorKind::Unsupported => ErrorKind::Unsupported,
        io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
        io::ErrorKind::WriteZero => ErrorKind::WriteZero,
        _ => ErrorKind::Other,
    }
}

fn transport(e: io::Error) -> UplinkError {
    UplinkError::Transport(error_kind(&e))
}

/// A std byte stream speaking `embedded_io`.
pub struct StdLink<S>(S);

impl<S> embedded_io::ErrorType for StdLink<S> {
    type Error = ErrorKind;
}

impl<S: Read> embedded_io::Read for StdLink<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).map_err(|e| error_kind(&e))
    }
}

impl<S: Write> embedded_io::Write for StdLink<S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf).map_err(|e| error_kind(&e))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().map_err(|e| error_kind(&e))
    }
}

/// Plain TCP to the broker.
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn connect(&self) -> Result<TcpStream, UplinkError> {
        let mut last = UplinkError::Transport(ErrorKind::NotFound);
        for addr in (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(transport)?
        {
            debug!("Connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.timeout))
                        .map_err(transport)?;
                    stream
                        .set_write_timeout(Some(self.timeout))
                        .map_err(transport)?;
                    stream.set_nodelay(true).map_err(transport)?;
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("Connecting to {} failed: {}", addr, e);
                    last = transport(e);
                }
            }
        }
        Err(last)
    }
}

impl Connector for TcpConnector {
    type Stream = StdLink<TcpStream>;

    fn open(&mut self) -> Result<Self::Stream, UplinkError> {
        self.connect().map(StdLink)
    }
}

/// Mutual TLS over TCP. The handshake completes inside `open`, so a rejected
/// certificate surfaces as a connect failure.
pub struct TlsConnector {
    tcp: TcpConnector,
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    pub fn new(tcp: TcpConnector, config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            tcp,
            config,
            server_name,
        }
    }
}

impl Connector for TlsConnector {
    type Stream = StdLink<StreamOwned<ClientConnection, TcpStream>>;

    fn open(&mut self) -> Result<Self::Stream, UplinkError> {
        let socket = self.tcp.connect()?;
        let connection = ClientConnection::new(self.config.clone(), self.server_name.clone())
            .map_err(|e| {
                warn!("TLS session setup failed: {}", e);
                UplinkError::Transport(ErrorKind::Other)
            })?;

        let mut stream = StreamOwned::new(connection, socket);
        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock).map_err(|e| {
                warn!("TLS handshake with {} failed: {}", self.tcp.host, e);
                transport(e)
            })?;
        }
        debug!("TLS session established with {}", self.tcp.host);

        Ok(StdLink(stream))
    }
}

/// Stand-in when no broker is configured. Logs the payload but never
/// confirms it, so the baseline only moves on real transmissions.
pub struct OfflineUplink;

impl Uplink for OfflineUplink {
    fn connect(&mut self) -> Result<(), UplinkError> {
        info!("Offline mode, no broker");
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), UplinkError> {
        info!(
            "[offline] {} <- {}",
            topic,
            String::from_utf8_lossy(payload)
        );
        Err(UplinkError::NotConnected)
    }
}

pub enum NodeUplink<'a> {
    Mqtt(MqttSession<'a, TcpConnector>),
    MqttTls(MqttSession<'a, TlsConnector>),
    Offline(OfflineUplink),
}

impl<'a> NodeUplink<'a> {
    /// MQTT session for `config`, over mutual TLS when it carries credentials.
    pub fn mqtt(config: MqttConfig<'a>, timeout: Duration) -> Result<Self, TlsSetupError> {
        let tcp = TcpConnector::new(config.endpoint, config.port, timeout);
        match &config.tls {
            None => Ok(Self::Mqtt(MqttSession::new(tcp, config))),
            Some(credentials) => {
                let connector = TlsConnector::new(
                    tcp,
                    tls::client_config(credentials)?,
                    tls::server_name(config.endpoint)?,
                );
                Ok(Self::MqttTls(MqttSession::new(connector, config)))
            }
        }
    }
}

impl Uplink for NodeUplink<'_> {
    fn connect(&mut self) -> Result<(), UplinkError> {
        match self {
            Self::Mqtt(session) => session.connect(),
            Self::MqttTls(session) => session.connect(),
            Self::Offline(offline) => offline.connect(),
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), UplinkError> {
        match self {
            Self::Mqtt(session) => session.publish(topic, payload),
            Self::MqttTls(session) => session.publish(topic, payload),
            Self::Offline(offline) => offline.publish(topic, payload),
        }
    }

    fn disconnect(&mut self) {
        match self {
            Self::Mqtt(session) => session.disconnect(),
            Self::MqttTls(session) => session.disconnect(),
            Self::Offline(offline) => offline.disconnect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::tests::{BROKER_KEY, BROKER_PEM, CA_PEM, device_credentials};
    use rustls::pki_types::pem::PemObject;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use rustls::server::WebPkiClientVerifier;
    use rustls::{RootCertStore, ServerConfig, ServerConnection};
    use std::net::TcpListener;
    use std::thread;

    /// Play the broker for one CONNECT and one QoS 1 PUBLISH, returning the
    /// published payload.
    fn serve_one_publish<S: Read + Write>(socket: &mut S) -> String {
        let mut header = [0u8; 2];

        // CONNECT
        socket.read_exact(&mut header).unwrap();
        let mut body = vec![0u8; header[1] as usize];
        socket.read_exact(&mut body).unwrap();
        assert_eq!(header[0], 0x10);
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();
        socket.flush().unwrap();

        // PUBLISH, ack with the same packet id
        socket.read_exact(&mut header).unwrap();
        let mut body = vec![0u8; header[1] as usize];
        socket.read_exact(&mut body).unwrap();
        assert_eq!(header[0], 0x32);
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let id = [body[2 + topic_len], body[3 + topic_len]];
        socket.write_all(&[0x40, 0x02, id[0], id[1]]).unwrap();
        socket.flush().unwrap();

        String::from_utf8(body[4 + topic_len..].to_vec()).unwrap()
    }

    /// Broker side of mutual TLS: its own certificate, and client
    /// certificates checked against the test CA.
    fn broker_tls_config() -> Arc<ServerConfig> {
        let provider = tls::provider();
        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from_pem_slice(CA_PEM.as_bytes()).unwrap())
            .unwrap();
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .unwrap();
        let chain = CertificateDer::pem_slice_iter(BROKER_PEM.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_slice(BROKER_KEY.as_bytes()).unwrap();

        Arc::new(
            ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_client_cert_verifier(verifier)
                .with_single_cert(chain, key)
                .unwrap(),
        )
    }

    #[test]
    fn test_refused_connection_is_a_transport_error() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut connector = TcpConnector::new("127.0.0.1", port, Duration::from_secs(1));

        assert!(matches!(
            connector.open(),
            Err(UplinkError::Transport(_))
        ));
    }

    #[test]
    fn test_publish_against_a_local_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            serve_one_publish(&mut socket)
        });

        let config = MqttConfig {
            endpoint: "127.0.0.1",
            port,
            ..MqttConfig::default()
        };
        let mut uplink = NodeUplink::mqtt(config, Duration::from_secs(2)).unwrap();
        assert!(matches!(uplink, NodeUplink::Mqtt(_)));

        uplink.connect().unwrap();
        uplink.publish("willow/sensors/data", b"{\"t\":1}").unwrap();
        uplink.disconnect();

        assert_eq!(broker.join().unwrap(), "{\"t\":1}");
    }

    #[test]
    fn test_publish_over_mutual_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server_config = broker_tls_config();

        let broker = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let connection = ServerConnection::new(server_config).unwrap();
            let mut stream = StreamOwned::new(connection, socket);
            let payload = serve_one_publish(&mut stream);
            let presented = stream
                .conn
                .peer_certificates()
                .map_or(0, |chain| chain.len());
            (payload, presented)
        });

        let config = MqttConfig {
            endpoint: "127.0.0.1",
            ..MqttConfig::default()
        }
        .with_tls(device_credentials());
        let config = MqttConfig { port, ..config };
        let mut uplink = NodeUplink::mqtt(config, Duration::from_secs(2)).unwrap();
        assert!(matches!(uplink, NodeUplink::MqttTls(_)));

        uplink.connect().unwrap();
        uplink.publish("willow/sensors/data", b"{\"t\":2}").unwrap();
        uplink.disconnect();

        let (payload, presented) = broker.join().unwrap();
        assert_eq!(payload, "{\"t\":2}");
        // The broker saw the device certificate
        assert_eq!(presented, 1);
    }

    #[test]
    fn test_offline_uplink_never_confirms() {
        let mut uplink = NodeUplink::Offline(OfflineUplink);
        assert_eq!(uplink.connect(), Ok(()));
        assert_eq!(uplink.publish("t", b"x"), Err(UplinkError::NotConnected));
    }
}
