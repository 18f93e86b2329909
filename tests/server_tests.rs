use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use orchard::{
    from_fn, App, ConnTracker, Context, Error, Output, Result, Server, ServerConfig, ShutdownHandle,
    Status, Stopped,
};

struct Running {
    addr: SocketAddr,
    stop: ShutdownHandle,
    connections: ConnTracker,
    task: JoinHandle<Result<Stopped>>,
}

async fn start(app: App, config: ServerConfig) -> Running {
    app.set_output(Output::new(io::sink()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(app, config.with_handle_signals(false));
    let stop = server.shutdown_handle();
    let connections = server.connections();
    let task = tokio::spawn(server.start(listener));
    Running { addr, stop, connections, task }
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut buf = String::new();
    // A dropped connection may surface as a reset rather than EOF.
    let _ = stream.read_to_string(&mut buf).await;
    buf
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A handler that announces it started, then sleeps for `delay`.
fn slow(entered: &Arc<Notify>, delay: Duration) -> impl orchard::Handler {
    let entered = Arc::clone(entered);
    from_fn(move |ctx: &mut Context| {
        entered.notify_one();
        Box::pin(async move {
            sleep(delay).await;
            ctx.text(Status::Ok, "slow")
        })
    })
}

#[derive(Clone, Default)]
struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn hello(ctx: &mut Context) -> Result<()> {
    let body = format!("hello {}", ctx.param("name"));
    ctx.text(Status::Ok, body)
}

#[tokio::test]
async fn serves_requests_with_server_header() {
    let app = App::new();
    app.get("/hello/:name", hello);
    let server = start(app, ServerConfig::default()).await;

    let res = get(server.addr, "/hello/earth").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.to_ascii_lowercase().contains("server: orchard/"), "{res}");
    assert!(res.ends_with("hello earth"), "{res}");

    assert!(server.stop.graceful_stop());
    assert_eq!(server.task.await.unwrap().unwrap(), Stopped::Gracefully);
}

#[tokio::test]
async fn graceful_stop_waits_for_in_flight_request() {
    let entered = Arc::new(Notify::new());
    let app = App::new();
    app.get("/slow", slow(&entered, Duration::from_millis(300)));
    let server = start(app, ServerConfig::default()).await;

    let addr = server.addr;
    let client = tokio::spawn(async move { get(addr, "/slow").await });
    entered.notified().await;

    server.stop.graceful_stop();
    sleep(Duration::from_millis(50)).await;
    assert!(!server.task.is_finished());
    assert_eq!(server.connections.active(), 1);

    let res = client.await.unwrap();
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.ends_with("slow"), "{res}");

    let stopped = timeout(Duration::from_secs(2), server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stopped, Stopped::Gracefully);
    assert_eq!(server.connections.active(), 0);

    // The listener is gone.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn graceful_stop_closes_idle_keep_alive_connections() {
    let server = start(App::new(), ServerConfig::default()).await;

    let _idle = TcpStream::connect(server.addr).await.unwrap();
    let connections = server.connections.clone();
    eventually(|| connections.active() == 1).await;

    server.stop.graceful_stop();
    let stopped = timeout(Duration::from_secs(2), server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stopped, Stopped::Gracefully);
}

#[tokio::test]
async fn force_stop_does_not_drain() {
    let entered = Arc::new(Notify::new());
    let app = App::new();
    app.get("/stuck", slow(&entered, Duration::from_secs(30)));
    let server = start(app, ServerConfig::default().with_write_timeout(Duration::from_secs(60))).await;

    let addr = server.addr;
    let client = tokio::spawn(async move { get(addr, "/stuck").await });
    entered.notified().await;

    assert!(server.stop.force_stop());
    // A later graceful request changes nothing.
    assert!(!server.stop.graceful_stop());

    let stopped = timeout(Duration::from_secs(1), server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stopped, Stopped::Killed);

    let res = timeout(Duration::from_secs(1), client).await.unwrap().unwrap();
    assert!(!res.contains("200 OK"), "{res}");
}

#[tokio::test]
async fn write_timeout_drops_the_connection() {
    let entered = Arc::new(Notify::new());
    let app = App::new();
    app.get("/late", slow(&entered, Duration::from_secs(5)));
    let config = ServerConfig::default().with_write_timeout(Duration::from_millis(50));
    let server = start(app, config).await;

    let res = timeout(Duration::from_secs(2), get(server.addr, "/late")).await.unwrap();
    assert!(!res.contains("200 OK"), "{res}");

    server.stop.graceful_stop();
    assert_eq!(server.task.await.unwrap().unwrap(), Stopped::Gracefully);
}

#[tokio::test]
async fn connection_count_follows_open_and_close() {
    let server = start(App::new(), ServerConfig::default()).await;
    let connections = server.connections.clone();

    let a = TcpStream::connect(server.addr).await.unwrap();
    let b = TcpStream::connect(server.addr).await.unwrap();
    eventually(|| connections.active() == 2).await;

    drop(a);
    drop(b);
    eventually(|| connections.active() == 0).await;

    server.stop.graceful_stop();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn banner_and_listening_line_go_to_output() {
    let sink = Captured::default();
    let app = App::new();
    app.set_output(Output::new(sink.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(app, ServerConfig::default().with_handle_signals(false));
    let stop = server.shutdown_handle();
    // Stopping before start is honoured as soon as serving begins.
    stop.graceful_stop();
    assert_eq!(server.start(listener).await.unwrap(), Stopped::Gracefully);

    let text = sink.text();
    assert!(text.contains("orchard listening on"), "{text}");
    assert!(text.contains(&addr.to_string()), "{text}");
}

#[tokio::test]
async fn start_tls_with_missing_key_pair_is_a_config_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::new(App::new(), ServerConfig::default().with_handle_signals(false));

    let err = server
        .start_tls(listener, "/nonexistent/cert.pem", "/nonexistent/key.pem")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

/// Trusts whatever certificate the server presents.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn tls_connector() -> TlsConnector {
    let mut config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

/// Writes a fresh self-signed `localhost` key pair as PEM files.
fn self_signed(dir: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

struct RunningTls {
    addr: SocketAddr,
    stop: ShutdownHandle,
    output: Captured,
    task: JoinHandle<Result<Stopped>>,
}

async fn start_tls(app: App, config: ServerConfig, dir: &tempfile::TempDir) -> RunningTls {
    let output = Captured::default();
    app.set_output(Output::new(output.clone()));
    let (cert, key) = self_signed(dir);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(app, config.with_handle_signals(false));
    let stop = server.shutdown_handle();
    let task = tokio::spawn(server.start_tls(listener, cert, key));
    RunningTls { addr, stop, output, task }
}

#[tokio::test]
async fn start_tls_serves_http1_over_tls() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new();
    app.get("/hello/:name", hello);
    let server = start_tls(app, ServerConfig::default(), &dir).await;

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut stream = tls_connector().connect(domain, tcp).await.unwrap();
    // h2 is offered by the client but not accepted with http2 off.
    assert_eq!(stream.get_ref().1.alpn_protocol(), Some(b"http/1.1".as_slice()));

    let req = "GET /hello/tls HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut res = String::new();
    // Peers may skip close_notify.
    let _ = stream.read_to_string(&mut res).await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.ends_with("hello tls"), "{res}");

    let text = server.output.text();
    assert!(text.contains("orchard listening TLS on"), "{text}");
    assert!(text.contains(&server.addr.to_string()), "{text}");

    assert!(server.stop.graceful_stop());
    let stopped = timeout(Duration::from_secs(2), server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stopped, Stopped::Gracefully);
}

#[tokio::test]
async fn start_tls_negotiates_h2_when_http2_is_on() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_tls(App::new(), ServerConfig::default().with_http2(true), &dir).await;

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let stream = tls_connector().connect(domain, tcp).await.unwrap();
    assert_eq!(stream.get_ref().1.alpn_protocol(), Some(b"h2".as_slice()));
    drop(stream);

    assert!(server.stop.graceful_stop());
    let stopped = timeout(Duration::from_secs(2), server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stopped, Stopped::Gracefully);
}
