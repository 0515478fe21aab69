//! Dialer and session tests against a recording protocol client.
//!
//! The dial, TLS-wrap and client-construction primitives are replaced with
//! test doubles that append every call to a shared log.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, DuplexStream};

use smtp_dialer::{
    Auth, AuthStrategy, ClientBuilder, ClientFactory, Connection, DataSink, Dial, Dialer, Error,
    LoginAuth, Message, SendCloser, ServerInfo, SmtpClient, TlsConfig, TlsWrap,
};

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

/// Behaviour shared by every client the factory hands out.
#[derive(Default)]
struct Script {
    extensions: HashMap<String, String>,
    mail_eofs: AtomicUsize,
    failing_rcpt: Option<String>,
    failing_write: bool,
    failing_start_tls: bool,
}

impl Script {
    fn with_extensions(extensions: &[(&str, &str)]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

struct MockClient {
    log: Log,
    host: String,
    script: Arc<Script>,
}

#[async_trait]
impl SmtpClient for MockClient {
    async fn hello(&mut self, local_name: &str) -> smtp_dialer::Result<()> {
        push(&self.log, format!("hello {local_name}"));
        Ok(())
    }

    async fn extension(&mut self, name: &str) -> smtp_dialer::Result<Option<String>> {
        push(&self.log, format!("extension {name}"));
        Ok(self.script.extensions.get(name).cloned())
    }

    async fn start_tls(&mut self, _config: &TlsConfig) -> smtp_dialer::Result<()> {
        push(&self.log, "starttls");
        if self.script.failing_start_tls {
            return Err(Error::smtp_error(454, "TLS not available"));
        }
        Ok(())
    }

    async fn auth(&mut self, auth: &dyn Auth) -> smtp_dialer::Result<()> {
        let server = ServerInfo {
            name: self.host.clone(),
            tls: true,
            auth: Vec::new(),
        };
        let start = auth.start(&server)?;
        push(&self.log, format!("auth {}", start.mechanism));
        Ok(())
    }

    async fn mail(&mut self, from: &str) -> smtp_dialer::Result<()> {
        push(&self.log, format!("mail {from}"));
        let eofs = &self.script.mail_eofs;
        if eofs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Eof);
        }
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> smtp_dialer::Result<()> {
        push(&self.log, format!("rcpt {to}"));
        if self.script.failing_rcpt.as_deref() == Some(to) {
            return Err(Error::smtp_error(550, "no such user"));
        }
        Ok(())
    }

    async fn data<'a>(&'a mut self) -> smtp_dialer::Result<Box<dyn DataSink + 'a>> {
        push(&self.log, "data");
        Ok(Box::new(MockSink {
            log: Arc::clone(&self.log),
            failing: self.script.failing_write,
            body: Vec::new(),
        }))
    }

    async fn quit(&mut self) -> smtp_dialer::Result<()> {
        push(&self.log, "quit");
        Ok(())
    }

    async fn close(&mut self) -> smtp_dialer::Result<()> {
        push(&self.log, "close");
        Ok(())
    }
}

struct MockSink {
    log: Log,
    failing: bool,
    body: Vec<u8>,
}

impl AsyncWrite for MockSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.failing {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl DataSink for MockSink {
    async fn close(&mut self) -> smtp_dialer::Result<()> {
        let body = String::from_utf8_lossy(&self.body).into_owned();
        push(&self.log, format!("data-close {body}"));
        Ok(())
    }
}

struct MockFactory {
    log: Log,
    script: Arc<Script>,
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn new_client(
        &self,
        _conn: Connection,
        host: &str,
    ) -> smtp_dialer::Result<Box<dyn SmtpClient>> {
        push(&self.log, "new_client");
        Ok(Box::new(MockClient {
            log: Arc::clone(&self.log),
            host: host.to_string(),
            script: Arc::clone(&self.script),
        }))
    }
}

/// Dial primitive over in-memory pipes. Fails once `limit` dials were made.
struct MockDial {
    log: Log,
    dials: Arc<AtomicUsize>,
    limit: usize,
    peers: Arc<Mutex<Vec<DuplexStream>>>,
}

#[async_trait]
impl Dial for MockDial {
    async fn dial(&self, addr: &str, _timeout: Duration) -> smtp_dialer::Result<Option<Connection>> {
        push(&self.log, format!("dial {addr}"));
        if self.dials.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let (client, server) = tokio::io::duplex(1024);
        self.peers.lock().unwrap().push(server);
        Ok(Some(Connection::new(client)))
    }
}

struct MockTls {
    log: Log,
}

#[async_trait]
impl TlsWrap for MockTls {
    async fn wrap(&self, conn: Connection, config: &TlsConfig) -> smtp_dialer::Result<Connection> {
        push(&self.log, format!("tls-wrap {}", config.server_name()));
        let deadline = conn.deadline();
        Ok(Connection::tls(conn, deadline))
    }
}

struct Harness {
    log: Log,
    dials: Arc<AtomicUsize>,
}

impl Harness {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

fn mocked(dialer: Dialer, script: Script) -> (Dialer, Harness) {
    mocked_with_limit(dialer, script, usize::MAX)
}

fn mocked_with_limit(dialer: Dialer, script: Script, limit: usize) -> (Dialer, Harness) {
    let log = Log::default();
    let dials = Arc::new(AtomicUsize::new(0));
    let dialer = dialer
        .with_dial(MockDial {
            log: Arc::clone(&log),
            dials: Arc::clone(&dials),
            limit,
            peers: Arc::default(),
        })
        .with_tls_wrap(MockTls {
            log: Arc::clone(&log),
        })
        .with_client_factory(MockFactory {
            log: Arc::clone(&log),
            script: Arc::new(script),
        });
    (dialer, Harness { log, dials })
}

struct NilDial;

#[async_trait]
impl Dial for NilDial {
    async fn dial(&self, _addr: &str, _timeout: Duration) -> smtp_dialer::Result<Option<Connection>> {
        Ok(None)
    }
}

struct FailingDial;

#[async_trait]
impl Dial for FailingDial {
    async fn dial(&self, _addr: &str, _timeout: Duration) -> smtp_dialer::Result<Option<Connection>> {
        Err(Error::Transport(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connect: connection refused",
        )))
    }
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// ==================== Transport ====================

#[tokio::test]
async fn test_nil_connection_is_reported() {
    for port in [587, 465] {
        let dialer = Dialer::new("smtp.example.com", port, "", "").with_dial(NilDial);
        let err = dialer.dial().await.unwrap_err();
        assert_eq!(err.to_string(), "dial failed: connection is nil");
    }
}

#[tokio::test]
async fn test_dial_error_is_returned_unchanged() {
    let dialer = Dialer::new("smtp.example.com", 587, "", "").with_dial(FailingDial);
    let err = dialer.dial().await.unwrap_err();
    assert_eq!(err.to_string(), "connect: connection refused");
}

#[tokio::test]
async fn test_unreachable_host() {
    let dialer = Dialer::new("127.0.0.1", closed_port(), "", "");
    assert!(matches!(dialer.dial().await, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_unreachable_proxy() {
    let proxy = format!("127.0.0.1:{}", closed_port());
    let dialer = Dialer::new("smtp.example.com", 587, "", "").with_socks5_proxy(proxy);
    assert!(dialer.dial().await.is_err());
}

#[tokio::test]
async fn test_bad_proxy_host() {
    let mut dialer = Dialer::new("smtp.example.com", 587, "", "");
    dialer.set_socks5_proxy("bad-host:9999");
    assert!(dialer.dial().await.is_err());
}

#[tokio::test]
async fn test_proxy_is_dialed_instead_of_server() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "", "").with_socks5_proxy("127.0.0.1:1080"),
        Script::default(),
    );
    // The in-memory peer never answers the SOCKS5 greeting.
    let result = tokio::time::timeout(Duration::from_millis(50), dialer.dial()).await;
    assert!(result.is_err());
    assert_eq!(harness.entries(), ["dial 127.0.0.1:1080"]);
}

// ==================== Handshake ====================

#[tokio::test]
async fn test_starttls_then_auth_plain() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "user@example.com", "pw"),
        Script::with_extensions(&[("STARTTLS", ""), ("AUTH", "PLAIN")]),
    );

    let _session = dialer.dial().await.unwrap();
    assert_eq!(
        harness.entries(),
        [
            "dial smtp.example.com:587",
            "new_client",
            "extension STARTTLS",
            "starttls",
            "extension AUTH",
            "auth PLAIN",
        ]
    );
}

#[tokio::test]
async fn test_implicit_tls_skips_starttls() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 465, "user@example.com", "pw"),
        Script::with_extensions(&[("STARTTLS", ""), ("AUTH", "PLAIN LOGIN")]),
    );

    let _session = dialer.dial().await.unwrap();
    assert_eq!(
        harness.entries(),
        [
            "dial smtp.example.com:465",
            "tls-wrap smtp.example.com",
            "new_client",
            "extension AUTH",
            "auth PLAIN",
        ]
    );
}

#[tokio::test]
async fn test_local_name_is_sent_first() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 25, "", "").with_local_name("relay.example.org"),
        Script::default(),
    );

    let _session = dialer.dial().await.unwrap();
    assert_eq!(
        harness.entries(),
        [
            "dial smtp.example.com:25",
            "new_client",
            "hello relay.example.org",
            "extension STARTTLS",
        ]
    );
}

#[tokio::test]
async fn test_starttls_failure_closes_client() {
    let mut script = Script::with_extensions(&[("STARTTLS", "")]);
    script.failing_start_tls = true;
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let err = dialer.dial().await.unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 454, .. }));
    assert_eq!(harness.entries().last().map(String::as_str), Some("close"));
}

// ==================== Authentication ====================

async fn negotiated(advertised: &str) -> Option<&'static str> {
    let (dialer, _harness) = mocked(
        Dialer::new("smtp.example.com", 587, "user@example.com", "pw"),
        Script::with_extensions(&[("AUTH", advertised)]),
    );
    let _session = dialer.dial().await.unwrap();
    dialer.auth().map(AuthStrategy::name)
}

#[tokio::test]
async fn test_auth_negotiation_precedence() {
    assert_eq!(negotiated("PLAIN LOGIN CRAM-MD5").await, Some("CRAM-MD5"));
    assert_eq!(negotiated("LOGIN").await, Some("LOGIN"));
    assert_eq!(negotiated("LOGIN PLAIN").await, Some("PLAIN"));
    assert_eq!(negotiated("PLAIN").await, Some("PLAIN"));
    assert_eq!(negotiated("XOAUTH2").await, Some("PLAIN"));
}

#[tokio::test]
async fn test_no_auth_extension_means_no_auth() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "user@example.com", "pw"),
        Script::default(),
    );
    let _session = dialer.dial().await.unwrap();
    assert!(dialer.auth().is_none());
    assert!(!harness.entries().iter().any(|e| e.starts_with("auth ")));
}

#[tokio::test]
async fn test_preset_auth_skips_negotiation() {
    let preset = AuthStrategy::Login(LoginAuth::new("user", "pw", "smtp.example.com"));
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "user@example.com", "pw").with_auth(preset),
        Script::with_extensions(&[("AUTH", "CRAM-MD5 PLAIN")]),
    );

    let _session = dialer.dial().await.unwrap();
    assert_eq!(harness.count("extension AUTH"), 0);
    assert_eq!(harness.count("auth LOGIN"), 1);
}

#[tokio::test]
async fn test_username_without_at_is_rejected() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "api-key", "pw"),
        Script::with_extensions(&[("AUTH", "PLAIN")]),
    );

    let err = dialer.dial().await.unwrap_err();
    assert!(matches!(err, Error::InvalidUsername(ref name) if name == "api-key"));
    assert_eq!(harness.entries().last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_username_check_can_be_skipped() {
    let (dialer, harness) = mocked(
        Dialer::new("smtp.example.com", 587, "api-key", "pw").with_skip_username_check(true),
        Script::with_extensions(&[("AUTH", "PLAIN")]),
    );

    let _session = dialer.dial().await.unwrap();
    assert_eq!(harness.count("auth PLAIN"), 1);
}

// ==================== Session ====================

#[tokio::test]
async fn test_mail_eof_redials_once() {
    let script = Script {
        mail_eofs: AtomicUsize::new(1),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    session.send("a@x", &["b@y"], &"body").await.unwrap();

    assert_eq!(harness.dials(), 2);
    assert_eq!(harness.count("mail a@x"), 2);
    assert_eq!(harness.count("data-close body"), 1);
}

#[tokio::test]
async fn test_second_eof_is_surfaced() {
    let script = Script {
        mail_eofs: AtomicUsize::new(2),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    let err = session.send("a@x", &["b@y"], &"body").await.unwrap_err();

    assert!(err.is_eof());
    assert_eq!(harness.dials(), 2);
    assert_eq!(harness.count("rcpt b@y"), 0);
}

#[tokio::test]
async fn test_failed_redial_returns_original_error() {
    let script = Script {
        mail_eofs: AtomicUsize::new(1),
        ..Script::default()
    };
    let (dialer, harness) =
        mocked_with_limit(Dialer::new("smtp.example.com", 587, "", ""), script, 1);

    let mut session = dialer.dial().await.unwrap();
    let err = session.send("a@x", &["b@y"], &"body").await.unwrap_err();

    assert!(matches!(err, Error::Eof));
    assert_eq!(harness.dials(), 2);
}

#[tokio::test]
async fn test_rcpt_failure_stops_the_transaction() {
    let script = Script {
        failing_rcpt: Some("c@z".into()),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    let err = session
        .send("a@x", &["b@y", "c@z", "d@w"], &"body")
        .await
        .unwrap_err();

    assert!(err.is_permanent());
    let entries = harness.entries();
    assert!(entries.contains(&"rcpt b@y".to_string()));
    assert!(entries.contains(&"rcpt c@z".to_string()));
    assert!(!entries.contains(&"rcpt d@w".to_string()));
    assert!(!entries.iter().any(|e| e == "data" || e == "rset"));
}

#[tokio::test]
async fn test_body_write_failure_is_returned() {
    let script = Script {
        failing_write: true,
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    let err = session.send("a@x", &["b@y"], &"body").await.unwrap_err();

    assert!(matches!(err, Error::Io(ref e) if e.to_string() == "disk full"));
    assert_eq!(harness.count("data-close "), 1);
}

#[tokio::test]
async fn test_close_quits_exactly_once() {
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), Script::default());

    let mut session = dialer.dial().await.unwrap();
    session.send("a@x", &["b@y"], &"body").await.unwrap();
    session.close().await.unwrap();

    assert_eq!(harness.count("quit"), 1);
}

#[tokio::test]
async fn test_close_after_rejected_recipient_quits_once() {
    let script = Script {
        failing_rcpt: Some("b@y".into()),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    assert!(session.send("a@x", &["b@y"], &"body").await.is_err());
    session.close().await.unwrap();

    assert_eq!(harness.count("quit"), 1);
}

#[tokio::test]
async fn test_close_after_redial_quits_once() {
    let script = Script {
        mail_eofs: AtomicUsize::new(1),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let mut session = dialer.dial().await.unwrap();
    session.send("a@x", &["b@y"], &"body").await.unwrap();
    session.close().await.unwrap();

    assert_eq!(harness.dials(), 2);
    assert_eq!(harness.count("quit"), 1);
}

#[tokio::test]
async fn test_dial_and_send_quits_after_failure() {
    let script = Script {
        failing_rcpt: Some("b@y".into()),
        ..Script::default()
    };
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), script);

    let messages = [
        Message::new("a@x", ["b@y"], "first"),
        Message::new("a@x", ["c@z"], "second"),
    ];
    let err = dialer.dial_and_send(&messages).await.unwrap_err();

    assert!(err.is_permanent());
    assert_eq!(harness.count("rcpt c@z"), 0);
    assert_eq!(harness.entries().last().map(String::as_str), Some("quit"));
}

#[tokio::test]
async fn test_dial_and_send_delivers_in_order() {
    let (dialer, harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), Script::default());

    let messages = [
        Message::new("a@x", ["b@y"], "first"),
        Message::new("a@x", ["c@z"], "second"),
    ];
    dialer.dial_and_send(&messages).await.unwrap();

    let closes: Vec<String> = harness
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("data-close"))
        .collect();
    assert_eq!(closes, ["data-close first", "data-close second"]);
    assert_eq!(harness.count("quit"), 1);
}

// ==================== Deadline ====================

#[tokio::test(start_paused = true)]
async fn test_silent_server_hits_handshake_deadline() {
    let (dialer, _harness) = mocked(Dialer::new("smtp.example.com", 587, "", ""), Script::default());
    let dialer = dialer.with_client_factory(ClientBuilder);

    let err = dialer.dial().await.unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
}
