//! Integration tests driving [`Session`] against a fake TCP peer, covering
//! the state-machine scenarios from spec.md §8.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use xmpp_session::{ConnectError, Message, Priority, Protocol, Session, SessionConfig, Stanza, TlsPolicy};

async fn read_until_contains(stream: &mut TcpStream, needle: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.expect("peer read");
        assert!(n > 0, "peer closed before seeing {needle:?}");
        buf.extend_from_slice(&chunk[..n]);
        if String::from_utf8_lossy(&buf).contains(needle) {
            return String::from_utf8_lossy(&buf).into_owned();
        }
    }
}

/// Scenario 5: starttls+sasl+bind negotiation with TLS policy `if-available`
/// but no TLS actually offered by this fake peer (exercises the SASL/bind
/// half of the sequence without standing up a certificate).
#[tokio::test]
async fn sasl_then_bind_completes_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' id='S1'>")
            .await
            .unwrap();
        stream
            .write_all(b"<features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></features>")
            .await
            .unwrap();

        let auth = read_until_contains(&mut stream, "</auth>").await;
        assert!(auth.contains("mechanism='PLAIN'"));
        assert!(auth.contains("AHJvbWVv")); // base64 prefix for \0romeo\0...
        stream
            .write_all(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
            .await
            .unwrap();

        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' id='S2'>")
            .await
            .unwrap();
        stream
            .write_all(b"<features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>")
            .await
            .unwrap();

        let bind_iq = read_until_contains(&mut stream, "</iq>").await;
        assert!(bind_iq.contains("<resource>"));
        let id = bind_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();

        // Keep the socket open so the keepalive space byte can be observed.
        let mut one = [0u8; 1];
        stream.read_exact(&mut one).await.unwrap();
        assert_eq!(one[0], b' ');
    });

    let config = SessionConfig::new("romeo", "example.com", "montague")
        .with_resource("balcony")
        .with_tls_policy(TlsPolicy::IfAvailable)
        .with_host_address(addr.ip().to_string())
        .with_port(addr.port())
        .with_timeout_secs(5);
    let session = Session::new(config);

    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    session
        .connect(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(err);
            }
        })
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("connect callback never fired")
        .unwrap();
    assert_eq!(result, ConnectError::None);

    // The keepalive timer fires 5s after Open, not on connect; give the
    // server task room to see that first space byte land.
    tokio::time::timeout(Duration::from_secs(7), server)
        .await
        .expect("server task timed out")
        .unwrap();
}

/// Scenario 4: a peer advertising `version=0` (no `<features/>` at all)
/// drives legacy `jabber:iq:auth` immediately after stream-open.
#[tokio::test]
async fn legacy_auth_completes_connect_on_version_zero() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='3EE948B0'>")
            .await
            .unwrap();

        let get_iq = read_until_contains(&mut stream, "</iq>").await;
        assert!(get_iq.contains("type='get'"));
        assert!(get_iq.contains("<username>juliet</username>"));
        let id = get_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();

        let set_iq = read_until_contains(&mut stream, "</iq>").await;
        assert!(set_iq.contains("type='set'"));
        assert!(set_iq.contains("<digest>"));
        let id = set_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();
    });

    let config = SessionConfig::new("juliet", "example.com", "capulet")
        .with_host_address(addr.ip().to_string())
        .with_port(addr.port())
        .with_protocol(Protocol::Auto)
        .with_timeout_secs(5);
    let session = Session::new(config);

    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    session
        .connect(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(err);
            }
        })
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("connect callback never fired")
        .unwrap();
    assert_eq!(result, ConnectError::None);

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server task timed out")
        .unwrap();
}

/// Scenario 6: connect-timeout against a black-holed address fires the
/// callback exactly once with `TIMEOUT` and returns the session to closed.
#[tokio::test]
async fn connect_timeout_fires_once() {
    // 192.0.2.0/24 is reserved (TEST-NET-1) and never routable; connect()
    // will hang until our 1s timeout fires rather than failing fast.
    let config = SessionConfig::new("user", "example.com", "pw")
        .with_host_address("192.0.2.1")
        .with_port(5222)
        .with_timeout_secs(1);
    let session = Session::new(config);

    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    session
        .connect(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(err);
            }
        })
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("connect callback never fired")
        .unwrap();
    assert_eq!(result, ConnectError::Timeout);
}

/// A correlated reply fires its registered handler exactly once and the
/// registration is removed even when the handler reports "not consumed".
#[tokio::test]
async fn send_await_response_fires_handler_once_and_deregisters() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' id='S1'>")
            .await
            .unwrap();
        stream
            .write_all(b"<features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>")
            .await
            .unwrap();
        let bind_iq = read_until_contains(&mut stream, "</iq>").await;
        let id = bind_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();

        let ping = read_until_contains(&mut stream, "<ping").await;
        let id = ping
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();
        let mut one = [0u8; 1];
        stream.read_exact(&mut one).await.unwrap();
    });

    let config = SessionConfig::new("user", "example.com", "pw")
        .with_host_address(addr.ip().to_string())
        .with_port(addr.port())
        .with_timeout_secs(5);
    let session = Session::new(config);

    let (connect_tx, connect_rx) = oneshot::channel();
    let mut connect_tx = Some(connect_tx);
    session
        .connect(move |err| {
            if let Some(connect_tx) = connect_tx.take() {
                let _ = connect_tx.send(err);
            }
        })
        .await
        .unwrap();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), connect_rx).await.unwrap().unwrap(),
        ConnectError::None
    );

    let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
    let mut iq = Stanza::new(xmpp_session::Kind::Iq, None);
    iq.element_mut()
        .append_child(xmpp_session::Element::new("ping", "urn:xmpp:ping"));
    let handler = xmpp_session::Handler::new(move |reply: &Stanza| {
        let _ = hit_tx.send(reply.attr("type").map(str::to_string));
        false // reports "not consumed" — registration must still be removed
    });
    session.send_await_response(iq, handler).await.unwrap();

    let reply_type = tokio::time::timeout(Duration::from_secs(5), hit_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply_type.as_deref(), Some("result"));
    assert!(hit_rx.try_recv().is_err(), "handler must fire exactly once");

    // The keepalive timer fires 5s after Open, not on connect; give the
    // server task room to see that final space byte land.
    tokio::time::timeout(Duration::from_secs(7), server)
        .await
        .expect("server task timed out")
        .unwrap();
}

/// `Message::send` serializes `type="chat"`, a non-empty subject, and a
/// body, round-tripping through `Message::parse_stanza` on the wire.
#[tokio::test]
async fn message_round_trips_through_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' id='S1'>")
            .await
            .unwrap();
        stream
            .write_all(b"<features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>")
            .await
            .unwrap();
        let bind_iq = read_until_contains(&mut stream, "</iq>").await;
        let id = bind_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();

        let message = read_until_contains(&mut stream, "</message>").await;
        assert!(message.contains("type='chat'"));
        assert!(message.contains("<subject>hi</subject>"));
        assert!(message.contains("<body>hello there</body>"));
    });

    let config = SessionConfig::new("user", "example.com", "pw")
        .with_host_address(addr.ip().to_string())
        .with_port(addr.port())
        .with_timeout_secs(5);
    let session = Session::new(config);

    let (connect_tx, connect_rx) = oneshot::channel();
    let mut connect_tx = Some(connect_tx);
    session
        .connect(move |err| {
            if let Some(connect_tx) = connect_tx.take() {
                let _ = connect_tx.send(err);
            }
        })
        .await
        .unwrap();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), connect_rx).await.unwrap().unwrap(),
        ConnectError::None
    );

    let msg = Message {
        to: Some("juliet@example.com".into()),
        subject: Some("hi".into()),
        body: Some("hello there".into()),
        kind: Some(xmpp_session::MessageType::Chat),
        ..Default::default()
    };
    msg.send(&session).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server task timed out")
        .unwrap();
}

/// `Event` priority interleaving: a user handler above the built-in
/// priority sees every stanza before the crate's own protocol handling.
#[tokio::test]
async fn high_priority_handler_sees_stanza_before_builtin_handling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_until_contains(&mut stream, "<stream:stream").await;
        stream
            .write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' id='S1'>")
            .await
            .unwrap();
        stream
            .write_all(b"<features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>")
            .await
            .unwrap();
        let bind_iq = read_until_contains(&mut stream, "</iq>").await;
        let id = bind_iq
            .split("id='")
            .nth(1)
            .and_then(|s| s.split('\'').next())
            .unwrap()
            .to_string();
        stream
            .write_all(format!("<iq type='result' id='{id}'/>").as_bytes())
            .await
            .unwrap();
        let mut one = [0u8; 1];
        stream.read_exact(&mut one).await.unwrap();
    });

    let config = SessionConfig::new("user", "example.com", "pw")
        .with_host_address(addr.ip().to_string())
        .with_port(addr.port())
        .with_timeout_secs(5);
    let session = Session::new(config);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let handler = xmpp_session::Handler::new(move |stanza: &Stanza| {
        let _ = seen_tx.send(stanza.element().name().to_string());
        false
    });
    session.add_xml_handler(handler, Priority::HIGH).unwrap();

    let (connect_tx, connect_rx) = oneshot::channel();
    let mut connect_tx = Some(connect_tx);
    session
        .connect(move |err| {
            if let Some(connect_tx) = connect_tx.take() {
                let _ = connect_tx.send(err);
            }
        })
        .await
        .unwrap();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), connect_rx).await.unwrap().unwrap(),
        ConnectError::None
    );

    // The handler observed at least the <features/> and bind-result <iq/>
    // the built-in protocol handler also consumed.
    let mut names = Vec::new();
    while let Ok(Some(name)) = tokio::time::timeout(Duration::from_millis(200), seen_rx.recv()).await {
        names.push(name);
    }
    assert!(names.contains(&"features".to_string()));
    assert!(names.contains(&"iq".to_string()));

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server task timed out")
        .unwrap();
}
