
use std::time::{Duration, Instant};

use harness::{
    read_until_closed, test_config, unused_addr, CaptureBackend, EchoBackend, RelayHandle,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use tls_relay::{Error, SecureListener};

#[tokio::test]
async fn round_trip_preserves_bytes_in_both_directions() {
    let backend = EchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(test_config(backend.addr.to_string())).await.unwrap();

    let client = relay.connect().await.unwrap();
    let (mut rd, mut wr) = tokio::io::split(client);

    let payload: Vec<u8> = (0..256 * 1024u32).map(|i| (i * 7 % 256) as u8).collect();
    let sent = payload.clone();
    let writer = tokio::spawn(async move {
        for chunk in sent.chunks(1500) {
            wr.write_all(chunk).await.unwrap();
        }
        wr.flush().await.unwrap();
        wr
    });

    let mut echoed = vec![0u8; payload.len()];
    timeout(Duration::from_secs(10), rd.read_exact(&mut echoed))
        .await
        .expect("echo did not arrive")
        .unwrap();
    assert_eq!(echoed, payload);

    writer.await.unwrap();
}

#[tokio::test]
async fn half_close_delivers_payload_then_releases_backend() {
    let mut backend = CaptureBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(test_config(backend.addr.to_string())).await.unwrap();

    let mut client = relay.connect().await.unwrap();
    client.write_all(b"finite request body").await.unwrap();
    client.shutdown().await.unwrap();

    let captured = backend
        .next(Duration::from_secs(5))
        .await
        .expect("backend connection was never closed by the relay");
    assert_eq!(captured.payload, b"finite request body");
    assert!(captured.saw_eof);

    // The relay also drops the client side once the session is over.
    let rest = timeout(Duration::from_secs(5), read_until_closed(&mut client))
        .await
        .expect("client connection was left open");
    assert!(rest.is_empty());
}

#[tokio::test]
async fn concurrent_sessions_do_not_cross_contaminate() {
    let mut backend = CaptureBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(test_config(backend.addr.to_string())).await.unwrap();

    let mut first = relay.connect().await.unwrap();
    let mut second = relay.connect().await.unwrap();

    let a = tokio::spawn(async move {
        for _ in 0..500 {
            first.write_all(b"AAAA").await.unwrap();
        }
        first.shutdown().await.unwrap();
    });
    let b = tokio::spawn(async move {
        for _ in 0..500 {
            second.write_all(b"BBBB").await.unwrap();
        }
        second.shutdown().await.unwrap();
    });
    a.await.unwrap();
    b.await.unwrap();

    let mut payloads = vec![
        backend.next(Duration::from_secs(5)).await.unwrap().payload,
        backend.next(Duration::from_secs(5)).await.unwrap().payload,
    ];
    payloads.sort();

    assert_eq!(payloads[0], b"AAAA".repeat(500));
    assert_eq!(payloads[1], b"BBBB".repeat(500));
}

#[tokio::test]
async fn unreachable_backend_closes_client_and_relay_keeps_serving() {
    let backend_addr = unused_addr().await.unwrap();
    let relay = RelayHandle::spawn(test_config(backend_addr.to_string())).await.unwrap();

    let mut doomed = relay.connect().await.unwrap();
    let _ = doomed.write_all(b"nobody is listening").await;
    let received = timeout(Duration::from_secs(5), read_until_closed(&mut doomed))
        .await
        .expect("client was not closed after dial failure");
    assert!(received.is_empty());
    assert!(relay.is_running());

    // Bring the backend up on the address that just failed.
    let _backend = EchoBackend::spawn_on(TcpListener::bind(backend_addr).await.unwrap()).unwrap();

    let mut client = relay.connect().await.unwrap();
    client.write_all(b"second try").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("second session did not relay")
        .unwrap();
    assert_eq!(&echoed, b"second try");
}

#[tokio::test]
async fn deadline_ends_session_even_while_active() {
    let backend = EchoBackend::spawn().await.unwrap();
    let mut config = test_config(backend.addr.to_string());
    config.session_deadline = Duration::from_millis(800);
    let relay = RelayHandle::spawn(config).await.unwrap();

    let started = Instant::now();
    let mut client = relay.connect().await.unwrap();

    let mut echoed_ticks = 0;
    loop {
        if client.write_all(b"tick").await.is_err() {
            break;
        }
        let mut echo = [0u8; 4];
        match timeout(Duration::from_secs(5), client.read_exact(&mut echo)).await {
            Ok(Ok(_)) => {
                assert_eq!(&echo, b"tick");
                echoed_ticks += 1;
            }
            Ok(Err(_)) => break,
            Err(_) => panic!("session was neither relaying nor closed"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let lifetime = started.elapsed();
    assert!(echoed_ticks >= 3, "only {echoed_ticks} ticks before the deadline");
    assert!(lifetime >= Duration::from_millis(700), "closed early after {lifetime:?}");
    assert!(lifetime < Duration::from_secs(5), "deadline not enforced: {lifetime:?}");
}

#[tokio::test]
async fn backend_close_reaches_client_as_clean_tls_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap();
    let backend = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(b"response body").await.unwrap();
    });
    let relay = RelayHandle::spawn(test_config(backend_addr.to_string())).await.unwrap();

    let mut client = relay.connect().await.unwrap();
    let mut body = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut body))
        .await
        .expect("client was never closed")
        .expect("close arrived without close_notify");
    assert_eq!(body, b"response body");

    backend.await.unwrap();
}

#[tokio::test]
async fn silent_client_is_dropped_at_the_deadline() {
    let backend = EchoBackend::spawn().await.unwrap();
    let mut config = test_config(backend.addr.to_string());
    config.session_deadline = Duration::from_millis(300);
    let relay = RelayHandle::spawn(config).await.unwrap();

    let started = Instant::now();
    let mut silent = TcpStream::connect(relay.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), silent.read(&mut buf))
        .await
        .expect("handshake was not bounded by the session deadline");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected bytes: {read:?}");
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(relay.is_running());
}

#[tokio::test]
async fn aborted_handshake_does_not_stop_the_listener() {
    let backend = EchoBackend::spawn().await.unwrap();
    let relay = RelayHandle::spawn(test_config(backend.addr.to_string())).await.unwrap();

    // A truncated ClientHello record header, then a hang-up.
    let mut broken = TcpStream::connect(relay.addr).await.unwrap();
    broken.write_all(&[0x16, 0x03, 0x01, 0x02]).await.unwrap();
    drop(broken);

    // A client that connects and never speaks.
    let _silent = TcpStream::connect(relay.addr).await.unwrap();

    let mut client = relay.connect().await.unwrap();
    client.write_all(b"still here").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("listener stopped serving")
        .unwrap();
    assert_eq!(&echoed, b"still here");
    assert!(relay.is_running());
}

#[tokio::test]
async fn session_limit_holds_new_connections_until_a_slot_frees() {
    let backend = EchoBackend::spawn().await.unwrap();
    let mut config = test_config(backend.addr.to_string());
    config.max_sessions = Some(1);
    let relay = std::sync::Arc::new(RelayHandle::spawn(config).await.unwrap());

    let first = relay.connect().await.unwrap();

    let queued = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!queued.is_finished(), "second handshake ran past the session limit");

    drop(first);

    let mut second = timeout(Duration::from_secs(5), queued)
        .await
        .expect("queued connection was never served")
        .unwrap()
        .unwrap();
    second.write_all(b"ok").await.unwrap();
    let mut echoed = [0u8; 2];
    second.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ok");
}

#[tokio::test]
async fn binding_an_address_in_use_fails() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let tls = tls_relay::cert::loader::build_server_config(
        generated.cert.pem().as_bytes(),
        generated.key_pair.serialize_pem().as_bytes(),
    )
    .unwrap();

    let err = SecureListener::bind(&addr, std::sync::Arc::new(tls))
        .await
        .err()
        .expect("bind unexpectedly succeeded");
    match err {
        Error::Bind { addr: failed, .. } => assert_eq!(failed, addr),
        other => panic!("unexpected error: {other}"),
    }
}
