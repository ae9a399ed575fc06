//! Client reconnection and TCP client integration tests.

mod common;

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use common::{closed_port, pump_until, recorder, recording_callbacks, PEER_TIMEOUT};
use socketeer::{Bytes, Callbacks, Client, ClientError, EngineConfig, EngineError};

fn client_config(address: String, retry_count: i64) -> EngineConfig {
    EngineConfig::builder()
        .address(address)
        .heartbeat_interval_secs(0)
        .connect_timeout_ms(500)
        .reconnect(retry_count, 0)
        .build()
}

#[test]
fn test_no_retries_fails_after_first_attempt() {
    let config = client_config(format!("tcp://127.0.0.1:{}", closed_port()), 0);
    let client = Client::connect(config, Callbacks::new()).unwrap();

    assert!(client.is_finished());
    assert!(!client.is_connected());
    match client.run() {
        Err(ClientError::ReconnectExhausted { attempts }) => assert_eq!(attempts, 0),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn test_bounded_retries_then_exhausted() {
    let config = client_config(format!("tcp://127.0.0.1:{}", closed_port()), 2);
    let client = Client::connect(config, Callbacks::new()).unwrap();

    let err = client.run().unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(err.to_string(), "reconnection failed after 2 attempt(s)");
}

#[test]
fn test_invalid_address_is_a_config_error() {
    let err = Client::connect(EngineConfig::new("carrier-pigeon://nest:1"), Callbacks::new())
        .unwrap_err();
    match err {
        ClientError::Engine(inner) => assert!(inner.is_fatal()),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_send_without_connection() {
    let config = client_config(format!("tcp://127.0.0.1:{}", closed_port()), 0);
    let client = Client::connect(config, Callbacks::new()).unwrap();
    assert!(matches!(client.send(b"x"), Err(EngineError::NotConnected)));
}

#[test]
fn test_tcp_client_exchange_then_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(PEER_TIMEOUT)).unwrap();
        stream.write_all(b"hi").unwrap();
        let mut answer = [0u8; 2];
        stream.read_exact(&mut answer).unwrap();
        answer
    });

    let state = recorder();
    let callbacks = recording_callbacks(&state, None, |message| {
        (&message[..] == b"hi").then(|| Bytes::from_static(b"yo"))
    });
    let client = Client::connect(client_config(format!("tcp://{addr}"), 0), callbacks).unwrap();
    assert!(client.is_connected());

    let finished = pump_until(
        || {
            client.run_cycle();
        },
        PEER_TIMEOUT,
        || client.is_finished(),
    );
    assert!(finished);

    assert_eq!(&server.join().unwrap(), b"yo");
    assert!(matches!(
        client.run(),
        Err(ClientError::ReconnectExhausted { attempts: 0 })
    ));

    let state = state.borrow();
    assert_eq!(state.connected.len(), 1);
    assert_eq!(state.message_bodies(), vec![Bytes::from_static(b"hi")]);
    assert_eq!(state.closed, state.connected);
}

#[test]
fn test_reconnects_after_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // accept and drop two connections in turn, then stop listening
    let server = thread::spawn(move || {
        let (first, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(first);
        let (second, _) = listener.accept().unwrap();
        drop(listener);
        thread::sleep(Duration::from_millis(20));
        drop(second);
    });

    let state = recorder();
    let callbacks = recording_callbacks(&state, None, |_| None);
    let client = Client::connect(client_config(format!("tcp://{addr}"), 1), callbacks).unwrap();

    assert!(pump_until(
        || {
            client.run_cycle();
        },
        PEER_TIMEOUT,
        || client.is_finished(),
    ));
    server.join().unwrap();

    // a success resets the budget, so the single retry is spent twice
    let state = state.borrow();
    assert_eq!(state.connected.len(), 2);
    assert_eq!(state.closed.len(), 2);
    assert!(client.run().unwrap_err().is_exhausted());
}

#[test]
fn test_close_stops_without_reconnecting() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let state = recorder();
    let callbacks = recording_callbacks(&state, None, |_| None);
    let client =
        Client::connect(client_config(format!("tcp://{addr}"), -1), callbacks).unwrap();
    let (_accepted, _) = listener.accept().unwrap();

    client.run_cycle();
    client.close();
    assert!(client.run().is_ok());
    assert_eq!(state.borrow().closed.len(), 1);
}
