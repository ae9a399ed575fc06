//! Server integration tests over plain TCP and UDP.

mod common;

use std::cell::{Cell, OnceCell, RefCell};
use std::io::{Read, Write};
use std::net::UdpSocket;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use common::{echo_callbacks, pump_until, read_until_closed, recorder, tcp_peer, PEER_TIMEOUT};
use socketeer::{Bytes, Callbacks, EngineConfig, Server};

fn tcp_config() -> EngineConfig {
    EngineConfig::builder()
        .address("tcp://127.0.0.1:0")
        .heartbeat_interval_secs(0)
        .build()
}

#[test]
fn test_tcp_echo_with_greeting() {
    let state = recorder();
    let server = Server::listen(tcp_config(), echo_callbacks(&state, Some(b"hi\n"))).unwrap();
    let addr = server.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let mut stream = tcp_peer(addr);
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).unwrap();
        stream.write_all(b"hello").unwrap();
        let mut echo = [0u8; 5];
        stream.read_exact(&mut echo).unwrap();
        (greeting, echo)
    });

    let done = pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || peer.is_finished() && state.borrow().closed.len() == 1,
    );
    assert!(done, "peer never finished");

    let (greeting, echo) = peer.join().unwrap();
    assert_eq!(&greeting, b"hi\n");
    assert_eq!(&echo, b"hello");

    let state = state.borrow();
    assert_eq!(state.connected.len(), 1);
    assert_eq!(state.message_bodies(), vec![Bytes::from_static(b"hello")]);
    assert_eq!(state.closed, state.connected);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_each_connection_gets_its_own_identifier() {
    let state = recorder();
    let server = Server::listen(tcp_config(), echo_callbacks(&state, None)).unwrap();
    let addr = server.local_addr().unwrap();

    let first = tcp_peer(addr);
    let second = tcp_peer(addr);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().connected.len() == 2,
    ));

    let ids = server.connection_ids();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    drop(first);
    drop(second);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().closed.len() == 2,
    ));
}

#[test]
fn test_silent_peer_gets_heartbeat_then_closed() {
    let config = EngineConfig::builder()
        .address("tcp://127.0.0.1:0")
        .heartbeat_interval_secs(1)
        .build();
    let state = recorder();
    let server = Server::listen(config, echo_callbacks(&state, None)).unwrap();
    let addr = server.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let mut stream = tcp_peer(addr);
        let started = Instant::now();
        let received = read_until_closed(&mut stream);
        (received, started.elapsed())
    });

    assert!(pump_until(
        || {
            server.run_cycle();
        },
        Duration::from_secs(6),
        || peer.is_finished(),
    ));

    let (received, elapsed) = peer.join().unwrap();
    assert_eq!(received, b"ping");
    assert!(elapsed >= Duration::from_secs(2), "closed after {elapsed:?}");
    assert!(elapsed < PEER_TIMEOUT);
    assert_eq!(state.borrow().closed.len(), 1);
}

#[test]
fn test_heartbeat_callback_overrides_payload() {
    let config = EngineConfig::builder()
        .address("tcp://127.0.0.1:0")
        .heartbeat_interval_secs(1)
        .build();
    let callbacks = Callbacks::new().on_heartbeat(|_| Ok(Bytes::from_static(b"beat")));
    let server = Server::listen(config, callbacks).unwrap();
    let addr = server.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let mut stream = tcp_peer(addr);
        let mut beat = [0u8; 4];
        stream.read_exact(&mut beat).unwrap();
        beat
    });

    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || peer.is_finished(),
    ));
    assert_eq!(&peer.join().unwrap(), b"beat");
}

#[test]
fn test_shutdown_closes_every_connection() {
    let state = recorder();
    let server = Server::listen(tcp_config(), echo_callbacks(&state, None)).unwrap();
    let addr = server.local_addr().unwrap();

    let mut peers: Vec<_> = (0..3).map(|_| tcp_peer(addr)).collect();
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().connected.len() == 3,
    ));

    server.shutdown();
    assert_eq!(state.borrow().closed.len(), 3);
    assert_eq!(server.connection_count(), 0);

    server.run_cycle();
    assert!(!server.is_running());

    for peer in &mut peers {
        assert!(read_until_closed(peer).is_empty());
    }
}

#[test]
fn test_close_connection_fires_on_close_once() {
    let state = recorder();
    let server = Server::listen(tcp_config(), echo_callbacks(&state, None)).unwrap();
    let addr = server.local_addr().unwrap();

    let _peer = tcp_peer(addr);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().connected.len() == 1,
    ));
    let id = state.borrow().connected[0];

    assert!(server.close_connection(id));
    assert!(!server.close_connection(id));
    assert!(server.send_to(id, b"late").is_err());
    assert_eq!(state.borrow().closed, vec![id]);
}

/// A handle the callbacks can use to reach the server built after them.
type ServerSlot = Rc<OnceCell<Weak<Server>>>;

fn with_server(slot: &ServerSlot, f: impl FnOnce(&Server)) {
    if let Some(server) = slot.get().and_then(Weak::upgrade) {
        f(&server);
    }
}

#[test]
fn test_close_from_on_message_fires_on_close_once() {
    let slot: ServerSlot = Rc::new(OnceCell::new());
    let closed = Rc::new(RefCell::new(Vec::new()));

    let in_message = Rc::clone(&slot);
    let in_close = Rc::clone(&closed);
    let callbacks = Callbacks::new()
        .on_message(move |id, _| {
            with_server(&in_message, |server| {
                assert!(server.close_connection(id));
            });
            Ok(())
        })
        .on_close(move |id| {
            in_close.borrow_mut().push(id);
            Ok(())
        });
    let server = Rc::new(Server::listen(tcp_config(), callbacks).unwrap());
    slot.set(Rc::downgrade(&server)).unwrap();
    let addr = server.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let mut stream = tcp_peer(addr);
        stream.write_all(b"bye").unwrap();
        read_until_closed(&mut stream)
    });

    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || peer.is_finished(),
    ));

    assert!(peer.join().unwrap().is_empty());
    assert_eq!(closed.borrow().len(), 1);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_close_from_on_close_is_not_lost() {
    let slot: ServerSlot = Rc::new(OnceCell::new());
    let state = recorder();
    let closed = Rc::new(RefCell::new(Vec::new()));

    let in_close = Rc::clone(&slot);
    let seen = Rc::clone(&closed);
    let on_connect = Rc::clone(&state);
    let callbacks = Callbacks::new()
        .on_connect(move |id| {
            on_connect.borrow_mut().connected.push(id);
            Ok(None)
        })
        .on_close(move |id| {
            seen.borrow_mut().push(id);
            // closing one connection takes every other one down with it
            with_server(&in_close, |server| {
                for other in server.connection_ids() {
                    server.close_connection(other);
                }
            });
            Ok(())
        });
    let server = Rc::new(Server::listen(tcp_config(), callbacks).unwrap());
    slot.set(Rc::downgrade(&server)).unwrap();
    let addr = server.local_addr().unwrap();

    let _first = tcp_peer(addr);
    let _second = tcp_peer(addr);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().connected.len() == 2,
    ));

    let connected = state.borrow().connected.clone();
    assert!(server.close_connection(connected[0]));
    assert_eq!(*closed.borrow(), connected);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_stalled_peer_write_failures_reach_on_send_failed() {
    let config = EngineConfig::builder()
        .address("tcp://127.0.0.1:0")
        .heartbeat_interval_secs(0)
        .max_write_buffer(256 * 1024)
        .build();
    let failed = Rc::new(Cell::new(0usize));
    let queued = Rc::new(Cell::new(false));

    let seen = Rc::clone(&failed);
    let chunk = Bytes::from(vec![b'x'; 1024 * 1024]);
    let callbacks = Callbacks::new()
        .on_send(move |_| {
            if queued.replace(true) {
                Ok(Vec::new())
            } else {
                Ok(vec![chunk.clone(); 64])
            }
        })
        .on_send_failed(move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        });
    let server = Server::listen(config, callbacks).unwrap();
    let addr = server.local_addr().unwrap();

    // connected but never reading
    let _peer = tcp_peer(addr);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || failed.get() > 0,
    ));

    // refused writes leave the connection open
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_rest_of_batch_fails_at_once_when_connection_is_gone() {
    let slot: ServerSlot = Rc::new(OnceCell::new());
    let state = recorder();
    let failed = Rc::new(RefCell::new(Vec::new()));
    let armed = Rc::new(Cell::new(false));

    let on_connect = Rc::clone(&state);
    let on_close = Rc::clone(&state);
    let in_send = Rc::clone(&slot);
    let trigger = Rc::clone(&armed);
    let seen = Rc::clone(&failed);
    let callbacks = Callbacks::new()
        .on_connect(move |id| {
            on_connect.borrow_mut().connected.push(id);
            Ok(None)
        })
        .on_send(move |id| {
            if !trigger.get() {
                return Ok(Vec::new());
            }
            with_server(&in_send, |server| {
                server.close_connection(id);
            });
            Ok(vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
            ])
        })
        .on_send_failed(move |_, message| {
            seen.borrow_mut().push(message);
            Ok(())
        })
        .on_close(move |id| {
            on_close.borrow_mut().closed.push(id);
            Ok(())
        });
    let server = Rc::new(Server::listen(tcp_config(), callbacks).unwrap());
    slot.set(Rc::downgrade(&server)).unwrap();
    let addr = server.local_addr().unwrap();

    let _peer = tcp_peer(addr);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || state.borrow().connected.len() == 1,
    ));

    armed.set(true);
    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || !failed.borrow().is_empty(),
    ));

    // the whole batch is reported in the same cycle
    assert_eq!(
        *failed.borrow(),
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]
    );
    assert_eq!(state.borrow().closed.len(), 1);
}

#[test]
fn test_udp_echo() {
    let config = EngineConfig::builder()
        .address("udp://127.0.0.1:0")
        .heartbeat_interval_secs(0)
        .build();
    let state = recorder();
    let server = Server::listen(config, echo_callbacks(&state, Some(b"dropped"))).unwrap();
    let addr = server.local_addr().unwrap();

    // the bound socket is greeted once, at listen
    assert_eq!(state.borrow().connected.len(), 1);
    assert_eq!(server.connection_count(), 1);

    let peer = thread::spawn(move || {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(PEER_TIMEOUT)).unwrap();
        socket.send_to(b"marco", addr).unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = socket.recv_from(&mut buf).unwrap();
        (buf[..n].to_vec(), from)
    });

    assert!(pump_until(
        || {
            server.run_cycle();
        },
        PEER_TIMEOUT,
        || peer.is_finished(),
    ));

    let (reply, from) = peer.join().unwrap();
    assert_eq!(reply, b"marco");
    assert_eq!(from, addr);

    let state = state.borrow();
    assert_eq!(state.connected.len(), 1);
    assert_eq!(state.messages.len(), 1);
    assert!(state.closed.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn test_drive_yields_to_host_runtime() {
    let state = recorder();
    let server = Server::listen(tcp_config(), echo_callbacks(&state, None)).unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(50), server.drive()).await;
    assert!(outcome.is_err(), "drive returned while the loops were running");
    assert!(server.is_running());
    assert!(server.stats().total_cycles() > 1);
}
