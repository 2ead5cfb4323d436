//! SOCKS negotiation through the engine, over in-memory sockets

mod common;

use common::{remote_destination, TestConfigBuilder, SOCKS5_CONNECT_OK};
use socksify::error::{ProtocolError, Socks5ReplyCode};
use socksify::readiness::{Event, Interest, InterestSet};
use socksify::socks::{CredentialField, CredentialSource, SessionState};
use socksify::transport::scripted::{ConnectMode, ScriptedSockets};
use socksify::transport::{SocketHandle, SocketKind};
use socksify::{Attempt, SessionError, SessionId, Socksifier, StepOutcome};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

fn proxied(
    engine: &mut Socksifier<'_>,
    sockets: &mut ScriptedSockets,
    handle: SocketHandle,
) -> SessionId {
    match engine
        .attempt(sockets, handle, remote_destination(), SocketKind::Stream)
        .unwrap()
    {
        Attempt::Proxied(id) => id,
        other => panic!("expected a proxied attempt, got {:?}", other),
    }
}

fn only(handle: SocketHandle, interest: Interest) -> InterestSet {
    [(handle, interest)].into_iter().collect()
}

#[test]
fn test_socks4_request_carries_user_id() {
    let routes = TestConfigBuilder::new().version(4).build();
    let credentials = CredentialSource::new(None, None, Some("bob".into()));
    let mut engine = Socksifier::new(&routes, credentials);
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);

    let id = proxied(&mut engine, &mut sockets, handle);
    assert_eq!(
        sockets.take_sent(handle),
        vec![4, 1, 1, 187, 203, 0, 113, 7, b'b', b'o', b'b', 0]
    );

    sockets.push_inbound(handle, &[0, 0x5A, 0, 0, 0, 0, 0, 0]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Done)
    ));
}

#[test]
fn test_socks5_password_exchange() {
    let routes = TestConfigBuilder::new()
        .credentials("alice", "secret")
        .build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);

    let id = proxied(&mut engine, &mut sockets, handle);
    assert_eq!(sockets.take_sent(handle), vec![5, 2, 0, 2]);

    sockets.push_inbound(handle, &[5, 2]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::InProgress(Interest::READ))
    ));
    let mut auth = vec![1, 5];
    auth.extend_from_slice(b"alice");
    auth.push(6);
    auth.extend_from_slice(b"secret");
    assert_eq!(sockets.take_sent(handle), auth);

    sockets.push_inbound(handle, &[1, 0]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::InProgress(Interest::READ))
    ));
    assert_eq!(
        sockets.take_sent(handle),
        vec![5, 1, 0, 1, 203, 0, 113, 7, 1, 187]
    );

    sockets.push_inbound(handle, &SOCKS5_CONNECT_OK);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Done)
    ));
}

#[test]
fn test_environment_credentials() {
    let routes = TestConfigBuilder::new().build();
    let credentials = CredentialSource::new(Some("env".into()), Some("pw".into()), None);
    let mut engine = Socksifier::new(&routes, credentials);
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 2]);

    proxied(&mut engine, &mut sockets, handle);
    assert_eq!(
        sockets.take_sent(handle),
        vec![5, 2, 0, 2, 1, 3, b'e', b'n', b'v', 2, b'p', b'w']
    );
}

#[test]
fn test_auth_required_without_password() {
    let routes = TestConfigBuilder::new().build();
    let credentials = CredentialSource::new(None, None, Some("carol".into()));
    let mut engine = Socksifier::new(&routes, credentials);
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 2]);

    let id = proxied(&mut engine, &mut sockets, handle);
    let outcome = engine.poll_progress(&mut sockets, id).unwrap();
    let StepOutcome::Failed(err) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(matches!(
        err,
        SessionError::MissingCredentials(CredentialField::Password)
    ));
    assert_eq!(io::Error::from(err).kind(), io::ErrorKind::ConnectionRefused);
    assert_eq!(sockets.take_sent(handle), vec![5, 2, 0, 2]);
}

#[test]
fn test_no_acceptable_method() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 0xFF]);

    let id = proxied(&mut engine, &mut sockets, handle);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Failed(SessionError::Protocol(
            ProtocolError::NoAcceptableMethod
        )))
    ));
    assert_eq!(sockets.take_sent(handle), vec![5, 2, 0, 2]);
}

#[test]
fn test_connect_status_maps_to_error_kind() {
    for (status, kind) in [
        (3, io::ErrorKind::NetworkUnreachable),
        (4, io::ErrorKind::HostUnreachable),
        (5, io::ErrorKind::ConnectionRefused),
        (6, io::ErrorKind::TimedOut),
        (1, io::ErrorKind::ConnectionAborted),
    ] {
        let routes = TestConfigBuilder::new().build();
        let mut engine = Socksifier::new(&routes, CredentialSource::default());
        let mut sockets = ScriptedSockets::new();
        let handle = sockets.add(3, ConnectMode::Immediate);
        sockets.push_inbound(handle, &[5, 0]);
        sockets.push_inbound(handle, &[5, status, 0, 1, 0, 0, 0, 0, 0, 0]);

        let id = proxied(&mut engine, &mut sockets, handle);
        let err = engine.complete(&mut sockets, id, None).unwrap_err();
        assert_eq!(err.kind(), kind, "status {}", status);
    }
}

#[test]
fn test_reply_split_across_segments() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 0]);

    let id = proxied(&mut engine, &mut sockets, handle);
    sockets.push_inbound(handle, &[5, 0, 0]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::InProgress(Interest::READ))
    ));
    sockets.push_inbound(handle, &[1, 0, 0, 0, 0, 0, 0]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Done)
    ));
}

#[test]
fn test_long_username_sends_nothing() {
    let routes = TestConfigBuilder::new().build();
    let long = "u".repeat(300);
    let credentials = CredentialSource::new(Some(long), Some("pw".into()), None);
    let mut engine = Socksifier::new(&routes, credentials);
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 2]);

    let id = proxied(&mut engine, &mut sockets, handle);
    assert_eq!(sockets.take_sent(handle), vec![5, 2, 0, 2]);
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Failed(SessionError::CredentialTooLong {
            field: CredentialField::Username,
            ..
        }))
    ));
}

#[test]
fn test_multiplexer_hides_negotiation() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let proxied_handle = sockets.add(3, ConnectMode::Deferred);
    let plain = sockets.add(4, ConnectMode::Immediate);

    let id = proxied(&mut engine, &mut sockets, proxied_handle);
    let interest: InterestSet = [
        (proxied_handle, Interest::WRITE),
        (plain, Interest::WRITE),
    ]
    .into_iter()
    .collect();

    // The plain socket is writable, the proxied one is still connecting
    let events = engine
        .wait(&mut sockets, &interest, Some(Duration::from_millis(10)))
        .unwrap();
    assert_eq!(
        events,
        vec![Event {
            handle: plain,
            readable: false,
            writable: true
        }]
    );

    // Connect completes and the method offer goes out, still not reportable
    sockets.finish_connect(proxied_handle);
    let events = engine
        .wait(&mut sockets, &only(proxied_handle, Interest::WRITE), Some(Duration::from_millis(10)))
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(sockets.take_sent(proxied_handle), vec![5, 2, 0, 2]);
    assert!(matches!(
        engine.registry().get(id).map(|s| s.state()),
        Some(SessionState::Receiving { .. })
    ));

    sockets.push_inbound(proxied_handle, &[5, 0]);
    sockets.push_inbound(proxied_handle, &SOCKS5_CONNECT_OK);
    let events = engine
        .wait(&mut sockets, &only(proxied_handle, Interest::WRITE), None)
        .unwrap();
    assert_eq!(
        events,
        vec![Event {
            handle: proxied_handle,
            readable: false,
            writable: true
        }]
    );
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Done)
    ));
}

#[test]
fn test_multiplexer_reports_failure_as_readiness() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);

    let id = proxied(&mut engine, &mut sockets, handle);
    sockets.push_inbound(handle, &[5, 0]);
    sockets.push_inbound(handle, &[5, 2, 0, 1, 0, 0, 0, 0, 0, 0]);

    let events = engine
        .wait(&mut sockets, &only(handle, Interest::BOTH), None)
        .unwrap();
    assert_eq!(
        events,
        vec![Event {
            handle,
            readable: true,
            writable: true
        }]
    );
    assert!(matches!(
        engine.poll_progress(&mut sockets, id),
        Ok(StepOutcome::Failed(SessionError::Protocol(ProtocolError::Socks5Failed(
            Socks5ReplyCode::ConnectionNotAllowed
        ))))
    ));
}

#[test]
fn test_sessions_progress_independently() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let first = sockets.add(3, ConnectMode::Immediate);
    let second = sockets.add(4, ConnectMode::Immediate);

    let first_id = proxied(&mut engine, &mut sockets, first);
    let second_id = proxied(&mut engine, &mut sockets, second);
    assert!(first_id < second_id);

    // Only the second server answers
    sockets.push_inbound(second, &[5, 0]);
    sockets.push_inbound(second, &SOCKS5_CONNECT_OK);
    let interest: InterestSet = [(first, Interest::WRITE), (second, Interest::WRITE)]
        .into_iter()
        .collect();
    let events = engine.wait(&mut sockets, &interest, None).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].handle, second);

    assert!(matches!(
        engine.poll_progress(&mut sockets, first_id),
        Ok(StepOutcome::InProgress(Interest::READ))
    ));
    assert!(matches!(
        engine.poll_progress(&mut sockets, second_id),
        Ok(StepOutcome::Done)
    ));
}

#[test]
fn test_close_during_negotiation() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Deferred);

    let id = proxied(&mut engine, &mut sockets, handle);
    assert_eq!(engine.notify_closed(handle), Some(id));
    assert!(engine.registry().is_empty());
    assert!(engine.poll_progress(&mut sockets, id).is_err());

    // The handle is free for a new attempt
    let again = proxied(&mut engine, &mut sockets, handle);
    assert_ne!(again, id);
}

#[test]
fn test_path_server_used_for_matching_destination() {
    let routes = TestConfigBuilder::new()
        .path("10.0.0.2", &["203.0.113.0/24"])
        .build();
    let mut engine = Socksifier::new(&routes, CredentialSource::new(None, None, None));
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);

    proxied(&mut engine, &mut sockets, handle);
    assert_eq!(
        sockets.socket(handle).connected_to,
        Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1080))
    );
    // Paths default to SOCKS4 with an empty user id
    assert_eq!(
        sockets.take_sent(handle),
        vec![4, 1, 1, 187, 203, 0, 113, 7, 0]
    );
}

#[test]
fn test_direct_attempt_discards_finished_session() {
    let routes = TestConfigBuilder::new().build();
    let mut engine = Socksifier::new(&routes, CredentialSource::default());
    let mut sockets = ScriptedSockets::new();
    let handle = sockets.add(3, ConnectMode::Immediate);
    sockets.push_inbound(handle, &[5, 0xFF]);

    // The negotiation fails and its outcome is never collected
    proxied(&mut engine, &mut sockets, handle);
    assert!(engine.registry().lookup(handle).is_some());

    // The program reuses the socket for a local destination
    let local = SocketAddrV4::new(Ipv4Addr::new(10, 9, 9, 9), 22);
    assert_eq!(
        engine.attempt(&mut sockets, handle, local, SocketKind::Stream),
        Ok(Attempt::Bypass)
    );
    assert_eq!(engine.registry().lookup(handle), None);

    // Nothing to read, and no stale failure reported as readiness
    let events = engine
        .wait(&mut sockets, &only(handle, Interest::READ), Some(Duration::from_millis(10)))
        .unwrap();
    assert!(events.is_empty());
}
