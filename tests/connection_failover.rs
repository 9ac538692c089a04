//! Failover behavior over real sockets: host rotation, attempt budgets,
//! non-reliable fail-fast, subscription replay and lifecycle listeners.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use osmium_stomp::connection::ConnectionListener;
use osmium_stomp::frame::Frame;
use osmium_stomp::{Connection, FailoverConfig, HostSpec, StompError};
use support::MockBroker;

/// A port with nothing listening on it.
async fn dead_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn fast_config(hosts: Vec<HostSpec>) -> FailoverConfig {
    let mut config = FailoverConfig::new(hosts);
    config.initial_reconnect_delay = Duration::from_millis(5);
    config
}

#[tokio::test]
async fn dead_host_rotates_to_live_host() {
    let broker = MockBroker::bind().await;
    let dead = HostSpec::new("127.0.0.1", dead_port().await);
    let config = fast_config(vec![dead, broker.host()]);

    let accept = tokio::spawn(async move { broker.accept().await });
    let connection = Connection::open(config).await.expect("failover connect");
    let _session = accept.await.unwrap();

    assert!(!connection.is_closed());
    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn attempt_budget_exhaustion_surfaces_typed_error() {
    let dead = HostSpec::new("127.0.0.1", dead_port().await);
    let mut config = fast_config(vec![dead]);
    config.max_reconnect_attempts = 2;

    let err = Connection::open(config).await.unwrap_err();
    assert!(matches!(err, StompError::MaxReconnectAttemptsReached));
}

#[tokio::test]
async fn non_reliable_connect_fails_fast() {
    let dead = HostSpec::new("127.0.0.1", dead_port().await);
    let mut config = fast_config(vec![dead]);
    config.reliable = false;

    let err = Connection::open(config).await.unwrap_err();
    assert!(matches!(err, StompError::Transport(_)));
}

#[tokio::test]
async fn handshake_rejection_is_a_protocol_error() {
    let broker = MockBroker::bind().await;
    let mut config = broker.config();
    config.reliable = false;

    let server = tokio::spawn(async move {
        let mut session = broker.accept_raw().await;
        let connect = session.read_frame().await.expect("expected CONNECT");
        assert_eq!(connect.command, "CONNECT");
        session
            .send_frame(Frame::new("ERROR").header("message", "bad credentials"))
            .await;
    });

    let err = Connection::open(config).await.unwrap_err();
    assert!(matches!(err, StompError::Protocol(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn subscriptions_replay_in_order_after_reconnect() {
    let broker = MockBroker::bind().await;
    let config = broker.config();

    let server = tokio::spawn(async move {
        // first session: handshake, two subscriptions, then drop
        let mut session = broker.accept().await;
        assert_eq!(session.read_frame().await.unwrap().command, "SUBSCRIBE");
        assert_eq!(session.read_frame().await.unwrap().command, "SUBSCRIBE");
        drop(session);

        // second session: the client reconnects and replays both
        // subscriptions in original subscribe order
        let mut session = broker.accept().await;
        let first = session.read_frame().await.unwrap();
        assert_eq!(first.command, "SUBSCRIBE");
        assert_eq!(first.get_header("destination"), Some("/queue/a"));
        let second = session.read_frame().await.unwrap();
        assert_eq!(second.command, "SUBSCRIBE");
        assert_eq!(second.get_header("destination"), Some("/queue/b"));

        session
            .send_frame(
                Frame::new("MESSAGE")
                    .header("destination", "/queue/a")
                    .header("message-id", "m-1")
                    .set_body(b"after reconnect".to_vec()),
            )
            .await;
        session
    });

    let connection = Connection::open(config).await.unwrap();
    connection.subscribe("/queue/a", vec![], None).await.unwrap();
    connection.subscribe("/queue/b", vec![], None).await.unwrap();

    // the broker drops the first session; receive() must come back with
    // the message delivered on the replacement connection
    let frame = connection.receive().await.unwrap().expect("expected frame");
    assert_eq!(frame.command, "MESSAGE");
    assert_eq!(frame.body, b"after reconnect");

    drop(server.await.unwrap());
    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn connection_debug_reports_closed_state() {
    let broker = MockBroker::bind().await;
    let config = broker.config();

    let accept = tokio::spawn(async move { broker.accept().await });
    let connection = Connection::open(config).await.unwrap();
    let _session = accept.await.unwrap();

    assert!(format!("{:?}", connection).contains("closed: false"));
    connection.disconnect().await.unwrap();
    assert!(format!("{:?}", connection).contains("closed: true"));
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
    fail_on_connected: bool,
}

impl ConnectionListener for RecordingListener {
    fn on_connecting(&self, host: &HostSpec) -> Result<(), Box<dyn std::error::Error>> {
        self.events
            .lock()
            .unwrap()
            .push(format!("connecting:{}", host.port));
        Ok(())
    }

    fn on_connected(&self, host: &HostSpec) -> Result<(), Box<dyn std::error::Error>> {
        self.events
            .lock()
            .unwrap()
            .push(format!("connected:{}", host.port));
        if self.fail_on_connected {
            return Err("listener blew up".into());
        }
        Ok(())
    }

    fn on_connect_failed(
        &self,
        host: &HostSpec,
        _error: &StompError,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{}", host.port));
        Ok(())
    }

    fn on_disconnected(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.events.lock().unwrap().push("disconnected".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn listener_observes_lifecycle_in_order() {
    let broker = MockBroker::bind().await;
    let dead = dead_port().await;
    let config = fast_config(vec![HostSpec::new("127.0.0.1", dead), broker.host()]);
    let live = broker.port();

    let listener = Arc::new(RecordingListener::default());
    let accept = tokio::spawn(async move { broker.accept().await });
    let connection = Connection::open_with_listener(config, listener.clone())
        .await
        .unwrap();
    let _session = accept.await.unwrap();
    connection.disconnect().await.unwrap();

    let events = listener.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            format!("connecting:{}", dead),
            format!("failed:{}", dead),
            format!("connecting:{}", live),
            format!("connected:{}", live),
            "disconnected".to_string(),
        ]
    );
}

#[tokio::test]
async fn listener_errors_are_swallowed() {
    let broker = MockBroker::bind().await;
    let config = broker.config();
    let listener = Arc::new(RecordingListener {
        fail_on_connected: true,
        ..Default::default()
    });

    let accept = tokio::spawn(async move { broker.accept().await });
    let connection = Connection::open_with_listener(config, listener)
        .await
        .expect("listener failure must not break the connect");
    let _session = accept.await.unwrap();
    connection.disconnect().await.unwrap();
}
