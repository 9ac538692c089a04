//! Shared test helper: a minimal in-process STOMP broker over a real
//! TCP socket.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use osmium_stomp::frame::Frame;
use osmium_stomp::{FailoverConfig, HostSpec, StompCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

pub struct MockBroker {
    listener: TcpListener,
    port: u16,
}

/// One accepted client session, speaking framed STOMP.
pub struct BrokerSession {
    framed: Framed<TcpStream, StompCodec>,
}

impl MockBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> HostSpec {
        HostSpec::new("127.0.0.1", self.port)
    }

    /// Config pointing at this broker alone, with a short reconnect delay
    /// so failover paths run quickly under test.
    pub fn config(&self) -> FailoverConfig {
        let mut config = FailoverConfig::new(vec![self.host()]);
        config.initial_reconnect_delay = std::time::Duration::from_millis(5);
        config
    }

    /// Accept one client without any handshake handling.
    pub async fn accept_raw(&self) -> BrokerSession {
        let (stream, _) = self.listener.accept().await.unwrap();
        BrokerSession {
            framed: Framed::new(stream, StompCodec::new()),
        }
    }

    /// Accept one client and complete the CONNECT/CONNECTED handshake.
    pub async fn accept(&self) -> BrokerSession {
        let mut session = self.accept_raw().await;
        let connect = session.read_frame().await.expect("client closed early");
        assert_eq!(connect.command, "CONNECT");
        session.send_frame(Frame::new("CONNECTED")).await;
        session
    }
}

impl BrokerSession {
    pub async fn read_frame(&mut self) -> Option<Frame> {
        match self.framed.next().await {
            Some(result) => Some(result.expect("broker-side decode failed")),
            None => None,
        }
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("broker-side send failed");
    }

    /// Tear the session down with an RST instead of an orderly shutdown,
    /// so the peer observes a transport error rather than a clean EOF.
    pub fn abort(self) {
        let stream = self.framed.into_inner();
        let _ = stream.set_linger(Some(std::time::Duration::from_secs(0)));
    }
}
