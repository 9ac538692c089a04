use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::SinkExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::codec::{FrameReader, StompCodec};
use crate::config::{FailoverConfig, HostSpec};
use crate::error::StompError;
use crate::failover::FailoverState;
use crate::frame::Frame;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{BoxedStream, open_stream};

type Reader = FrameReader<ReadHalf<BoxedStream>>;
type Writer = FramedWrite<WriteHalf<BoxedStream>, StompCodec>;

/// Observer for connection lifecycle transitions.
///
/// Errors returned by a listener are logged and swallowed; they never
/// propagate into protocol handling.
pub trait ConnectionListener: Send + Sync {
    fn on_connecting(&self, host: &HostSpec) -> Result<(), Box<dyn std::error::Error>> {
        let _ = host;
        Ok(())
    }
    fn on_connected(&self, host: &HostSpec) -> Result<(), Box<dyn std::error::Error>> {
        let _ = host;
        Ok(())
    }
    fn on_connect_failed(
        &self,
        host: &HostSpec,
        error: &StompError,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let _ = (host, error);
        Ok(())
    }
    fn on_disconnected(&self) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}

/// Per-call options for [`Connection::unreceive_with`].
#[derive(Debug, Clone)]
pub struct UnreceiveOptions {
    /// Destination for messages that spent their redelivery budget.
    pub dead_letter_queue: String,
    pub max_redeliveries: u32,
}

impl Default for UnreceiveOptions {
    fn default() -> Self {
        Self {
            dead_letter_queue: "/queue/DLQ".to_string(),
            max_redeliveries: 6,
        }
    }
}

/// State guarded by the unified connection lock: the read half of the
/// socket plus everything the reconnect loop mutates. Holding this lock is
/// what keeps handshake traffic from interleaving with an in-flight read.
struct ConnState {
    reader: Option<Reader>,
    failover: FailoverState,
    last_failure: Option<String>,
}

struct Inner {
    config: FailoverConfig,
    /// Unified connection lock: read half + reconnect machinery.
    conn: Mutex<ConnState>,
    /// Independent write lock, so senders never wait behind a blocked
    /// read. Lock order is always `conn` before `writer`.
    writer: Mutex<Option<Writer>>,
    registry: Mutex<SubscriptionRegistry>,
    closed: AtomicBool,
    /// Set on any I/O failure; tells the next operation the socket is
    /// stale and `ensure_socket` must run.
    failed: AtomicBool,
    listener: Option<Arc<dyn ConnectionListener>>,
}

/// A STOMP client connection with multi-host failover.
///
/// Cloning yields another handle to the same connection. Operations may be
/// invoked from multiple tasks concurrently: writes are serialized by the
/// write lock, reads (and the reconnect handshake) by the connection lock,
/// and the two proceed independently of each other.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .field("failed", &self.inner.failed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect to the first reachable host in the config.
    ///
    /// In reliable mode this retries through the failover loop until a
    /// handshake completes or the attempt budget is exhausted; otherwise
    /// the first failure is returned as-is.
    pub async fn open(config: FailoverConfig) -> Result<Self, StompError> {
        Self::open_inner(config, None).await
    }

    /// Like [`Connection::open`], with a lifecycle listener.
    pub async fn open_with_listener(
        config: FailoverConfig,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self, StompError> {
        Self::open_inner(config, Some(listener)).await
    }

    async fn open_inner(
        config: FailoverConfig,
        listener: Option<Arc<dyn ConnectionListener>>,
    ) -> Result<Self, StompError> {
        if config.hosts.is_empty() {
            return Err(StompError::Config("at least one host is required".into()));
        }
        let failover = FailoverState::new(&config);
        let connection = Connection {
            inner: Arc::new(Inner {
                conn: Mutex::new(ConnState {
                    reader: None,
                    failover,
                    last_failure: None,
                }),
                writer: Mutex::new(None),
                registry: Mutex::new(SubscriptionRegistry::default()),
                closed: AtomicBool::new(false),
                failed: AtomicBool::new(true),
                listener,
                config,
            }),
        };
        {
            let mut state = connection.inner.conn.lock().await;
            connection.ensure_socket(&mut state).await?;
        }
        Ok(connection)
    }

    /// Whether an explicit disconnect has closed this connection.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Description of the most recent connect failure, if any.
    pub async fn last_failure(&self) -> Option<String> {
        self.inner.conn.lock().await.last_failure.clone()
    }

    /// Send a message body to a destination.
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new("SEND").header("destination", destination);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        self.transmit(frame.set_body(body)).await
    }

    /// Subscribe to a destination.
    ///
    /// When reliable, the subscription is recorded under `sub_id`
    /// (defaulting to the destination) and transparently replayed after
    /// every reconnect.
    pub async fn subscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        sub_id: Option<&str>,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new("SUBSCRIBE").header("destination", destination);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        let stored = frame.headers.clone();
        self.transmit(frame).await?;

        if self.inner.config.reliable {
            let id = sub_id.unwrap_or(destination).to_string();
            let mut registry = self.inner.registry.lock().await;
            registry.insert(Subscription {
                id,
                destination: destination.to_string(),
                headers: stored,
            });
        }
        Ok(())
    }

    /// Unsubscribe from a destination, dropping the registry entry so it
    /// is no longer replayed on reconnect.
    pub async fn unsubscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        sub_id: Option<&str>,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new("UNSUBSCRIBE").header("destination", destination);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        self.transmit(frame).await?;

        if self.inner.config.reliable {
            let id = sub_id.unwrap_or(destination);
            self.inner.registry.lock().await.remove(id);
        }
        Ok(())
    }

    /// Acknowledge a message received under `ack:client`. A
    /// `("transaction", id)` entry in `headers` scopes the ack to an open
    /// transaction.
    pub async fn ack(
        &self,
        message_id: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new("ACK").header("message-id", message_id);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        self.transmit(frame).await
    }

    /// Begin a named transaction.
    pub async fn begin(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new("BEGIN").header("transaction", transaction))
            .await
    }

    /// Commit a named transaction.
    pub async fn commit(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new("COMMIT").header("transaction", transaction))
            .await
    }

    /// Abort a named transaction.
    pub async fn abort(&self, transaction: &str) -> Result<(), StompError> {
        self.transmit(Frame::new("ABORT").header("transaction", transaction))
            .await
    }

    /// Send DISCONNECT (best effort) and close the connection. Further
    /// operations fail with [`StompError::Closed`].
    pub async fn disconnect(&self) -> Result<(), StompError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(sink) = writer.as_mut() {
                if let Err(err) = sink.send(Frame::new("DISCONNECT")).await {
                    debug!(error = %err, "DISCONNECT write failed");
                }
            }
            *writer = None;
        }
        self.inner.conn.lock().await.reader = None;
        self.notify(|l| l.on_disconnected());
        Ok(())
    }

    /// Block until a frame arrives. Returns `Ok(None)` on a clean end of
    /// stream; in reliable mode a clean EOF is treated as a stale socket
    /// and retried once on a fresh connection first.
    pub async fn receive(&self) -> Result<Option<Frame>, StompError> {
        match self.receive_once().await? {
            Some(frame) => Ok(Some(frame)),
            None if self.inner.config.reliable && !self.is_closed() => {
                debug!("end of stream while reliable, resetting connection");
                {
                    let mut state = self.inner.conn.lock().await;
                    state.reader = None;
                    self.inner.failed.store(true, Ordering::SeqCst);
                }
                self.receive_once().await
            }
            None => Ok(None),
        }
    }

    /// Non-blocking receive: `Ok(None)` immediately when no connection is
    /// up or no message bytes are pending, otherwise exactly one frame,
    /// finishing a partial frame the way `receive` would. Recoverable read
    /// failures follow the same reliable-mode reconnect policy as
    /// `receive`. Never runs concurrently with another receive or poll.
    pub async fn poll(&self) -> Result<Option<Frame>, StompError> {
        loop {
            if self.is_closed() {
                return Err(StompError::Closed);
            }
            let mut state = self.inner.conn.lock().await;
            if state.reader.is_none() {
                return Ok(None);
            }
            // a write failure may have marked the socket stale
            if self.inner.failed.load(Ordering::SeqCst) {
                self.ensure_socket(&mut state).await?;
            }
            let Some(reader) = state.reader.as_mut() else {
                continue;
            };
            match reader.poll_frame().await {
                Ok(result) => return Ok(result),
                Err(err) if self.inner.config.reliable && err.is_recoverable() => {
                    warn!(error = %err, "poll read failed, reconnecting");
                    state.reader = None;
                    self.inner.failed.store(true, Ordering::SeqCst);
                    self.ensure_socket(&mut state).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Transactionally requeue a failed message with an incremented
    /// `retry_count`, or forward it to the dead-letter queue once the
    /// redelivery budget is spent. Uses the config's dead-letter settings.
    pub async fn unreceive(&self, message: &Frame) -> Result<(), StompError> {
        let options = UnreceiveOptions {
            dead_letter_queue: self.inner.config.dead_letter_queue.clone(),
            max_redeliveries: self.inner.config.max_redeliveries,
        };
        self.unreceive_with(message, &options).await
    }

    /// [`Connection::unreceive`] with explicit options.
    ///
    /// All steps run inside one broker transaction named
    /// `transaction-{message-id}-{retry_count}` (the pre-increment count).
    /// Any failure aborts the transaction and surfaces the original error.
    pub async fn unreceive_with(
        &self,
        message: &Frame,
        options: &UnreceiveOptions,
    ) -> Result<(), StompError> {
        let message_id = message
            .get_header("message-id")
            .ok_or_else(|| StompError::Protocol("message has no message-id header".into()))?
            .to_string();
        let retry_count: u32 = message
            .get_header("retry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let transaction = format!("transaction-{}-{}", message_id, retry_count);

        self.begin(&transaction).await?;
        match self
            .redeliver(message, &message_id, retry_count, &transaction, options)
            .await
        {
            Ok(()) => self.commit(&transaction).await,
            Err(err) => {
                // surface the original error even when the abort fails too
                if let Err(abort_err) = self.abort(&transaction).await {
                    warn!(error = %abort_err, transaction = %transaction, "abort failed");
                }
                Err(err)
            }
        }
    }

    /// The in-transaction steps of unreceive: optional client ack, then
    /// resend or dead-letter forward with the bumped retry count.
    async fn redeliver(
        &self,
        message: &Frame,
        message_id: &str,
        retry_count: u32,
        transaction: &str,
        options: &UnreceiveOptions,
    ) -> Result<(), StompError> {
        let destination = message
            .get_header("destination")
            .ok_or_else(|| StompError::Protocol("message has no destination header".into()))?
            .to_string();

        let client_ack = {
            let registry = self.inner.registry.lock().await;
            registry
                .find_by_destination(&destination)
                .is_some_and(|sub| sub.ack_mode() == "client")
        };
        if client_ack {
            self.ack(
                message_id,
                vec![("transaction".to_string(), transaction.to_string())],
            )
            .await?;
        }

        // outgoing headers: the original set with the retry count bumped;
        // destination is re-added by send()
        let mut headers: Vec<(String, String)> = message
            .headers
            .iter()
            .filter(|(k, _)| k != "retry_count" && k != "destination")
            .cloned()
            .collect();
        headers.push(("retry_count".to_string(), (retry_count + 1).to_string()));
        headers.push(("transaction".to_string(), transaction.to_string()));

        if retry_count <= options.max_redeliveries {
            self.send(&destination, message.body.clone(), headers).await
        } else {
            headers.push(("persistent".to_string(), "true".to_string()));
            self.send(&options.dead_letter_queue, message.body.clone(), headers)
                .await
        }
    }

    /// Serialize and write one frame under the write lock, so one sender's
    /// bytes are never interleaved with another's. In reliable mode a
    /// recoverable write failure reconnects and retries the whole
    /// operation until success or exhaustion; otherwise it propagates.
    async fn transmit(&self, frame: Frame) -> Result<(), StompError> {
        loop {
            if self.is_closed() {
                return Err(StompError::Closed);
            }

            if !self.inner.failed.load(Ordering::SeqCst) {
                let mut writer = self.inner.writer.lock().await;
                if let Some(sink) = writer.as_mut() {
                    match sink.send(frame.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            self.inner.failed.store(true, Ordering::SeqCst);
                            warn!(error = %err, command = %frame.command, "frame write failed");
                            if !(self.inner.config.reliable && err.is_recoverable()) {
                                return Err(err);
                            }
                        }
                    }
                }
            }

            // stale or missing socket: reconnect (or fail) before retrying
            let mut state = self.inner.conn.lock().await;
            self.ensure_socket(&mut state).await?;
        }
    }

    async fn receive_once(&self) -> Result<Option<Frame>, StompError> {
        loop {
            if self.is_closed() {
                return Err(StompError::Closed);
            }
            let mut state = self.inner.conn.lock().await;
            self.ensure_socket(&mut state).await?;
            let Some(reader) = state.reader.as_mut() else {
                continue;
            };
            match reader.read_frame().await {
                Ok(result) => return Ok(result),
                Err(err) if self.inner.config.reliable && err.is_recoverable() => {
                    warn!(error = %err, "frame read failed, reconnecting");
                    state.reader = None;
                    self.inner.failed.store(true, Ordering::SeqCst);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Guarantee a connected, handshaken socket. Fast path: a reader
    /// exists and no failure is recorded. Otherwise run the failover loop:
    /// connect to the current host, handshake, replay subscriptions; on
    /// failure sleep the current delay, count the attempt, rotate to the
    /// next host and grow the delay. Never hands back a socket without a
    /// completed handshake.
    async fn ensure_socket(&self, state: &mut ConnState) -> Result<(), StompError> {
        if self.is_closed() {
            return Err(StompError::Closed);
        }
        if state.reader.is_some() && !self.inner.failed.load(Ordering::SeqCst) {
            return Ok(());
        }

        loop {
            self.inner.failed.store(false, Ordering::SeqCst);
            state.last_failure = None;
            state.reader = None;

            let host = match state.failover.current() {
                Some(host) => host.clone(),
                None => return Err(StompError::Config("at least one host is required".into())),
            };
            self.notify(|l| l.on_connecting(&host));
            match self.connect_once(&host).await {
                Ok((reader, writer)) => {
                    state.reader = Some(reader);
                    *self.inner.writer.lock().await = Some(writer);
                    state.failover.attempts = 0;
                    debug!(host = %host.host, port = host.port, "connected");
                    self.notify(|l| l.on_connected(&host));
                    return Ok(());
                }
                Err(err) => {
                    state.last_failure = Some(err.to_string());
                    self.inner.failed.store(true, Ordering::SeqCst);
                    self.notify(|l| l.on_connect_failed(&host, &err));
                    if !self.inner.config.reliable {
                        return Err(err);
                    }
                    if state.failover.exhausted(&self.inner.config) {
                        return Err(StompError::MaxReconnectAttemptsReached);
                    }
                    warn!(
                        host = %host.host,
                        port = host.port,
                        error = %err,
                        attempt = state.failover.attempts,
                        delay = ?state.failover.delay,
                        "connect failed, will retry"
                    );
                    tokio::time::sleep(state.failover.delay).await;
                    state.failover.attempts += 1;
                    state.failover.rotate();
                    state.failover.grow_delay(&self.inner.config);
                }
            }
        }
    }

    /// One connect attempt: open the transport, run the CONNECT/CONNECTED
    /// handshake and replay every registered subscription in original
    /// subscribe order.
    async fn connect_once(&self, host: &HostSpec) -> Result<(Reader, Writer), StompError> {
        let stream = open_stream(host).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FramedWrite::new(write_half, StompCodec::new());

        let mut connect = Frame::new("CONNECT");
        for (k, v) in &self.inner.config.connect_headers {
            connect = connect.header(k.clone(), v.clone());
        }
        connect = connect
            .header("login", host.login.clone())
            .header("passcode", host.passcode.clone());
        writer.send(connect).await?;

        match reader.read_frame().await? {
            Some(reply) if reply.command == "CONNECTED" => {}
            Some(reply) => {
                return Err(StompError::Protocol(format!(
                    "expected CONNECTED, server sent {}",
                    reply.command
                )));
            }
            None => {
                return Err(StompError::Protocol(
                    "connection closed before CONNECTED".into(),
                ));
            }
        }

        let replay: Vec<Frame> = {
            let registry = self.inner.registry.lock().await;
            registry
                .iter()
                .map(|sub| {
                    let mut frame = Frame::new("SUBSCRIBE");
                    for (k, v) in &sub.headers {
                        frame = frame.header(k.clone(), v.clone());
                    }
                    frame
                })
                .collect()
        };
        for frame in replay {
            writer.send(frame).await?;
        }

        Ok((reader, writer))
    }

    fn notify<F>(&self, call: F)
    where
        F: FnOnce(&dyn ConnectionListener) -> Result<(), Box<dyn std::error::Error>>,
    {
        if let Some(listener) = &self.inner.listener {
            if let Err(err) = call(listener.as_ref()) {
                warn!(error = %err, "connection listener failed");
            }
        }
    }
}
