//! Connection-level state machine.
//!
//! [`Connection::open`] drives the AMQP 0-9-1 handshake over a pluggable
//! transport: protocol header, `start`/`start-ok` (with optional
//! `secure`/`secure-ok` rounds), `tune`/`tune-ok`, `open`/`open-ok`. The
//! resulting connection owns both framers and the transport halves, and
//! exposes the primitives the reactor drives: [`Connection::read_frame`],
//! [`Connection::enqueue`], [`Connection::flush`] and the heartbeat
//! bookkeeping.
//!
//! # Lifecycle
//!
//! ```text
//! New -> Starting -> (Securing)* -> Tuning -> Opening -> Open -> Closing -> Closed
//! ```
//!
//! Any state may fall directly to `Closed` on a transport failure or a
//! `connection.close` from the broker.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::Duration;

use crate::codec::Encoder;
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{constants, Frame, FramePayload};
use crate::framer::{RecvFramer, SendFramer};
use crate::methods::{
    ConnectionClose, ConnectionOpen, ConnectionSecureOk, ConnectionStart, ConnectionStartOk,
    ConnectionTune, ConnectionTuneOk, Method, COMMAND_INVALID, REPLY_SUCCESS, SYNTAX_ERROR,
};
use crate::tracer::FrameTracer;
use crate::transport::{Transport, TransportRead, TransportWrite};
use crate::types::{FieldTable, FieldValue};

/// Fallback when both peers propose zero (no limit) for channel-max.
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

/// Fallback when both peers propose zero (no limit) for frame-max.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Starting,
    Securing,
    Tuning,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Client-side connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub user: String,
    pub password: String,
    pub virtual_host: String,
    /// Requested heartbeat interval in seconds; zero disables.
    pub heartbeat: u16,
    /// Requested frame-max in bytes; zero defers to the server.
    pub frame_max: u32,
    /// Requested channel-max; zero defers to the server.
    pub channel_max: u16,
    pub locale: String,
    /// Deadline for the whole handshake.
    pub connect_timeout: Duration,
    /// Extra entries merged into the client-properties table.
    pub client_properties: FieldTable,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            user: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            heartbeat: 60,
            frame_max: DEFAULT_FRAME_MAX,
            channel_max: 0,
            locale: "en_US".to_string(),
            connect_timeout: Duration::from_secs(10),
            client_properties: FieldTable::new(),
        }
    }
}

/// The limits both peers agreed on during tune. Zero keeps the wire
/// meaning "no limit"; the `effective_*` accessors apply the sane caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Tuning {
    pub fn effective_channel_max(&self) -> u16 {
        if self.channel_max == 0 {
            DEFAULT_CHANNEL_MAX
        } else {
            self.channel_max
        }
    }

    pub fn effective_frame_max(&self) -> u32 {
        if self.frame_max == 0 {
            DEFAULT_FRAME_MAX
        } else {
            self.frame_max
        }
    }
}

fn min_nonzero<T: Ord + Copy + Default>(a: T, b: T) -> T {
    let zero = T::default();
    match (a > zero, b > zero) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => zero,
    }
}

/// Apply the negotiation rule: pick the minimum of the nonzero proposals;
/// a zero is dominated by the other side. Frame-max may never drop below
/// 4096.
pub fn negotiate(options: &ConnectionOptions, tune: &ConnectionTune) -> Tuning {
    let channel_max = min_nonzero(options.channel_max, tune.channel_max);
    let mut frame_max = min_nonzero(options.frame_max, tune.frame_max);
    if frame_max != 0 && frame_max < constants::FRAME_MIN_SIZE {
        frame_max = constants::FRAME_MIN_SIZE;
    }
    let heartbeat = min_nonzero(options.heartbeat, tune.heartbeat);
    Tuning {
        channel_max,
        frame_max,
        heartbeat,
    }
}

fn default_client_properties(options: &ConnectionOptions) -> FieldTable {
    let mut capabilities = FieldTable::new();
    capabilities.insert("consumer_cancel_notify", FieldValue::Boolean(true));
    capabilities.insert("publisher_confirms", FieldValue::Boolean(true));

    let mut properties = FieldTable::new();
    properties.insert("product", FieldValue::from(env!("CARGO_PKG_NAME")));
    properties.insert("version", FieldValue::from(env!("CARGO_PKG_VERSION")));
    properties.insert("platform", FieldValue::from("Rust"));
    properties.insert("capabilities", FieldValue::Table(capabilities));
    for (name, value) in options.client_properties.iter() {
        properties.insert(name, value.clone());
    }
    properties
}

/// Build the SASL response for the mechanism chosen from the server's
/// space-separated offer. PLAIN is preferred, AMQPLAIN is the fallback.
fn sasl_response(mechanisms: &[u8], options: &ConnectionOptions) -> AmqpResult<(String, Vec<u8>)> {
    let offered = String::from_utf8_lossy(mechanisms);
    let offered: Vec<&str> = offered.split_whitespace().collect();

    if offered.contains(&"PLAIN") {
        let mut response = Vec::with_capacity(options.user.len() + options.password.len() + 2);
        response.push(0);
        response.extend_from_slice(options.user.as_bytes());
        response.push(0);
        response.extend_from_slice(options.password.as_bytes());
        return Ok(("PLAIN".to_string(), response));
    }

    if offered.contains(&"AMQPLAIN") {
        // an AMQPLAIN response is the body of a field table without the
        // outer length prefix
        let mut enc = Encoder::new();
        enc.put_shortstr("LOGIN")?;
        enc.put_octet(b'S');
        enc.put_longstr(options.user.as_bytes())?;
        enc.put_shortstr("PASSWORD")?;
        enc.put_octet(b'S');
        enc.put_longstr(options.password.as_bytes())?;
        return Ok(("AMQPLAIN".to_string(), enc.finish().to_vec()));
    }

    Err(AmqpError::connection_failed(format!(
        "no supported SASL mechanism in server offer: {:?}",
        offered
    )))
}

/// An established (or establishing) AMQP connection.
pub struct Connection {
    state: ConnectionState,
    reader: Box<dyn TransportRead>,
    writer: Box<dyn TransportWrite>,
    recv: RecvFramer,
    send: SendFramer,
    tuning: Tuning,
    server_properties: FieldTable,
    last_tx: Instant,
    last_rx: Instant,
    tracer: Option<Arc<dyn FrameTracer>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("tuning", &self.tuning)
            .field("server_properties", &self.server_properties)
            .field("last_tx", &self.last_tx)
            .field("last_rx", &self.last_rx)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Run the full handshake over `transport` and return the open
    /// connection. The whole exchange is bounded by
    /// `options.connect_timeout`.
    pub async fn open(
        transport: Box<dyn Transport>,
        options: &ConnectionOptions,
        tracer: Option<Arc<dyn FrameTracer>>,
    ) -> AmqpResult<Connection> {
        let deadline = options.connect_timeout;
        tokio::time::timeout(deadline, Self::handshake(transport, options, tracer))
            .await
            .map_err(|_| AmqpError::timeout("AMQP handshake"))?
    }

    async fn handshake(
        transport: Box<dyn Transport>,
        options: &ConnectionOptions,
        tracer: Option<Arc<dyn FrameTracer>>,
    ) -> AmqpResult<Connection> {
        let (reader, writer) = transport.split();
        let mut conn = Connection {
            state: ConnectionState::New,
            reader,
            writer,
            recv: RecvFramer::new(DEFAULT_FRAME_MAX),
            send: SendFramer::new(),
            tuning: Tuning {
                channel_max: 0,
                frame_max: 0,
                heartbeat: 0,
            },
            server_properties: FieldTable::new(),
            last_tx: Instant::now(),
            last_rx: Instant::now(),
            tracer,
        };

        conn.writer.write_all(constants::PROTOCOL_HEADER).await?;
        conn.last_tx = Instant::now();
        conn.state = ConnectionState::Starting;

        let mut response_cache: Option<Vec<u8>> = None;
        loop {
            let frame = conn.read_frame().await?;
            if frame.channel != 0 {
                return Err(AmqpError::protocol(
                    COMMAND_INVALID,
                    "non-zero channel during handshake",
                ));
            }
            let method = match frame.payload {
                FramePayload::Method(method) => method,
                FramePayload::Heartbeat => continue,
                other => {
                    return Err(AmqpError::protocol(
                        COMMAND_INVALID,
                        format!("unexpected frame during handshake: {:?}", other),
                    ))
                }
            };

            match (conn.state, method) {
                (ConnectionState::Starting, Method::ConnectionStart(start)) => {
                    conn.on_start(start, options, &mut response_cache).await?;
                }
                (
                    ConnectionState::Tuning | ConnectionState::Securing,
                    Method::ConnectionSecure(_),
                ) => {
                    // repeat the SASL response for each challenge round
                    let response = response_cache.clone().ok_or_else(|| {
                        AmqpError::protocol(COMMAND_INVALID, "secure before start")
                    })?;
                    conn.state = ConnectionState::Securing;
                    conn.send_now(
                        &[Frame::method(
                            0,
                            Method::ConnectionSecureOk(ConnectionSecureOk { response }),
                        )],
                        false,
                    )
                    .await?;
                }
                (
                    ConnectionState::Tuning | ConnectionState::Securing,
                    Method::ConnectionTune(tune),
                ) => {
                    conn.on_tune(tune, options).await?;
                }
                (ConnectionState::Opening, Method::ConnectionOpenOk) => {
                    conn.state = ConnectionState::Open;
                    log::info!(
                        "connection open: vhost={} channel_max={} frame_max={} heartbeat={}s",
                        options.virtual_host,
                        conn.tuning.channel_max,
                        conn.tuning.frame_max,
                        conn.tuning.heartbeat
                    );
                    return Ok(conn);
                }
                (_, Method::ConnectionClose(close)) => {
                    conn.send_now(&[Frame::method(0, Method::ConnectionCloseOk)], true)
                        .await
                        .ok();
                    conn.state = ConnectionState::Closed;
                    return Err(AmqpError::RemoteConnection {
                        code: close.reply_code,
                        text: close.reply_text,
                        class_id: close.class_id,
                        method_id: close.method_id,
                    });
                }
                (state, method) => {
                    return Err(AmqpError::protocol(
                        COMMAND_INVALID,
                        format!("{} in handshake state {:?}", method.name(), state),
                    ));
                }
            }
        }
    }

    async fn on_start(
        &mut self,
        start: ConnectionStart,
        options: &ConnectionOptions,
        response_cache: &mut Option<Vec<u8>>,
    ) -> AmqpResult<()> {
        if (start.version_major, start.version_minor) != (0, 9) {
            return Err(AmqpError::connection_failed(format!(
                "server speaks AMQP {}.{}, need 0.9",
                start.version_major, start.version_minor
            )));
        }
        let (mechanism, response) = sasl_response(&start.mechanisms, options)?;
        *response_cache = Some(response.clone());
        self.server_properties = start.server_properties;

        let start_ok = Method::ConnectionStartOk(ConnectionStartOk {
            client_properties: default_client_properties(options),
            mechanism,
            response,
            locale: options.locale.clone(),
        });
        self.state = ConnectionState::Tuning;
        self.send_now(&[Frame::method(0, start_ok)], false).await
    }

    async fn on_tune(&mut self, tune: ConnectionTune, options: &ConnectionOptions) -> AmqpResult<()> {
        self.tuning = negotiate(options, &tune);
        self.recv.set_frame_max(self.tuning.effective_frame_max());

        let tune_ok = Method::ConnectionTuneOk(ConnectionTuneOk {
            channel_max: self.tuning.channel_max,
            frame_max: self.tuning.frame_max,
            heartbeat: self.tuning.heartbeat,
        });
        let open = Method::ConnectionOpen(ConnectionOpen {
            virtual_host: options.virtual_host.clone(),
        });
        self.state = ConnectionState::Opening;
        self.send_now(
            &[Frame::method(0, tune_ok), Frame::method(0, open)],
            false,
        )
        .await
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn tuning(&self) -> Tuning {
        self.tuning
    }

    /// Properties the server announced in `connection.start`.
    pub fn server_properties(&self) -> &FieldTable {
        &self.server_properties
    }

    /// Seconds since the last frame arrived.
    pub fn since_last_rx(&self) -> Duration {
        self.last_rx.elapsed()
    }

    /// Read the next whole frame, blocking until enough bytes arrive.
    /// Cancel-safe: a cancelled call leaves partial input buffered in the
    /// receive framer.
    pub async fn read_frame(&mut self) -> AmqpResult<Frame> {
        loop {
            // a payload that fails to parse is a peer fault; escalate it
            // to a connection-fatal syntax error
            let parsed = self.recv.next_frame().map_err(|err| match err {
                AmqpError::Decoding(msg) => AmqpError::protocol(SYNTAX_ERROR, msg),
                other => other,
            })?;
            if let Some(frame) = parsed {
                self.last_rx = Instant::now();
                if let Some(tracer) = &self.tracer {
                    tracer.frame_received(&frame);
                }
                return Ok(frame);
            }
            let n = self.reader.read_some(self.recv.buffer_mut()).await?;
            if n == 0 {
                self.state = ConnectionState::Closed;
                return Err(AmqpError::connection_failed("peer closed the connection"));
            }
        }
    }

    /// Queue frames for the next flush.
    pub fn enqueue(&mut self, frames: &[Frame], priority: bool) -> AmqpResult<()> {
        if let Some(tracer) = &self.tracer {
            for frame in frames {
                tracer.frame_sent(frame);
            }
        }
        self.send.enqueue(frames, priority)
    }

    /// Write everything queued as one contiguous buffer per burst.
    pub async fn flush(&mut self) -> AmqpResult<()> {
        let mut wrote = false;
        while let Some(burst) = self.send.drain() {
            self.writer.write_all(&burst).await?;
            wrote = true;
        }
        if wrote {
            self.last_tx = Instant::now();
        }
        Ok(())
    }

    /// Enqueue and flush in one step.
    pub async fn send_now(&mut self, frames: &[Frame], priority: bool) -> AmqpResult<()> {
        self.enqueue(frames, priority)?;
        self.flush().await
    }

    /// Heartbeat generation and watchdog, called from the reactor tick.
    /// Queues a heartbeat when the line has been idle for a heartbeat
    /// period; fails when nothing arrived for two periods.
    pub fn maintain_heartbeat(&mut self) -> AmqpResult<()> {
        let heartbeat = self.tuning.heartbeat;
        if heartbeat == 0 || self.state != ConnectionState::Open {
            return Ok(());
        }
        let period = Duration::from_secs(heartbeat as u64);
        if self.last_rx.elapsed() >= period * 2 {
            self.state = ConnectionState::Closed;
            return Err(AmqpError::connection_failed(format!(
                "no traffic from broker for {}s (heartbeat {}s)",
                self.last_rx.elapsed().as_secs(),
                heartbeat
            )));
        }
        if self.last_tx.elapsed() >= period {
            self.enqueue(&[Frame::heartbeat()], true)?;
        }
        Ok(())
    }

    /// Orderly close: send `connection.close`, wait up to one second for
    /// `close-ok`, then drop the transport unconditionally.
    pub async fn close(&mut self, code: u16, text: &str) -> AmqpResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closing;
        let close = Method::ConnectionClose(ConnectionClose {
            reply_code: code,
            reply_text: text.to_string(),
            class_id: 0,
            method_id: 0,
        });
        // best effort from here on: the peer may already be gone
        let _ = self.send_now(&[Frame::method(0, close)], true).await;

        let wait = async {
            loop {
                match self.read_frame().await {
                    Ok(frame) => {
                        if let FramePayload::Method(Method::ConnectionCloseOk) = frame.payload {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(1), wait).await;

        let _ = self.writer.shutdown().await;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Graceful shutdown initiated by the client.
    pub async fn close_ok(&mut self) -> AmqpResult<()> {
        self.close(REPLY_SUCCESS, "client shutdown").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockBroker;
    use crate::transport::DuplexTransport;
    use crate::methods::ConnectionSecure;

    #[test]
    fn test_negotiate_min_nonzero() {
        let options = ConnectionOptions {
            channel_max: 100,
            frame_max: 65536,
            heartbeat: 30,
            ..Default::default()
        };
        let tune = ConnectionTune {
            channel_max: 2047,
            frame_max: 131072,
            heartbeat: 60,
        };
        let tuning = negotiate(&options, &tune);
        assert_eq!(tuning.channel_max, 100);
        assert_eq!(tuning.frame_max, 65536);
        assert_eq!(tuning.heartbeat, 30);
    }

    #[test]
    fn test_negotiate_zero_is_dominated() {
        let options = ConnectionOptions {
            channel_max: 0,
            frame_max: 0,
            heartbeat: 0,
            ..Default::default()
        };
        let tune = ConnectionTune {
            channel_max: 128,
            frame_max: 8192,
            heartbeat: 10,
        };
        let tuning = negotiate(&options, &tune);
        assert_eq!(tuning.channel_max, 128);
        assert_eq!(tuning.frame_max, 8192);
        assert_eq!(tuning.heartbeat, 10);
    }

    #[test]
    fn test_negotiate_both_zero_unbounded() {
        let options = ConnectionOptions {
            channel_max: 0,
            frame_max: 0,
            heartbeat: 0,
            ..Default::default()
        };
        let tune = ConnectionTune {
            channel_max: 0,
            frame_max: 0,
            heartbeat: 0,
        };
        let tuning = negotiate(&options, &tune);
        assert_eq!(tuning.channel_max, 0);
        assert_eq!(tuning.frame_max, 0);
        assert_eq!(tuning.heartbeat, 0);
        assert_eq!(tuning.effective_channel_max(), DEFAULT_CHANNEL_MAX);
        assert_eq!(tuning.effective_frame_max(), DEFAULT_FRAME_MAX);
    }

    #[test]
    fn test_frame_max_clamped_to_minimum() {
        let options = ConnectionOptions {
            frame_max: 1024,
            ..Default::default()
        };
        let tune = ConnectionTune {
            channel_max: 0,
            frame_max: 2048,
            heartbeat: 0,
        };
        assert_eq!(negotiate(&options, &tune).frame_max, constants::FRAME_MIN_SIZE);
    }

    #[test]
    fn test_sasl_plain_preferred() {
        let options = ConnectionOptions::default();
        let (mechanism, response) = sasl_response(b"PLAIN AMQPLAIN", &options).unwrap();
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(response, b"\x00guest\x00guest");
    }

    #[test]
    fn test_sasl_amqplain_fallback() {
        let options = ConnectionOptions::default();
        let (mechanism, response) = sasl_response(b"AMQPLAIN EXTERNAL", &options).unwrap();
        assert_eq!(mechanism, "AMQPLAIN");
        // field-table body without the outer length prefix
        assert!(response.starts_with(&[5][..]));
        assert!(response.windows(5).any(|w| w == b"LOGIN"));
        assert!(response.windows(8).any(|w| w == b"PASSWORD"));
    }

    #[test]
    fn test_sasl_no_mechanism() {
        let options = ConnectionOptions::default();
        assert!(sasl_response(b"EXTERNAL", &options).is_err());
    }

    #[tokio::test]
    async fn test_handshake_happy_path() {
        let (transport, server) = MockBroker::pair();
        let broker = tokio::spawn(async move {
            let mut broker = server;
            broker.expect_protocol_header().await;
            broker.send_start().await;
            let start_ok = broker.expect_start_ok().await;
            assert_eq!(start_ok.mechanism, "PLAIN");
            assert_eq!(start_ok.response, b"\x00guest\x00guest");
            broker.send_tune(0, 131072, 60).await;
            let tune_ok = broker.expect_tune_ok().await;
            assert_eq!(tune_ok.frame_max, 131072);
            assert_eq!(tune_ok.heartbeat, 60);
            let open = broker.expect_open().await;
            assert_eq!(open.virtual_host, "/");
            broker.send_open_ok().await;
            broker
        });

        let conn = Connection::open(Box::new(transport), &ConnectionOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.tuning().frame_max, 131072);
        assert_eq!(conn.tuning().effective_channel_max(), DEFAULT_CHANNEL_MAX);
        assert_eq!(
            conn.server_properties().get("product").and_then(|v| v.as_str()),
            Some("mock-broker")
        );
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_with_secure_round() {
        let (transport, server) = MockBroker::pair();
        let broker = tokio::spawn(async move {
            let mut broker = server;
            broker.expect_protocol_header().await;
            broker.send_start().await;
            broker.expect_start_ok().await;
            broker
                .send_method(0, Method::ConnectionSecure(ConnectionSecure {
                    challenge: b"again".to_vec(),
                }))
                .await;
            let secure_ok = broker.expect_secure_ok().await;
            assert_eq!(secure_ok.response, b"\x00guest\x00guest");
            broker.send_tune(0, 131072, 0).await;
            broker.expect_tune_ok().await;
            broker.expect_open().await;
            broker.send_open_ok().await;
        });

        let conn = Connection::open(Box::new(transport), &ConnectionOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_auth_refused() {
        let (transport, server) = MockBroker::pair();
        let broker = tokio::spawn(async move {
            let mut broker = server;
            broker.expect_protocol_header().await;
            broker.send_start().await;
            broker.expect_start_ok().await;
            broker
                .send_method(0, Method::ConnectionClose(ConnectionClose {
                    reply_code: crate::methods::ACCESS_REFUSED,
                    reply_text: "ACCESS_REFUSED".into(),
                    class_id: 0,
                    method_id: 0,
                }))
                .await;
            broker.expect_close_ok().await;
        });

        let err = Connection::open(Box::new(transport), &ConnectionOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AmqpError::RemoteConnection { code: 403, .. }));
        assert!(!err.recoverable());
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (client, _server) = tokio::io::duplex(4096);
        let options = ConnectionOptions {
            connect_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let err = Connection::open(Box::new(DuplexTransport::new(client)), &options, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AmqpError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_orderly_close() {
        let (transport, server) = MockBroker::pair();
        let broker = tokio::spawn(async move {
            let mut broker = server;
            broker.run_handshake().await;
            let close = broker.expect_connection_close().await;
            assert_eq!(close.reply_code, REPLY_SUCCESS);
            broker.send_method(0, Method::ConnectionCloseOk).await;
        });

        let mut conn =
            Connection::open(Box::new(transport), &ConnectionOptions::default(), None)
                .await
                .unwrap();
        conn.close_ok().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        broker.await.unwrap();
    }
}
