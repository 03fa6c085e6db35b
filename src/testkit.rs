//! Scripted broker side for tests.
//!
//! A [`MockBroker`] holds the far end of a transport and speaks raw AMQP
//! frames through the same codec the client uses, so handshake and
//! content scenarios can be driven deterministically without a real
//! broker.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::content::{BasicProperties, ContentHeader};
use crate::frame::{constants, Frame, FramePayload};
use crate::framer::RecvFramer;
use crate::methods::{
    ConnectionClose, ConnectionOpen, ConnectionSecureOk, ConnectionStart, ConnectionStartOk,
    ConnectionTune, ConnectionTuneOk, Method,
};
use crate::transport::DuplexTransport;
use crate::types::{FieldTable, FieldValue};

pub(crate) struct MockBroker {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    framer: RecvFramer,
}

impl MockBroker {
    /// A client transport and the broker holding its far end.
    pub(crate) fn pair() -> (DuplexTransport, MockBroker) {
        let (client, server) = tokio::io::duplex(1 << 20);
        (DuplexTransport::new(client), MockBroker::over(server))
    }

    pub(crate) fn over<S>(stream: S) -> MockBroker
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        MockBroker {
            reader: Box::new(reader),
            writer: Box::new(writer),
            framer: RecvFramer::new(1 << 20),
        }
    }

    pub(crate) async fn expect_protocol_header(&mut self) {
        let mut header = [0u8; 8];
        self.reader.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, constants::PROTOCOL_HEADER);
    }

    pub(crate) async fn read_frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.framer.next_frame().unwrap() {
                return frame;
            }
            let n = self
                .reader
                .read_buf(self.framer.buffer_mut())
                .await
                .unwrap();
            assert!(n > 0, "client closed the transport mid-script");
        }
    }

    /// Read the next method frame, skipping heartbeats.
    pub(crate) async fn read_method(&mut self) -> (u16, Method) {
        loop {
            let frame = self.read_frame().await;
            match frame.payload {
                FramePayload::Method(method) => return (frame.channel, method),
                FramePayload::Heartbeat => continue,
                other => panic!("expected a method frame, got {:?}", other),
            }
        }
    }

    pub(crate) async fn send_frame(&mut self, frame: Frame) {
        let bytes = frame.to_bytes().unwrap();
        self.writer.write_all(&bytes).await.unwrap();
    }

    pub(crate) async fn send_method(&mut self, channel: u16, method: Method) {
        self.send_frame(Frame::method(channel, method)).await;
    }

    /// Send a complete content message: header frame plus body fragments.
    pub(crate) async fn send_content(
        &mut self,
        channel: u16,
        properties: BasicProperties,
        body: &[u8],
        fragment_size: usize,
    ) {
        self.send_frame(Frame::header(
            channel,
            ContentHeader::new(body.len() as u64, properties),
        ))
        .await;
        for chunk in body.chunks(fragment_size.max(1)) {
            self.send_frame(Frame::body(channel, Bytes::copy_from_slice(chunk)))
                .await;
        }
    }

    pub(crate) async fn send_start(&mut self) {
        let mut properties = FieldTable::new();
        properties.insert("product", FieldValue::from("mock-broker"));
        self.send_method(
            0,
            Method::ConnectionStart(ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: properties,
                mechanisms: b"PLAIN AMQPLAIN".to_vec(),
                locales: b"en_US".to_vec(),
            }),
        )
        .await;
    }

    pub(crate) async fn send_tune(&mut self, channel_max: u16, frame_max: u32, heartbeat: u16) {
        self.send_method(
            0,
            Method::ConnectionTune(ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            }),
        )
        .await;
    }

    pub(crate) async fn send_open_ok(&mut self) {
        self.send_method(0, Method::ConnectionOpenOk).await;
    }

    pub(crate) async fn expect_start_ok(&mut self) -> ConnectionStartOk {
        match self.read_method().await {
            (0, Method::ConnectionStartOk(m)) => m,
            other => panic!("expected connection.start-ok, got {:?}", other),
        }
    }

    pub(crate) async fn expect_secure_ok(&mut self) -> ConnectionSecureOk {
        match self.read_method().await {
            (0, Method::ConnectionSecureOk(m)) => m,
            other => panic!("expected connection.secure-ok, got {:?}", other),
        }
    }

    pub(crate) async fn expect_tune_ok(&mut self) -> ConnectionTuneOk {
        match self.read_method().await {
            (0, Method::ConnectionTuneOk(m)) => m,
            other => panic!("expected connection.tune-ok, got {:?}", other),
        }
    }

    pub(crate) async fn expect_open(&mut self) -> ConnectionOpen {
        match self.read_method().await {
            (0, Method::ConnectionOpen(m)) => m,
            other => panic!("expected connection.open, got {:?}", other),
        }
    }

    pub(crate) async fn expect_connection_close(&mut self) -> ConnectionClose {
        match self.read_method().await {
            (0, Method::ConnectionClose(m)) => m,
            other => panic!("expected connection.close, got {:?}", other),
        }
    }

    pub(crate) async fn expect_close_ok(&mut self) {
        match self.read_method().await {
            (0, Method::ConnectionCloseOk) => {}
            other => panic!("expected connection.close-ok, got {:?}", other),
        }
    }

    pub(crate) async fn expect_channel_open(&mut self) -> u16 {
        match self.read_method().await {
            (channel, Method::ChannelOpen) => {
                self.send_method(channel, Method::ChannelOpenOk).await;
                channel
            }
            other => panic!("expected channel.open, got {:?}", other),
        }
    }

    /// The default handshake script with heartbeats disabled.
    pub(crate) async fn run_handshake(&mut self) {
        self.run_handshake_tuned(0, 131_072, 0).await;
    }

    pub(crate) async fn run_handshake_tuned(
        &mut self,
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    ) {
        self.expect_protocol_header().await;
        self.send_start().await;
        self.expect_start_ok().await;
        self.send_tune(channel_max, frame_max, heartbeat).await;
        self.expect_tune_ok().await;
        self.expect_open().await;
        self.send_open_ok().await;
    }
}
