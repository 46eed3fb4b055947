use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use codec::CloseCode;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parking_lot::Mutex;
use service::{error::Disconnected, transport::Transport};
use tokio::{
    net::TcpStream,
    sync::{Mutex as AsyncMutex, Notify},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message as WsMessage,
        protocol::{CloseFrame, frame::coding::CloseCode as WsCloseCode},
    },
};

/// The signaling core's view of an accepted WebSocket.
///
/// The read and write halves live behind separate async mutexes: the
/// receive loop owns the read side for the lifetime of the connection
/// while the task-queue drain and the keep-alive ping share the write
/// side.
pub struct WsTransport {
    sink: AsyncMutex<SplitSink<WebSocketStream<TcpStream>, WsMessage>>,
    stream: AsyncMutex<SplitStream<WebSocketStream<TcpStream>>>,
    pong: Notify,
    closed: AtomicBool,
    close_code: Mutex<Option<u16>>,
}

impl WsTransport {
    pub fn new(socket: WebSocketStream<TcpStream>) -> Self {
        let (sink, stream) = socket.split();

        Self {
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            pong: Notify::new(),
            closed: AtomicBool::new(false),
            close_code: Mutex::new(None),
        }
    }

    fn disconnected(&self) -> Disconnected {
        self.closed.store(true, Ordering::Relaxed);
        Disconnected((*self.close_code.lock()).unwrap_or(1006))
    }
}

impl Transport for WsTransport {
    async fn send(&self, frame: Bytes) -> Result<(), Disconnected> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Binary(frame))
            .await
            .map_err(|_| self.disconnected())
    }

    async fn recv(&self) -> Result<Bytes, Disconnected> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(frame))) => return Ok(frame),
                // The protocol is binary-only; hand text frames through
                // and let the frame parser reject them.
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Bytes::copy_from_slice(text.as_bytes()));
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = self.sink.lock().await.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Pong(_))) => self.pong.notify_one(),
                Some(Ok(WsMessage::Close(frame))) => {
                    if let Some(frame) = frame {
                        self.close_code.lock().get_or_insert(u16::from(frame.code));
                    }
                    return Err(self.disconnected());
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(_)) | None => return Err(self.disconnected()),
            }
        }
    }

    async fn ping(&self) -> Result<(), Disconnected> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Ping(Bytes::new()))
            .await
            .map_err(|_| self.disconnected())
    }

    async fn pong(&self) {
        self.pong.notified().await
    }

    async fn close(&self, code: CloseCode) {
        self.close_code.lock().get_or_insert(u16::from(code));

        let frame = CloseFrame {
            code: WsCloseCode::from(u16::from(code)),
            reason: Default::default(),
        };
        let _ = self
            .sink
            .lock()
            .await
            .send(WsMessage::Close(Some(frame)))
            .await;

        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}
