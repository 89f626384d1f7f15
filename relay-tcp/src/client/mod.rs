use crate::protocol::{Frame, TAG_LEN};
use crate::server::codec;
use bytes::{Bytes, BytesMut};
use cachesync::{CoordinatorLink, Inbox, SyncPayload};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shared::{Error, Result, WindowId};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

type FrameSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type FrameStream = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// Window-side link to a coordinator reached over TCP
///
/// Sending only queues the payload; a background task writes frames in order.
/// Dropping the link closes the write half, which ends the session on the
/// coordinator side.
#[derive(Debug)]
pub struct TcpLink {
    window_id: WindowId,
    outbound: mpsc::UnboundedSender<SyncPayload>,
}

impl TcpLink {
    /// Connect, perform the HELLO/WELCOME handshake and start the I/O tasks.
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        max_message_bytes: usize,
    ) -> Result<(TcpLink, Inbox)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to coordinator: {}", e)))?;
        stream.set_nodelay(true).ok();

        let mut framed = Framed::new(stream, codec(max_message_bytes));
        framed
            .send(Frame::Hello.encode()?)
            .await
            .map_err(|e| Error::Transport(format!("Failed to send HELLO: {}", e)))?;

        let window_id = match framed.next().await {
            Some(Ok(bytes)) => match Frame::decode(bytes.freeze()) {
                Ok(Frame::Welcome { window_id }) => window_id,
                Ok(Frame::Error { msg }) => {
                    return Err(Error::Transport(format!("Coordinator refused window: {}", msg)));
                }
                Ok(other) => {
                    return Err(Error::Transport(format!(
                        "Expected WELCOME, got {:?}",
                        other
                    )));
                }
                Err(e) => return Err(Error::Transport(e)),
            },
            Some(Err(e)) => {
                return Err(Error::Transport(format!("Handshake failed: {}", e)));
            }
            None => {
                return Err(Error::Transport(
                    "Connection closed during handshake".to_string(),
                ));
            }
        };
        info!("Connected to coordinator as {}", window_id);

        let (sink, stream) = framed.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outbound_rx, max_message_bytes));
        tokio::spawn(read_loop(stream, inbound_tx, window_id));

        Ok((
            TcpLink {
                window_id,
                outbound: outbound_tx,
            },
            Inbox::new(window_id, inbound_rx),
        ))
    }
}

impl CoordinatorLink for TcpLink {
    fn window_id(&self) -> WindowId {
        self.window_id
    }

    fn send_to_coordinator(&self, payload: SyncPayload) -> Result<()> {
        self.outbound
            .send(payload)
            .map_err(|_| Error::Transport("Coordinator connection is closed".to_string()))
    }
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<SyncPayload>,
    max_message_bytes: usize,
) {
    while let Some(payload) = outbound.recv().await {
        let bytes = match Frame::Sync(payload).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode sync frame: {}", e);
                continue;
            }
        };
        if bytes.len() > max_message_bytes + TAG_LEN {
            warn!(
                "Dropping sync frame of {} bytes, limit is {}",
                bytes.len(),
                max_message_bytes + TAG_LEN
            );
            continue;
        }
        if let Err(e) = sink.send(bytes).await {
            warn!("Failed to write to coordinator: {}", e);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Failed to close coordinator connection: {}", e);
    }
    debug!("Coordinator write loop finished");
}

async fn read_loop(
    mut stream: FrameStream,
    inbound: mpsc::UnboundedSender<SyncPayload>,
    window_id: WindowId,
) {
    while let Some(frame) = stream.next().await {
        let bytes: BytesMut = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Coordinator connection error for {}: {}", window_id, e);
                break;
            }
        };

        match Frame::decode(bytes.freeze()) {
            Ok(Frame::Sync(payload)) => {
                if inbound.send(payload).is_err() {
                    debug!("Inbox for {} dropped, stopping read loop", window_id);
                    break;
                }
            }
            Ok(Frame::Error { msg }) => warn!("Coordinator reported an error: {}", msg),
            Ok(Frame::Pong) => debug!("Pong from coordinator"),
            Ok(other) => debug!("Ignoring unexpected frame {:?}", other),
            Err(e) => warn!("Failed to decode frame from coordinator: {}", e),
        }
    }
    debug!("Coordinator read loop for {} finished", window_id);
}
