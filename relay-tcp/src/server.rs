use crate::protocol::{Frame, TAG_LEN};
use bytes::Bytes;
use cachesync::Coordinator;
use futures::{SinkExt, StreamExt};
use shared::WindowId;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

pub type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Length-delimited codec with a 4-byte big-endian length prefix.
/// Frames may hold a `max_message_bytes` body plus the tag byte.
pub fn codec(max_message_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_message_bytes + TAG_LEN)
        .new_codec()
}

/// Accept windows forever, one task per connection
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    max_message_bytes: usize,
) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                info!("TCP connection from {addr}");
                let coordinator = Arc::clone(&coordinator);

                tokio::spawn(async move {
                    if let Err(err) =
                        process_connection(socket, coordinator, max_message_bytes).await
                    {
                        warn!("TCP connection {addr} error: {err:?}");
                    }
                });
            }
            Err(e) => {
                error!("TCP accept error: {}", e);
            }
        }
    }
}

/// Serve one window: handshake, then relay SYNC frames both ways until either side closes
pub async fn process_connection(
    socket: TcpStream,
    coordinator: Arc<Coordinator>,
    max_message_bytes: usize,
) -> ConnectionResult {
    socket.set_nodelay(true).ok();
    let mut framed = Framed::new(socket, codec(max_message_bytes));

    // The first frame must be HELLO
    match framed.next().await {
        Some(frame) => match Frame::decode(frame?.freeze()) {
            Ok(Frame::Hello) => {}
            Ok(other) => {
                let msg = format!("Expected HELLO, got {:?}", other);
                framed.send(Frame::Error { msg: msg.clone() }.encode()?).await?;
                return Err(msg.into());
            }
            Err(e) => {
                framed.send(Frame::Error { msg: e.clone() }.encode()?).await?;
                return Err(e.into());
            }
        },
        None => return Ok(()),
    }

    let (window_id, mut inbox) = coordinator.connect();
    let result = relay(&mut framed, &coordinator, window_id, &mut inbox).await;

    coordinator.disconnect(window_id);
    result
}

async fn relay(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    coordinator: &Coordinator,
    window_id: WindowId,
    inbox: &mut cachesync::Inbox,
) -> ConnectionResult {
    framed.send(Frame::Welcome { window_id }.encode()?).await?;
    info!("{} joined the relay", window_id);

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else {
                    debug!("{} closed its connection", window_id);
                    return Ok(());
                };

                match Frame::decode(frame?.freeze()) {
                    Ok(Frame::Sync(payload)) => {
                        coordinator.broadcast_except(window_id, &payload);
                    }
                    Ok(Frame::Ping) => framed.send(Frame::Pong.encode()?).await?,
                    Ok(other) => {
                        let msg = format!("Unexpected frame from window: {:?}", other);
                        warn!("{}: {}", window_id, msg);
                        framed.send(Frame::Error { msg }.encode()?).await?;
                    }
                    Err(e) => {
                        error!("Failed to decode frame from {}: {}", window_id, e);
                        framed.send(Frame::Error { msg: e }.encode()?).await?;
                    }
                }
            }
            payload = inbox.recv() => {
                let Some(payload) = payload else {
                    debug!("Coordinator dropped the mailbox for {}", window_id);
                    return Ok(());
                };
                let bytes: Bytes = Frame::Sync(payload).encode()?;
                framed.send(bytes).await?;
            }
        }
    }
}
