use crate::rpc::{
    events::{EventKind, EventSender},
    message_codec::{FrameError, LENGTH_PREFIX_LEN, MessageCodec},
    server::{dispatch::Dispatcher, registry::ConnectionRegistry},
};
use futures_util::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, warn};
use upload_engine::Uploader;
use uuid::Uuid;

/// Everything a spawned handler needs besides its socket.
pub(crate) struct ConnectionContext<U> {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub dispatcher: Arc<Dispatcher<U>>,
    pub registry: Arc<ConnectionRegistry>,
    pub events: EventSender,
    pub codec: MessageCodec,
    pub cancel: CancellationToken,
}

/// Runs one accepted connection to completion, then unregisters it. The
/// socket is dropped, and so closed, when this returns.
pub(crate) async fn handle_connection<S, U>(stream: S, ctx: ConnectionContext<U>)
where
    S: AsyncRead + AsyncWrite + Unpin,
    U: Uploader,
{
    match serve_connection(stream, ctx.peer, &ctx.dispatcher, ctx.codec, &ctx.cancel).await {
        Ok(()) => debug!("Connection {} from {} finished", ctx.id, ctx.peer),
        Err(e) => warn!("Connection {} from {} dropped: {}", ctx.id, ctx.peer, e),
    }

    ctx.registry.unregister(&ctx.id);
    ctx.events.emit(EventKind::ConnectionClosed {
        id: ctx.id,
        peer: ctx.peer,
    });
}

/// Reads command frames and answers each with exactly one response frame,
/// flushed before the next read. Cancellation is honoured while idle, while
/// dispatching and while writing. Returns `Ok` on a clean close or
/// cancellation, `Err` on framing and transport failures.
pub async fn serve_connection<S, U>(
    stream: S,
    peer: SocketAddr,
    dispatcher: &Dispatcher<U>,
    codec: MessageCodec,
    cancel: &CancellationToken,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    U: Uploader,
{
    let mut framed = Framed::new(stream, codec);

    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing idle connection from {}", peer);
                return Ok(());
            }
            frame = framed.next() => match frame {
                Some(Ok(payload)) => payload,
                None => return Ok(()),
                // peer went away before a full length prefix
                Some(Err(FrameError::Truncated { received, .. })) if received < LENGTH_PREFIX_LEN => {
                    return Ok(());
                }
                Some(Err(e)) => return Err(e),
            },
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Abandoning in-flight command from {}", peer);
                return Ok(());
            }
            response = dispatcher.handle_payload(peer, &payload) => response,
        };

        let json = response.to_json().map_err(io::Error::from)?;
        // a peer that stops reading must not pin the handler past a stop
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Dropping unsent response to {}", peer);
                return Ok(());
            }
            sent = framed.send(json) => sent?,
        }
    }
}
