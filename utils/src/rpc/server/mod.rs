use crate::rpc::{
    RelaySettings,
    events::{EventKind, EventSender},
    message_codec::MessageCodec,
};
use connection::{ConnectionContext, handle_connection};
use dispatch::Dispatcher;
use registry::ConnectionRegistry;
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use upload_engine::Uploader;
use uuid::Uuid;

pub mod connection;
pub mod dispatch;
pub mod registry;

/// Back-off after a failed accept, keeps fd exhaustion from spinning the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Relay server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
}

/// A bound listener with its accept loop. Dropping the handle without calling
/// [`shutdown`](Self::shutdown) leaves the loop running.
#[derive(Debug)]
pub struct RelayServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    accept_task: JoinHandle<()>,
    events: EventSender,
}

impl RelayServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, waits for the listener to be released, then closes
    /// every open connection. Returns the number of connections closed.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();
        if let Err(e) = self.accept_task.await {
            debug!("Accept loop ended abnormally: {}", e);
        }
        let closed = self.registry.close_all();
        self.events.emit(EventKind::Stopped);
        closed
    }
}

/// Binds the relay port and spawns the accept loop, one handler task per
/// accepted connection.
pub async fn start_relay_server<U: Uploader>(
    settings: &RelaySettings,
    uploader: Arc<U>,
    events: EventSender,
) -> Result<RelayServerHandle, ServerError> {
    let addr = format!("{}:{}", settings.listen_address, settings.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind { addr, source })?;

    let dispatcher = Arc::new(Dispatcher::new(
        settings.base_dir.clone(),
        uploader,
        events.clone(),
    ));
    let registry = Arc::new(ConnectionRegistry::new());
    let cancel = CancellationToken::new();
    let codec = MessageCodec::new(settings.max_frame_len);

    info!(
        "Relay listening on {}, serving files from {}",
        local_addr,
        settings.base_dir.display()
    );
    events.emit(EventKind::Started { addr: local_addr });

    let accept_task = tokio::spawn(accept_loop(
        listener,
        dispatcher,
        registry.clone(),
        events.clone(),
        codec,
        cancel.clone(),
    ));

    Ok(RelayServerHandle {
        local_addr,
        cancel,
        registry,
        accept_task,
        events,
    })
}

async fn accept_loop<U: Uploader>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<U>>,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
    codec: MessageCodec,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let id = Uuid::new_v4();
                        let conn_cancel = cancel.child_token();
                        if !registry.register(id, peer, conn_cancel.clone()) {
                            debug!("Dropping connection from {} accepted during shutdown", peer);
                            continue;
                        }
                        events.emit(EventKind::ConnectionOpened { id, peer });

                        let ctx = ConnectionContext {
                            id,
                            peer,
                            dispatcher: dispatcher.clone(),
                            registry: registry.clone(),
                            events: events.clone(),
                            codec,
                            cancel: conn_cancel,
                        };
                        tokio::spawn(handle_connection(stream, ctx));
                    }
                    Err(e) => {
                        events.emit(EventKind::AcceptFailed { error: e.to_string() });
                        tokio::select! {
                            _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!("Shutting down relay listener on {:?}", listener.local_addr().ok());
                break;
            }
        }
    }
}

/// Start/stop lifecycle around [`start_relay_server`].
pub struct RelayServer<U> {
    settings: RelaySettings,
    uploader: Arc<U>,
    events: EventSender,
    handle: Option<RelayServerHandle>,
}

impl<U: Uploader> RelayServer<U> {
    pub fn new(settings: RelaySettings, uploader: Arc<U>) -> Self {
        Self {
            settings,
            uploader,
            events: EventSender::default(),
            handle: None,
        }
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn state(&self) -> LifecycleState {
        match self.handle {
            Some(_) => LifecycleState::Running,
            None => LifecycleState::Stopped,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(|h| h.local_addr())
    }

    pub fn connection_count(&self) -> usize {
        self.handle.as_ref().map_or(0, |h| h.connection_count())
    }

    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(handle) = &self.handle {
            return Err(ServerError::AlreadyRunning(handle.local_addr()));
        }
        let handle =
            start_relay_server(&self.settings, self.uploader.clone(), self.events.clone()).await?;
        let addr = handle.local_addr();
        self.handle = Some(handle);
        Ok(addr)
    }

    /// Returns `false` when the server was not running.
    pub async fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let closed = handle.shutdown().await;
                info!("Relay stopped, closed {} connection(s)", closed);
                true
            }
            None => false,
        }
    }
}
