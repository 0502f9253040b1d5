use std::{net::SocketAddr, sync::Arc};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastRouter, Session},
    catalog::SoftwareCatalog,
    config::{DaemonConfig, stream::FleetEvent},
    dispatch::Dispatcher,
    error::DaemonError,
    queue::{QueueListener, TaskQueue},
    server::{InstanceRegistry, RegistryConfig},
};

pub struct Daemon {
    config: DaemonConfig,
    registry: Arc<InstanceRegistry>,
    router: Arc<BroadcastRouter>,
    queue: Arc<TaskQueue>,
    dispatcher: Arc<Dispatcher>,
}

impl Daemon {
    pub async fn build(
        config: DaemonConfig,
        catalog: Arc<dyn SoftwareCatalog>,
    ) -> Result<Self, DaemonError> {
        let auth_hash = config.read_auth_hash().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel::<FleetEvent>();
        let registry = InstanceRegistry::new(RegistryConfig::from(&config), events_tx.clone())
            .await?;

        let router = Arc::new(BroadcastRouter::new(registry.clone()));
        tokio::spawn(router.clone().run(events_rx));

        let on_change: QueueListener = Arc::new(move |queue| {
            let _ = events_tx.send(FleetEvent::queue_change(queue));
        });
        let queue = Arc::new(TaskQueue::new(config.queue_poll_interval(), on_change));

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            router.clone(),
            queue.clone(),
            catalog,
            config.jvm_dir.clone(),
            auth_hash,
        ));

        Ok(Self {
            config,
            registry,
            router,
            queue,
            dispatcher,
        })
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn bind(&self) -> Result<TcpListener, DaemonError> {
        TcpListener::bind(&self.config.listen)
            .await
            .map_err(|e| DaemonError::Bind(self.config.listen.clone(), e))
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), DaemonError> {
        self.enqueue_autostart().await?;
        info!(addr = %listener.local_addr()?, "listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            tokio::spawn(serve_connection(
                stream,
                peer,
                self.dispatcher.clone(),
                self.router.clone(),
                shutdown.child_token(),
            ));
        }

        info!("shutting down, draining task queue");
        self.queue.shutdown().await;
        info!("stopped");
        Ok(())
    }

    async fn enqueue_autostart(&self) -> Result<(), DaemonError> {
        for name in self.registry.autostart_instances().await? {
            let registry = self.registry.clone();
            self.queue
                .enqueue(format!("Starting {name}..."), move || async move {
                    if let Err(e) = registry.start(&name).await {
                        warn!(instance = %name, error = %e, "autostart failed");
                    }
                });
        }
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    router: Arc<BroadcastRouter>,
    shutdown: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (mut session, mut outbound) = Session::new(peer.to_string());
    let id = session.id();
    info!(session = %id, %peer, "connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(session = %id, error = %e, "cannot encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => dispatcher.handle(&mut session, &text).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(session = %id, error = %e, "read failed");
                break;
            }
        }
    }

    router.remove_session(id).await;
    // Queued tasks may still hold a handle to this session, which would keep
    // the writer waiting on its channel forever.
    writer.abort();
    info!(session = %id, %peer, "disconnected");
}
