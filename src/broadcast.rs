use std::{collections::HashMap, sync::Arc};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::stream::{EventPayload, FleetEvent},
    error::RegistryError,
    instance::InstanceStatus,
    protocol::Outbound,
    server::InstanceRegistry,
};

pub type SessionId = Uuid;

pub const NOT_RUNNING_HISTORY: &str = "*** server is not running ***";

#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queues `msg` for the connection. Returns `false` once the connection
    /// is gone; callers broadcasting to many sessions just move on.
    pub fn send(&self, msg: Outbound) -> bool {
        self.tx.send(msg).is_ok()
    }
}

#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    peer: String,
    authenticated: bool,
}

impl Session {
    pub fn new<S: Into<String>>(peer: S) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            handle: SessionHandle {
                id: Uuid::new_v4(),
                tx,
            },
            peer: peer.into(),
            authenticated: false,
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn send(&self, msg: Outbound) -> bool {
        self.handle.send(msg)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }
}

pub async fn server_list(
    registry: &InstanceRegistry,
    queue: Vec<String>,
) -> Result<Outbound, RegistryError> {
    Ok(Outbound::ServerList {
        servers: registry.list().await?,
        states: registry.states().await?,
        queue,
    })
}

/// Knows which sessions get which events.
///
/// Every authenticated session receives state, queue and server-list
/// updates. Console output only reaches the sessions subscribed to that
/// instance. The router holds [`SessionHandle`]s only; the transport removes
/// them on disconnect through [`BroadcastRouter::remove_session`].
#[derive(Debug)]
pub struct BroadcastRouter {
    registry: Arc<InstanceRegistry>,
    authenticated: RwLock<HashMap<SessionId, SessionHandle>>,
    subscribers: RwLock<HashMap<String, HashMap<SessionId, SessionHandle>>>,
    last_queue: RwLock<Vec<String>>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            registry,
            authenticated: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            last_queue: RwLock::new(Vec::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<FleetEvent>) {
        while let Some(event) = events.recv().await {
            debug!(%event, "routing");
            self.route(event).await;
        }
        debug!("event bus closed");
    }

    pub async fn route(&self, event: FleetEvent) {
        match event.payload {
            EventPayload::StateChange { instance, old, new } => {
                info!(%instance, %old, %new, "state changed");
                self.broadcast_state(&instance, new).await
            }
            EventPayload::Console { instance, chunk } => self.broadcast_log(&instance, chunk).await,
            EventPayload::QueueChange { queue } => self.broadcast_queue_change(queue).await,
            EventPayload::ServerListChange => self.broadcast_server_list().await,
        }
    }

    pub async fn register(&self, session: SessionHandle) {
        self.authenticated.write().await.insert(session.id, session);
    }

    pub async fn remove_session(&self, id: SessionId) {
        self.authenticated.write().await.remove(&id);
        self.unsubscribe_console(id, None).await;
    }

    pub async fn subscribe_console(
        &self,
        session: SessionHandle,
        instance: &str,
    ) -> Result<String, RegistryError> {
        if !self.registry.exists(instance).await {
            return Err(RegistryError::UnknownInstance(instance.to_string()));
        }

        {
            let mut subs = self.subscribers.write().await;
            for set in subs.values_mut() {
                set.remove(&session.id);
            }
            subs.entry(instance.to_string())
                .or_default()
                .insert(session.id, session);
        }

        Ok(self
            .registry
            .console_history(instance)
            .await
            .unwrap_or_else(|| NOT_RUNNING_HISTORY.to_string()))
    }

    pub async fn unsubscribe_console(&self, id: SessionId, instance: Option<&str>) {
        let mut subs = self.subscribers.write().await;
        match instance {
            Some(name) => {
                if let Some(set) = subs.get_mut(name) {
                    set.remove(&id);
                }
            }
            None => {
                for set in subs.values_mut() {
                    set.remove(&id);
                }
            }
        }
        subs.retain(|_, set| !set.is_empty());
    }

    pub async fn broadcast_state(&self, instance: &str, state: InstanceStatus) {
        self.to_authenticated(Outbound::ServerState {
            server: instance.to_string(),
            state,
        })
        .await;
    }

    pub async fn broadcast_log(&self, instance: &str, chunk: String) {
        let targets: Vec<SessionHandle> = self
            .subscribers
            .read()
            .await
            .get(instance)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default();

        for session in targets {
            session.send(Outbound::ConsoleLogging {
                console: instance.to_string(),
                msg: chunk.clone(),
            });
        }
    }

    pub async fn broadcast_queue_change(&self, queue: Vec<String>) {
        *self.last_queue.write().await = queue.clone();
        self.to_authenticated(Outbound::Queue { queue }).await;
    }

    /// Drops the console subscribers of instances that are no longer listed
    /// before sending, so a later install under the same name starts
    /// unwatched.
    pub async fn broadcast_server_list(&self) {
        let queue = self.last_queue.read().await.clone();
        let msg = match server_list(&self.registry, queue).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "cannot build server list");
                return;
            }
        };

        if let Outbound::ServerList { servers, .. } = &msg {
            self.subscribers
                .write()
                .await
                .retain(|name, _| servers.contains_key(name));
        }
        self.to_authenticated(msg).await;
    }

    async fn to_authenticated(&self, msg: Outbound) {
        let targets: Vec<SessionHandle> =
            self.authenticated.read().await.values().cloned().collect();

        for session in targets {
            if !session.send(msg.clone()) {
                debug!(session = %session.id, "skipping closed session");
            }
        }
    }

    pub async fn subscriber_count(&self, instance: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(instance)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub async fn authenticated_count(&self) -> usize {
        self.authenticated.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        config::Software,
        instance::InstanceConfig,
        server::{CONFIG_FILE, RegistryConfig},
    };

    async fn router_with(instances: &[&str]) -> (TempDir, Arc<BroadcastRouter>) {
        let dir = tempfile::tempdir().unwrap();
        for name in instances {
            let inst = dir.path().join(name);
            std::fs::create_dir_all(&inst).unwrap();
            let cfg = InstanceConfig {
                name: name.to_string(),
                software: Software::Fabric,
                software_version: "0.15.6".into(),
                mc_version: "1.20.4".into(),
                java_path: "java".into(),
                java_version: "17".into(),
                autostart: false,
            };
            std::fs::write(inst.join(CONFIG_FILE), serde_json::to_vec(&cfg).unwrap()).unwrap();
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = InstanceRegistry::new(
            RegistryConfig {
                root: dir.path().to_path_buf(),
                history_capacity: 4096,
                default_jvm_args: String::new(),
            },
            tx,
        )
        .await
        .unwrap();
        (dir, Arc::new(BroadcastRouter::new(registry)))
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn console_output_reaches_only_its_subscribers() {
        let (_dir, router) = router_with(&["alpha", "beta"]).await;
        let (a, mut a_rx) = Session::new("a");
        let (b, mut b_rx) = Session::new("b");
        let (c, mut c_rx) = Session::new("c");

        for s in [&a, &b] {
            let history = router.subscribe_console(s.handle(), "alpha").await.unwrap();
            assert_eq!(history, NOT_RUNNING_HISTORY);
        }
        router.subscribe_console(c.handle(), "beta").await.unwrap();

        router.broadcast_log("alpha", "line one\r\n".into()).await;

        let expected = Outbound::ConsoleLogging {
            console: "alpha".into(),
            msg: "line one\r\n".into(),
        };
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut b_rx), vec![expected]);
        assert!(drain(&mut c_rx).is_empty());

        router.broadcast_log("gamma", "nobody listens".into()).await;
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut c_rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_instance_subscription_is_refused() {
        let (_dir, router) = router_with(&["alpha"]).await;
        let (s, _rx) = Session::new("s");

        assert!(matches!(
            router.subscribe_console(s.handle(), "ghost").await,
            Err(RegistryError::UnknownInstance(_))
        ));
        assert_eq!(router.subscriber_count("ghost").await, 0);
        assert_eq!(router.subscriber_count("alpha").await, 0);
    }

    #[tokio::test]
    async fn resubscribing_moves_the_session() {
        let (_dir, router) = router_with(&["alpha", "beta"]).await;
        let (s, _rx) = Session::new("s");

        router.subscribe_console(s.handle(), "alpha").await.unwrap();
        router.subscribe_console(s.handle(), "beta").await.unwrap();
        assert_eq!(router.subscriber_count("alpha").await, 0);
        assert_eq!(router.subscriber_count("beta").await, 1);
    }

    #[tokio::test]
    async fn global_events_go_to_authenticated_sessions_only() {
        let (_dir, router) = router_with(&["alpha"]).await;
        let (authed, mut authed_rx) = Session::new("authed");
        let (_anon, mut anon_rx) = Session::new("anon");
        router.register(authed.handle()).await;

        router.broadcast_state("alpha", InstanceStatus::Starting).await;
        router
            .broadcast_queue_change(vec!["Starting alpha...".into()])
            .await;

        assert_eq!(
            drain(&mut authed_rx),
            vec![
                Outbound::ServerState {
                    server: "alpha".into(),
                    state: InstanceStatus::Starting
                },
                Outbound::Queue {
                    queue: vec!["Starting alpha...".into()]
                },
            ]
        );
        assert!(drain(&mut anon_rx).is_empty());
    }

    #[tokio::test]
    async fn closed_session_does_not_break_broadcast() {
        let (_dir, router) = router_with(&["alpha"]).await;
        let (gone, gone_rx) = Session::new("gone");
        let (live, mut live_rx) = Session::new("live");
        router.register(gone.handle()).await;
        router.register(live.handle()).await;
        drop(gone_rx);

        router.broadcast_server_list().await;
        let msgs = drain(&mut live_rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(&msgs[0], Outbound::ServerList { servers, .. } if servers.contains_key("alpha")));
    }

    #[tokio::test]
    async fn deleted_instance_loses_its_subscribers() {
        let (dir, router) = router_with(&["alpha", "beta"]).await;
        let (s, mut rx) = Session::new("s");
        let (t, _t_rx) = Session::new("t");
        router.register(s.handle()).await;
        router.subscribe_console(s.handle(), "alpha").await.unwrap();
        router.subscribe_console(t.handle(), "beta").await.unwrap();

        std::fs::remove_dir_all(dir.path().join("alpha")).unwrap();
        router.broadcast_server_list().await;

        assert_eq!(router.subscriber_count("alpha").await, 0);
        assert_eq!(router.subscriber_count("beta").await, 1);
        assert!(matches!(
            &drain(&mut rx)[..],
            [Outbound::ServerList { servers, .. }] if !servers.contains_key("alpha")
        ));

        // Reinstalled under the same name: the old subscriber hears nothing.
        let reinstalled = dir.path().join("alpha");
        std::fs::create_dir_all(&reinstalled).unwrap();
        std::fs::copy(
            dir.path().join("beta").join(CONFIG_FILE),
            reinstalled.join(CONFIG_FILE),
        )
        .unwrap();
        router.broadcast_log("alpha", "fresh output".into()).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_every_membership() {
        let (_dir, router) = router_with(&["alpha"]).await;
        let (s, _rx) = Session::new("s");
        router.register(s.handle()).await;
        router.subscribe_console(s.handle(), "alpha").await.unwrap();

        router.remove_session(s.id()).await;
        assert_eq!(router.authenticated_count().await, 0);
        assert_eq!(router.subscriber_count("alpha").await, 0);
    }
}
