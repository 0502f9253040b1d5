use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Weak},
};

use tokio::{
    fs::{create_dir_all, read, read_dir, remove_dir_all},
    sync::{RwLock, mpsc},
};
use tracing::{debug, info, warn};

use crate::{
    config::{
        DaemonConfig,
        stream::{EventSender, FleetEvent},
    },
    error::RegistryError,
    instance::{ConsoleChunk, InstanceConfig, InstanceStatus, ProcessWatcher},
    parser::{LifecycleMarker, detect_marker},
    utils::is_valid_instance_name,
};

pub const CONFIG_FILE: &str = "fleetguard.json";
pub const LAUNCH_SCRIPT: &str = "run.sh";
pub const EULA_FILE: &str = "eula.txt";
pub const JVM_ARGS_FILE: &str = "user_jvm_args.txt";
pub const STOP_COMMAND: &str = "stop\n";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub root: PathBuf,
    pub history_capacity: usize,
    pub default_jvm_args: String,
}

impl From<&DaemonConfig> for RegistryConfig {
    fn from(cfg: &DaemonConfig) -> Self {
        Self {
            root: cfg.instances_dir.clone(),
            history_capacity: cfg.history_capacity,
            default_jvm_args: cfg.default_jvm_args.clone(),
        }
    }
}

#[derive(Debug)]
struct LiveInstance {
    watcher: Arc<ProcessWatcher>,
    status: InstanceStatus,
}

type ConsoleSender = mpsc::UnboundedSender<(String, ConsoleChunk)>;

/// Source of truth for which instances exist and what state they are in.
///
/// Configuration lives on disk, one directory per instance. An instance is
/// live while it owns a [`ProcessWatcher`]; its status is tracked only while
/// live and is `stopped` otherwise.
#[derive(Debug)]
pub struct InstanceRegistry {
    pub(super) config: RegistryConfig,
    pub(super) http: reqwest::Client,
    live: RwLock<HashMap<String, LiveInstance>>,
    pub(super) events: EventSender,
    console_tx: ConsoleSender,
}

impl InstanceRegistry {
    pub async fn new(
        config: RegistryConfig,
        events: EventSender,
    ) -> Result<Arc<Self>, RegistryError> {
        create_dir_all(&config.root)
            .await
            .map_err(|e| RegistryError::FileIO(e.to_string()))?;

        let (console_tx, console_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            config,
            http: reqwest::Client::new(),
            live: RwLock::new(HashMap::new()),
            events,
            console_tx,
        });

        tokio::spawn(Self::fold_console(Arc::downgrade(&registry), console_rx));

        Ok(registry)
    }

    async fn fold_console(
        registry: Weak<Self>,
        mut rx: mpsc::UnboundedReceiver<(String, ConsoleChunk)>,
    ) {
        while let Some((name, chunk)) = rx.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.handle_output(&name, chunk).await;
        }
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    pub async fn config(&self, name: &str) -> Result<InstanceConfig, RegistryError> {
        if !is_valid_instance_name(name) {
            return Err(RegistryError::UnknownInstance(name.to_string()));
        }

        let path = self.instance_dir(name).join(CONFIG_FILE);
        let data = read(&path)
            .await
            .map_err(|_| RegistryError::UnknownInstance(name.to_string()))?;

        let mut config: InstanceConfig =
            serde_json::from_slice(&data).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.name = name.to_string();
        Ok(config)
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.config(name).await.is_ok()
    }

    pub async fn list(&self) -> Result<BTreeMap<String, InstanceConfig>, RegistryError> {
        let mut entries = read_dir(&self.config.root)
            .await
            .map_err(|e| RegistryError::FileIO(e.to_string()))?;

        let mut servers = BTreeMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::FileIO(e.to_string()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            match self.config(&name).await {
                Ok(config) => {
                    servers.insert(name, config);
                }
                Err(RegistryError::UnknownInstance(_)) => continue,
                Err(e) => warn!(instance = %name, error = %e, "skipping unreadable instance"),
            }
        }

        Ok(servers)
    }

    pub async fn status(&self, name: &str) -> InstanceStatus {
        self.live
            .read()
            .await
            .get(name)
            .map(|l| l.status)
            .unwrap_or(InstanceStatus::Stopped)
    }

    pub async fn states(&self) -> Result<BTreeMap<String, InstanceStatus>, RegistryError> {
        let servers = self.list().await?;
        let live = self.live.read().await;

        Ok(servers
            .into_keys()
            .map(|name| {
                let status = live
                    .get(&name)
                    .map(|l| l.status)
                    .unwrap_or(InstanceStatus::Stopped);
                (name, status)
            })
            .collect())
    }

    pub async fn is_live(&self, name: &str) -> bool {
        self.live.read().await.contains_key(name)
    }

    pub async fn console_history(&self, name: &str) -> Option<String> {
        self.live
            .read()
            .await
            .get(name)
            .map(|l| l.watcher.console_history())
    }

    /// Launches the instance's start script under a new watcher. Returns
    /// `false` without doing anything when the instance is already live.
    pub async fn start(&self, name: &str) -> Result<bool, RegistryError> {
        self.config(name).await?;
        let dir = self.instance_dir(name);
        let script = dir.join(LAUNCH_SCRIPT);

        // Held across the spawn so the first output chunk cannot be folded in
        // before the instance is registered as live.
        let mut live = self.live.write().await;
        if live.contains_key(name) {
            debug!(instance = %name, "start ignored, already live");
            return Ok(false);
        }

        let tx = self.console_tx.clone();
        let owner = name.to_string();
        let watcher = ProcessWatcher::spawn(
            &[script.to_string_lossy().into_owned()],
            &dir,
            self.config.history_capacity,
            Box::new(move |chunk| {
                let _ = tx.send((owner.clone(), chunk));
            }),
        )?;

        info!(instance = %name, pid = ?watcher.pid(), "instance started");
        live.insert(
            name.to_string(),
            LiveInstance {
                watcher: Arc::new(watcher),
                status: InstanceStatus::Starting,
            },
        );
        self.publish_state(name, InstanceStatus::Stopped, InstanceStatus::Starting);
        Ok(true)
    }

    pub async fn stop(&self, name: &str) -> Result<(), RegistryError> {
        let mut live = self.live.write().await;
        let entry = live
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotRunning(name.to_string()))?;

        entry.watcher.write(STOP_COMMAND);
        let old = entry.status;
        entry.status = InstanceStatus::Stopping;
        if old != InstanceStatus::Stopping {
            self.publish_state(name, old, InstanceStatus::Stopping);
        }

        info!(instance = %name, "stop requested");
        Ok(())
    }

    pub async fn write_console(&self, name: &str, text: &str) -> Result<(), RegistryError> {
        let live = self.live.read().await;
        let entry = live
            .get(name)
            .ok_or_else(|| RegistryError::NotRunning(name.to_string()))?;

        entry.watcher.write(text);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.config(name).await?;

        // Read guard held so the instance cannot go live mid-removal.
        let live = self.live.read().await;
        if live.contains_key(name) {
            return Err(RegistryError::InstanceRunning(name.to_string()));
        }

        remove_dir_all(self.instance_dir(name))
            .await
            .map_err(|e| RegistryError::FileIO(e.to_string()))?;
        drop(live);

        info!(instance = %name, "instance deleted");
        let _ = self.events.send(FleetEvent::server_list_change());
        Ok(())
    }

    pub async fn handle_output(&self, name: &str, chunk: ConsoleChunk) {
        let text = chunk.text();

        {
            // State events go out under the lock so they are ordered exactly
            // like the transitions.
            let mut live = self.live.write().await;
            let transition = if chunk.is_terminal() {
                info!(instance = %name, "instance process ended");
                live.remove(name)
                    .map(|l| (l.status, InstanceStatus::Stopped))
            } else if let Some(entry) = live.get_mut(name) {
                let next = match (detect_marker(&text), entry.status) {
                    (
                        Some(LifecycleMarker::Stopping),
                        InstanceStatus::Starting | InstanceStatus::Running,
                    ) => Some(InstanceStatus::Stopping),
                    (Some(LifecycleMarker::Ready), InstanceStatus::Starting) => {
                        Some(InstanceStatus::Running)
                    }
                    _ => None,
                };
                next.map(|new| {
                    let old = entry.status;
                    entry.status = new;
                    (old, new)
                })
            } else {
                None
            };

            if let Some((old, new)) = transition
                && old != new
            {
                self.publish_state(name, old, new);
            }
        }

        let _ = self.events.send(FleetEvent::console(name, text));
    }

    fn publish_state(&self, name: &str, old: InstanceStatus, new: InstanceStatus) {
        let _ = self.events.send(FleetEvent::state_change(name, old, new));
    }

    pub async fn autostart_instances(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .list()
            .await?
            .into_values()
            .filter(|c| c.autostart)
            .map(|c| c.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::fs::PermissionsExt, path::Path, time::Duration};

    use tempfile::TempDir;
    use tokio::{sync::mpsc::UnboundedReceiver, time::timeout};

    use super::*;
    use crate::config::{Software, stream::EventPayload};

    fn write_instance(root: &Path, name: &str, script: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let config = InstanceConfig {
            name: name.to_string(),
            software: Software::Vanilla,
            software_version: String::new(),
            mc_version: "1.20.4".into(),
            java_path: "/usr/bin/java".into(),
            java_version: "17".into(),
            autostart: name.starts_with("auto"),
        };
        std::fs::write(dir.join(CONFIG_FILE), serde_json::to_vec(&config).unwrap()).unwrap();
        let run = dir.join(LAUNCH_SCRIPT);
        std::fs::write(&run, script).unwrap();
        std::fs::set_permissions(&run, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    async fn registry() -> (TempDir, Arc<InstanceRegistry>, UnboundedReceiver<FleetEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let reg = InstanceRegistry::new(
            RegistryConfig {
                root: dir.path().to_path_buf(),
                history_capacity: 1 << 16,
                default_jvm_args: "-Xmx1G".into(),
            },
            tx,
        )
        .await
        .unwrap();
        (dir, reg, rx)
    }

    async fn live_pid(reg: &InstanceRegistry, name: &str) -> Option<u32> {
        reg.live.read().await.get(name).and_then(|l| l.watcher.pid())
    }

    const WAITS_FOR_STOP: &str = "#!/bin/sh\nread line\necho \"Stopping server\"\n";

    #[tokio::test]
    async fn list_only_counts_directories_with_config() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);
        std::fs::create_dir(dir.path().join("stray")).unwrap();
        std::fs::write(dir.path().join("loose-file"), "x").unwrap();

        let servers = reg.list().await.unwrap();
        assert_eq!(servers.keys().collect::<Vec<_>>(), vec!["alpha"]);
        assert_eq!(servers["alpha"].name, "alpha");
    }

    #[tokio::test]
    async fn instance_without_watcher_is_stopped() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);

        assert_eq!(reg.status("alpha").await, InstanceStatus::Stopped);
        assert_eq!(
            reg.states().await.unwrap().get("alpha"),
            Some(&InstanceStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn lifecycle_follows_output_markers() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);

        assert!(reg.start("alpha").await.unwrap());
        assert_eq!(reg.status("alpha").await, InstanceStatus::Starting);

        reg.handle_output("alpha", ConsoleChunk::Output("Loading libraries".into()))
            .await;
        assert_eq!(reg.status("alpha").await, InstanceStatus::Starting);

        reg.handle_output("alpha", ConsoleChunk::Output("Time elapsed: 812 ms\r\n".into()))
            .await;
        assert_eq!(reg.status("alpha").await, InstanceStatus::Running);

        reg.stop("alpha").await.unwrap();
        assert_eq!(reg.status("alpha").await, InstanceStatus::Stopping);

        reg.handle_output("alpha", ConsoleChunk::Stopped).await;
        assert_eq!(reg.status("alpha").await, InstanceStatus::Stopped);
        assert!(!reg.is_live("alpha").await);
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);

        assert!(reg.start("alpha").await.unwrap());
        reg.handle_output("alpha", ConsoleChunk::Output("Done (2.5s)!".into()))
            .await;
        let pid = live_pid(&reg, "alpha").await;

        assert!(!reg.start("alpha").await.unwrap());
        assert_eq!(reg.status("alpha").await, InstanceStatus::Running);
        assert_eq!(live_pid(&reg, "alpha").await, pid);

        reg.stop("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn stop_drives_process_to_stopped() {
        let (dir, reg, mut rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);

        reg.start("alpha").await.unwrap();
        reg.stop("alpha").await.unwrap();
        assert_eq!(reg.status("alpha").await, InstanceStatus::Stopping);

        let saw_stopped = timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                if let EventPayload::StateChange { new: InstanceStatus::Stopped, .. } =
                    event.payload
                {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();

        assert!(saw_stopped);
        assert!(!reg.is_live("alpha").await);
    }

    #[tokio::test]
    async fn delete_refuses_live_instance() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);
        reg.start("alpha").await.unwrap();

        assert!(matches!(
            reg.delete("alpha").await,
            Err(RegistryError::InstanceRunning(_))
        ));
        assert!(dir.path().join("alpha").join(CONFIG_FILE).exists());

        reg.stop("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn delete_removes_stopped_instance() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "alpha", WAITS_FOR_STOP);

        reg.delete("alpha").await.unwrap();
        assert!(!dir.path().join("alpha").exists());
        assert!(reg.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let (_dir, reg, _rx) = registry().await;

        assert!(matches!(
            reg.start("ghost").await,
            Err(RegistryError::UnknownInstance(_))
        ));
        assert!(matches!(
            reg.config("../etc").await,
            Err(RegistryError::UnknownInstance(_))
        ));
        assert!(matches!(
            reg.stop("ghost").await,
            Err(RegistryError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn autostart_flag_is_reported() {
        let (dir, reg, _rx) = registry().await;
        write_instance(dir.path(), "auto-lobby", WAITS_FOR_STOP);
        write_instance(dir.path(), "manual", WAITS_FOR_STOP);

        assert_eq!(reg.autostart_instances().await.unwrap(), vec!["auto-lobby"]);
    }
}
