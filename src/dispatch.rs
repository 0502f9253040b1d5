use std::{path::PathBuf, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastRouter, Session, SessionHandle, server_list},
    catalog::{InstallRequest, JavaRuntimes, SoftwareCatalog, recommended_java},
    config::Software,
    error::{ProtocolError, RegistryError},
    instance::{InstanceSettings, InstanceStatus},
    protocol::{Inbound, Outbound},
    queue::TaskQueue,
    server::InstanceRegistry,
    utils::is_valid_instance_name,
};

const NOT_AUTHED: &str = "not authed";
const INVALID_LOGIN: &str = "invalid login";
const INVALID_SOFTWARE: &str = "invalid server software";
const UNSUPPORTED_SOFTWARE: &str = "invalid or unsupported server software";
const DELETE_RUNNING: &str = "delete: server is running";

pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
    router: Arc<BroadcastRouter>,
    queue: Arc<TaskQueue>,
    catalog: Arc<dyn SoftwareCatalog>,
    jvm_dir: PathBuf,
    auth_hash: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        router: Arc<BroadcastRouter>,
        queue: Arc<TaskQueue>,
        catalog: Arc<dyn SoftwareCatalog>,
        jvm_dir: PathBuf,
        auth_hash: String,
    ) -> Self {
        Self {
            registry,
            router,
            queue,
            catalog,
            jvm_dir,
            auth_hash,
        }
    }

    pub async fn handle(&self, session: &mut Session, text: &str) {
        debug!(session = %session.id(), msg = %text, "inbound");

        let value = match Inbound::json(text) {
            Ok(value) => value,
            Err(e) => return reply_err(session, e),
        };

        // Authentication is checked on the bare tag so an unauthenticated
        // client learns nothing about field requirements.
        match Inbound::tag(&value) {
            Ok("auth") => {}
            Ok(_) if !session.is_authenticated() => {
                session.send(Outbound::exception(NOT_AUTHED));
                return;
            }
            Ok(_) => {}
            Err(e) => return reply_err(session, e),
        }

        match Inbound::from_value(value) {
            Ok(msg) => self.dispatch(session, msg).await,
            Err(e) => reply_err(session, e),
        }
    }

    async fn dispatch(&self, session: &mut Session, msg: Inbound) {
        match msg {
            Inbound::Auth { hash } => self.auth(session, &hash).await,
            Inbound::StartConsoleLogging { server_name } => {
                let reply = match self
                    .router
                    .subscribe_console(session.handle(), &server_name)
                    .await
                {
                    Ok(log) => Outbound::LogHistory { log },
                    Err(e) => Outbound::exception(e.to_string()),
                };
                session.send(reply);
            }
            Inbound::StopConsoleLogging => {
                self.router.unsubscribe_console(session.id(), None).await;
            }
            Inbound::StartServer { server_name } => self.start_server(session, server_name).await,
            Inbound::StopServer { server_name } => self.stop_server(session, server_name).await,
            Inbound::ListServers => {
                match server_list(&self.registry, self.queue.dump()).await {
                    Ok(list) => session.send(list),
                    Err(e) => session.send(Outbound::exception(e.to_string())),
                };
            }
            Inbound::GetState { server_name } => {
                if !self.registry.exists(&server_name).await {
                    session.send(Outbound::exception(
                        RegistryError::UnknownInstance(server_name).to_string(),
                    ));
                    return;
                }
                let state = self.registry.status(&server_name).await;
                session.send(Outbound::ServerState {
                    server: server_name,
                    state,
                });
            }
            Inbound::GetSoftwareData { software } => {
                let Ok(software) = software.parse::<Software>() else {
                    session.send(Outbound::exception(INVALID_SOFTWARE));
                    return;
                };
                let reply = match self.catalog.mc_versions(software).await {
                    Ok(mc_versions) => Outbound::SoftwareInfo {
                        software,
                        mc_versions,
                    },
                    Err(e) => Outbound::exception(e.to_string()),
                };
                session.send(reply);
            }
            Inbound::GetBuildData {
                software,
                mc_version,
            } => {
                let software = match software.parse::<Software>() {
                    Ok(sw) if sw.has_builds() => sw,
                    _ => {
                        session.send(Outbound::exception(UNSUPPORTED_SOFTWARE));
                        return;
                    }
                };
                let reply = match self.catalog.builds(software, &mc_version).await {
                    Ok(builds) => Outbound::BuildInfo {
                        software,
                        mc_version,
                        builds,
                    },
                    Err(e) => Outbound::exception(e.to_string()),
                };
                session.send(reply);
            }
            Inbound::InstallServer {
                mcversion,
                software,
                softwareversion,
                name,
            } => self.install_server(session, mcversion, software, softwareversion, name),
            Inbound::DeleteServer { name } => self.delete_server(session, name).await,
            Inbound::ConsoleWrite {
                server_name,
                content,
            } => {
                if let Err(e) = self.registry.write_console(&server_name, &content).await {
                    session.send(Outbound::exception(e.to_string()));
                }
            }
        }
    }

    async fn auth(&self, session: &mut Session, hash: &str) {
        if hash != self.auth_hash {
            warn!(session = %session.id(), peer = %session.peer(), "invalid login");
            session.send(Outbound::exception(INVALID_LOGIN));
            return;
        }

        if !session.is_authenticated() {
            session.mark_authenticated();
            self.router.register(session.handle()).await;
            info!(session = %session.id(), peer = %session.peer(), "authenticated");
        }
        session.send(Outbound::Welcome);
    }

    async fn start_server(&self, session: &Session, name: String) {
        if !self.registry.exists(&name).await {
            session.send(Outbound::exception(
                RegistryError::UnknownInstance(name).to_string(),
            ));
            return;
        }

        let registry = self.registry.clone();
        let requester = session.handle();
        self.queue
            .enqueue(format!("Starting {name}..."), move || async move {
                if let Err(e) = registry.start(&name).await {
                    warn!(instance = %name, error = %e, "start failed");
                    requester.send(Outbound::exception(e.to_string()));
                }
            });
    }

    async fn stop_server(&self, session: &Session, name: String) {
        match self.registry.status(&name).await {
            InstanceStatus::Starting | InstanceStatus::Running => {}
            InstanceStatus::Stopped | InstanceStatus::Stopping => {
                session.send(Outbound::exception(
                    RegistryError::NotRunning(name).to_string(),
                ));
                return;
            }
        }

        let registry = self.registry.clone();
        let requester = session.handle();
        self.queue
            .enqueue(format!("Stopping server: {name}"), move || async move {
                if let Err(e) = registry.stop(&name).await {
                    requester.send(Outbound::exception(e.to_string()));
                }
            });
    }

    fn install_server(
        &self,
        session: &Session,
        mc_version: String,
        software: String,
        software_version: Option<String>,
        name: String,
    ) {
        if !is_valid_instance_name(&name) {
            session.send(Outbound::exception(
                RegistryError::InvalidName(name).to_string(),
            ));
            return;
        }
        let software_version = match (software.as_str(), software_version) {
            ("Vanilla", _) => String::new(),
            (_, Some(v)) => v,
            (_, None) => {
                session.send(ProtocolError::MissingData.into());
                return;
            }
        };

        let install = Install {
            registry: self.registry.clone(),
            catalog: self.catalog.clone(),
            jvm_dir: self.jvm_dir.clone(),
            requester: session.handle(),
            name: name.clone(),
            software,
            mc_version,
            software_version,
        };
        self.queue
            .enqueue(format!("Installing server: {name}"), move || install.run());
    }

    async fn delete_server(&self, session: &Session, name: String) {
        if !self.registry.exists(&name).await {
            session.send(Outbound::exception(
                RegistryError::UnknownInstance(name).to_string(),
            ));
            return;
        }
        if self.registry.status(&name).await != InstanceStatus::Stopped {
            session.send(Outbound::exception(DELETE_RUNNING));
            return;
        }

        let registry = self.registry.clone();
        let requester = session.handle();
        self.queue
            .enqueue(format!("Deleting server: {name}"), move || async move {
                match registry.delete(&name).await {
                    Ok(()) => {}
                    Err(RegistryError::InstanceRunning(_)) => {
                        requester.send(Outbound::exception(DELETE_RUNNING));
                    }
                    Err(e) => {
                        requester.send(Outbound::exception(e.to_string()));
                    }
                }
            });
    }
}

fn reply_err(session: &Session, e: ProtocolError) {
    debug!(session = %session.id(), error = %e, "rejected message");
    session.send(e.into());
}

struct Install {
    registry: Arc<InstanceRegistry>,
    catalog: Arc<dyn SoftwareCatalog>,
    jvm_dir: PathBuf,
    requester: SessionHandle,
    name: String,
    software: String,
    mc_version: String,
    software_version: String,
}

impl Install {
    async fn run(self) {
        if let Err(reply) = self.try_run().await {
            warn!(instance = %self.name, ?reply, "install failed");
            self.requester.send(reply);
        }
    }

    async fn try_run(&self) -> Result<(), Outbound> {
        let software = self
            .software
            .parse::<Software>()
            .map_err(|_| Outbound::exception(INVALID_SOFTWARE))?;

        let url = self
            .catalog
            .download_url(&InstallRequest {
                software,
                mc_version: self.mc_version.clone(),
                software_version: self.software_version.clone(),
            })
            .await
            .map_err(|e| Outbound::exception(format!("install failed: {e}")))?;

        let major = recommended_java(&self.mc_version)
            .map_err(|e| Outbound::exception(format!("install failed: {e}")))?;
        let runtimes = JavaRuntimes::discover(&self.jvm_dir).await;
        let java = runtimes.get(major).map_err(|e| Outbound::Exception {
            msg: e.to_string(),
            java_ver: Some(major.to_string()),
        })?;

        self.registry
            .create(
                &self.name,
                software,
                &url,
                &java.path.to_string_lossy(),
                InstanceSettings {
                    software_version: self.software_version.clone(),
                    mc_version: self.mc_version.clone(),
                    java_version: java.version.clone(),
                    autostart: false,
                },
            )
            .await
            .map_err(|e| Outbound::exception(format!("install failed: {e}")))?;
        Ok(())
    }
}
