use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{
    fs::{
        File, create_dir_all, read_to_string, remove_dir_all, remove_file, set_permissions, write,
    },
    io::AsyncWriteExt,
    process::Command,
};
use tracing::{info, warn};

use crate::{
    config::{Software, stream::FleetEvent},
    error::RegistryError,
    instance::{InstanceConfig, InstanceSettings},
    utils::is_valid_instance_name,
};

use super::registry::{CONFIG_FILE, EULA_FILE, InstanceRegistry, JVM_ARGS_FILE, LAUNCH_SCRIPT};

const SERVER_JAR: &str = "server.jar";
const FORGE_INSTALLER: &str = "forge-installer.jar";

fn file_io(e: std::io::Error) -> RegistryError {
    RegistryError::FileIO(e.to_string())
}

impl InstanceRegistry {
    /// Downloads and provisions a new instance.
    ///
    /// A failed download leaves the directory behind for `delete` to clean
    /// up. A failed Forge install removes it. The instance is never started
    /// here, whatever its `autostart` flag says.
    pub async fn create(
        &self,
        name: &str,
        software: Software,
        download_url: &str,
        java_path: &str,
        settings: InstanceSettings,
    ) -> Result<InstanceConfig, RegistryError> {
        if !is_valid_instance_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.is_live(name).await {
            return Err(RegistryError::InstanceRunning(name.to_string()));
        }

        let dir = self.instance_dir(name);
        create_dir_all(&dir).await.map_err(file_io)?;

        info!(instance = %name, %software, url = %download_url, "downloading server");
        let artifact = self.download(download_url).await?;

        match software {
            Software::Forge => self.provision_forge(&dir, &artifact, java_path).await?,
            Software::Paper | Software::Fabric | Software::Vanilla => {
                write(dir.join(SERVER_JAR), &artifact)
                    .await
                    .map_err(file_io)?;
                write(dir.join(LAUNCH_SCRIPT), jar_launch_script(java_path))
                    .await
                    .map_err(file_io)?;
            }
        }

        write(dir.join(EULA_FILE), "eula=true\n")
            .await
            .map_err(file_io)?;
        write(dir.join(JVM_ARGS_FILE), &self.config.default_jvm_args)
            .await
            .map_err(file_io)?;

        let config = InstanceConfig {
            name: name.to_string(),
            software,
            software_version: settings.software_version,
            mc_version: settings.mc_version,
            java_path: java_path.to_string(),
            java_version: settings.java_version,
            autostart: settings.autostart,
        };
        let json = serde_json::to_vec_pretty(&config)
            .map_err(|e| RegistryError::Config(e.to_string()))?;
        File::create(dir.join(CONFIG_FILE))
            .await
            .map_err(file_io)?
            .write_all(&json)
            .await
            .map_err(file_io)?;

        set_permissions(
            dir.join(LAUNCH_SCRIPT),
            std::fs::Permissions::from_mode(0o755),
        )
        .await
        .map_err(file_io)?;

        info!(instance = %name, "instance installed");
        let _ = self.events.send(FleetEvent::server_list_change());
        Ok(config)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RegistryError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RegistryError::Download {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn provision_forge(
        &self,
        dir: &Path,
        installer: &[u8],
        java_path: &str,
    ) -> Result<(), RegistryError> {
        let installer_path = dir.join(FORGE_INSTALLER);
        write(&installer_path, installer).await.map_err(file_io)?;

        let status = Command::new(java_path)
            .arg("-jar")
            .arg(&installer_path)
            .arg("-installServer")
            .arg(dir)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let _ = remove_file(&installer_path).await;
        let _ = remove_file(installer_log(&installer_path)).await;

        match status {
            Ok(s) if !s.success() => warn!(status = ?s, "forge installer exited with failure"),
            Err(e) => warn!(error = %e, "failed to run forge installer"),
            Ok(_) => {}
        }

        let script = dir.join(LAUNCH_SCRIPT);
        if !script.is_file() {
            let _ = remove_dir_all(dir).await;
            return Err(RegistryError::Provisioning(
                "forge installer failed".to_string(),
            ));
        }

        let content = read_to_string(&script).await.map_err(file_io)?;
        write(&script, rewrite_forge_script(&content, java_path))
            .await
            .map_err(file_io)?;

        Ok(())
    }
}

fn installer_log(installer: &Path) -> PathBuf {
    let mut name = installer.as_os_str().to_os_string();
    name.push(".log");
    PathBuf::from(name)
}

fn jar_launch_script(java_path: &str) -> String {
    format!("#!/usr/bin/env sh\n{java_path} -jar {SERVER_JAR} @{JVM_ARGS_FILE} nogui\n")
}

fn rewrite_forge_script(content: &str, java_path: &str) -> String {
    content
        .lines()
        .map(|line| {
            let line = match line.strip_prefix("java ") {
                Some(rest) => format!("{java_path} {rest}"),
                None => line.to_string(),
            };
            line.replace("\"$@\"", "nogui").replace("$@", "nogui")
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::mpsc,
    };

    use super::*;
    use crate::server::RegistryConfig;

    async fn serve(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(body).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}/server.jar")
    }

    async fn registry() -> (TempDir, Arc<InstanceRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let reg = InstanceRegistry::new(
            RegistryConfig {
                root: dir.path().to_path_buf(),
                history_capacity: 4096,
                default_jvm_args: "-Xmx2G".into(),
            },
            tx,
        )
        .await
        .unwrap();
        (dir, reg)
    }

    fn settings() -> InstanceSettings {
        InstanceSettings {
            software_version: "496".into(),
            mc_version: "1.20.4".into(),
            java_version: "17.0.9".into(),
            autostart: true,
        }
    }

    #[tokio::test]
    async fn paper_install_writes_layout() {
        let (dir, reg) = registry().await;
        let url = serve("200 OK", b"PK-fake-jar").await;

        let cfg = reg
            .create("lobby", Software::Paper, &url, "/opt/java17/bin/java", settings())
            .await
            .unwrap();
        assert_eq!(cfg.software, Software::Paper);
        assert!(cfg.autostart);

        let inst = dir.path().join("lobby");
        assert_eq!(std::fs::read(inst.join(SERVER_JAR)).unwrap(), b"PK-fake-jar");
        assert_eq!(std::fs::read_to_string(inst.join(EULA_FILE)).unwrap(), "eula=true\n");
        assert_eq!(std::fs::read_to_string(inst.join(JVM_ARGS_FILE)).unwrap(), "-Xmx2G");

        let script = std::fs::read_to_string(inst.join(LAUNCH_SCRIPT)).unwrap();
        assert!(script.starts_with("#!/usr/bin/env sh\n"));
        assert!(script.contains("/opt/java17/bin/java -jar server.jar @user_jvm_args.txt nogui"));
        let mode = std::fs::metadata(inst.join(LAUNCH_SCRIPT))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);

        // Installed but not started.
        assert!(reg.list().await.unwrap().contains_key("lobby"));
        assert!(!reg.is_live("lobby").await);
    }

    #[tokio::test]
    async fn failed_download_is_not_listed() {
        let (dir, reg) = registry().await;
        let url = serve("404 Not Found", b"").await;

        let err = reg
            .create("broken", Software::Vanilla, &url, "java", settings())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Download { status: 404, .. }));
        assert!(err.to_string().contains("failed downloading server"));

        assert!(dir.path().join("broken").is_dir());
        assert!(!reg.list().await.unwrap().contains_key("broken"));
    }

    #[tokio::test]
    async fn forge_without_launch_script_rolls_back() {
        let (dir, reg) = registry().await;
        let url = serve("200 OK", b"not-really-an-installer").await;

        // `/bin/true` stands in for a java binary whose installer produced nothing.
        let err = reg
            .create("modded", Software::Forge, &url, "/bin/true", settings())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Provisioning(_)));
        assert!(!dir.path().join("modded").exists());
    }

    #[tokio::test]
    async fn bad_names_are_refused_before_touching_disk() {
        let (dir, reg) = registry().await;
        let err = reg
            .create("../escape", Software::Vanilla, "http://127.0.0.1:1/", "java", settings())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn forge_script_rewrite() {
        let generated = "#!/usr/bin/env sh\n# comment\njava @user_jvm_args.txt @libraries/net/minecraftforge/forge/1.20.1-47.2.0/unix_args.txt \"$@\"\n";
        let out = rewrite_forge_script(generated, "/opt/jdk17/bin/java");
        assert_eq!(
            out,
            "#!/usr/bin/env sh\n# comment\n/opt/jdk17/bin/java @user_jvm_args.txt @libraries/net/minecraftforge/forge/1.20.1-47.2.0/unix_args.txt nogui\n"
        );
    }
}
