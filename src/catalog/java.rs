use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tokio::{fs::read_dir, process::Command};
use tracing::{debug, warn};

use crate::{
    config::MinecraftVersion,
    error::{ResolutionError, VersionError},
};

static QUOTED_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([.\d_]*)""#).expect("static regex"));

pub fn recommended_java(mc_version: &str) -> Result<u32, VersionError> {
    let version = match mc_version.parse::<MinecraftVersion>()? {
        MinecraftVersion::Snapshot(_) => return Ok(21),
        MinecraftVersion::Release(v) => v,
    };

    Ok(match (version.minor, version.patch) {
        (0..=7, _) => 7,
        (8..=15, _) => 8,
        (16, _) => 11,
        (17, _) => 16,
        (18..=19, _) => 17,
        // 1.20.5 moved to Java 21.
        (20, 0..=4) => 17,
        _ => 21,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaInstall {
    pub path: PathBuf,
    pub version: String,
}

#[derive(Debug, Clone, Default)]
pub struct JavaRuntimes {
    installs: BTreeMap<u32, JavaInstall>,
}

impl JavaRuntimes {
    pub async fn discover(jvm_dir: &Path) -> Self {
        let mut installs = BTreeMap::new();

        let mut entries = match read_dir(jvm_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %jvm_dir.display(), error = %e, "cannot scan for java runtimes");
                return Self::default();
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.file_type().await {
                Ok(t) if t.is_dir() => {}
                _ => continue,
            }

            let root = entry.path();
            let binary = java_binary(&root);
            let Some((major, version)) = query_version(&binary).await else {
                continue;
            };
            debug!(major, %version, path = %binary.display(), "found java runtime");
            installs.insert(
                major,
                JavaInstall {
                    path: binary,
                    version,
                },
            );
        }

        Self { installs }
    }

    pub fn get(&self, major: u32) -> Result<&JavaInstall, ResolutionError> {
        self.installs
            .get(&major)
            .ok_or_else(|| ResolutionError::JavaNotFound(major.to_string()))
    }
}

fn java_binary(root: &Path) -> PathBuf {
    if root.join("jdk").is_dir() {
        root.join("jdk/bin/java")
    } else if root.join("jre").is_dir() {
        root.join("jre/bin/java")
    } else {
        root.join("bin/java")
    }
}

async fn query_version(binary: &Path) -> Option<(u32, String)> {
    let output = Command::new(binary).arg("-version").output().await.ok()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_java_version(stderr.lines().next()?)
}

pub fn parse_java_version(line: &str) -> Option<(u32, String)> {
    let full = QUOTED_VERSION.captures(line)?.get(1)?.as_str().to_string();
    let major = full
        .strip_prefix("1.")
        .unwrap_or(&full)
        .split(['.', '_'])
        .next()?
        .parse::<u32>()
        .ok()?;
    Some((major, full))
}
