use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, VersionError};

pub mod daemon;
pub mod stream;

pub use daemon::DaemonConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Software {
    Vanilla,
    Paper,
    Forge,
    Fabric,
}

impl Software {
    pub const ALL: [Software; 4] = [
        Software::Vanilla,
        Software::Paper,
        Software::Forge,
        Software::Fabric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Software::Vanilla => "Vanilla",
            Software::Paper => "Paper",
            Software::Forge => "Forge",
            Software::Fabric => "Fabric",
        }
    }

    pub fn has_builds(&self) -> bool {
        !matches!(self, Software::Vanilla)
    }
}

impl Display for Software {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Software {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Software::ALL
            .into_iter()
            .find(|sw| sw.as_str() == s)
            .ok_or_else(|| RegistryError::InvalidSoftware(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub year: u32,
    pub week: u32,
    pub build: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinecraftVersion {
    Release(Version),
    Snapshot(Snapshot),
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}w{:02}{}", self.year, self.week, self.build)
    }
}

impl Display for MinecraftVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinecraftVersion::Release(v) => v.fmt(f),
            MinecraftVersion::Snapshot(s) => s.fmt(f),
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('.');

        let major_str = split
            .next()
            .filter(|v| !v.is_empty())
            .ok_or(VersionError::MissingMajor)?;
        let minor_str = split.next().ok_or(VersionError::MissingMinor)?;
        let patch_str = split.next();

        if split.next().is_some() {
            return Err(VersionError::ExtraComponents);
        }

        let major = major_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMajor(major_str.to_string()))?;

        let minor = minor_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMinor(minor_str.to_string()))?;

        let patch = match patch_str {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| VersionError::IncorrectPatch(p.to_string()))?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl FromStr for Snapshot {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year_str, rest) = s
            .split_once('w')
            .ok_or(VersionError::InvalidSnapshotFormat)?;

        if rest.len() != 3 || !rest.is_ascii() {
            return Err(VersionError::InvalidSnapshotFormat);
        }

        let week_str = &rest[..2];
        let build_str = &rest[2..];

        let year = year_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectYear(year_str.to_string()))?;

        let week = week_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectWeek(week_str.to_string()))?;

        let build = build_str
            .chars()
            .next()
            .filter(char::is_ascii_lowercase)
            .ok_or_else(|| VersionError::IncorrectBuild(build_str.to_string()))?;

        Ok(Self { year, week, build })
    }
}

impl FromStr for MinecraftVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ver) = Version::from_str(s) {
            return Ok(MinecraftVersion::Release(ver));
        }

        if let Ok(snap) = Snapshot::from_str(s) {
            return Ok(MinecraftVersion::Snapshot(snap));
        }

        Err(VersionError::UnknownVersionFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_without_patch_parses() {
        let v: Version = "1.20".parse().unwrap();
        assert_eq!(v, Version { major: 1, minor: 20, patch: 0 });
        assert_eq!(v.to_string(), "1.20");

        let v: Version = "1.20.4".parse().unwrap();
        assert_eq!(v.patch, 4);
        assert!(matches!(
            "1.2.3.4".parse::<Version>(),
            Err(VersionError::ExtraComponents)
        ));
    }

    #[test]
    fn snapshot_and_release_are_distinguished() {
        assert!(matches!(
            "23w45a".parse::<MinecraftVersion>(),
            Ok(MinecraftVersion::Snapshot(Snapshot { year: 23, week: 45, build: 'a' }))
        ));
        assert!(matches!(
            "1.8.9".parse::<MinecraftVersion>(),
            Ok(MinecraftVersion::Release(_))
        ));
        assert!("nonsense".parse::<MinecraftVersion>().is_err());
    }

    #[test]
    fn software_names_round_trip_through_wire_strings() {
        for sw in Software::ALL {
            assert_eq!(sw.as_str().parse::<Software>().unwrap(), sw);
        }
        assert!(matches!(
            "Spigot".parse::<Software>(),
            Err(RegistryError::InvalidSoftware(name)) if name == "Spigot"
        ));
    }
}
