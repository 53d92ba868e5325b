//! Dotted triplet versions and the image-vs-volume comparison that gates
//! upgrades.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn components(self) -> [u32; 3] {
        [self.major, self.minor, self.patch]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a N.N.N version")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    /// Strict `N.N.N`: exactly three non-empty all-digit segments.
    /// Surrounding whitespace (a trailing newline in the marker file) is
    /// ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, ParseVersionError> {
            let part = parts.next().ok_or_else(err)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            part.parse().map_err(|_| err())
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How the image version relates to the version recorded on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComparison {
    Equal,
    /// Upgrade tool must run; no reinitialization.
    MinorUpgrade,
    /// Upgrade tool must run and module links are reinitialized.
    MajorUpgrade,
    Invalid,
    /// Volume is newer than the image.
    DowngradeInvalid,
}

impl VersionComparison {
    /// Numeric code for log lines.
    pub fn code(self) -> i32 {
        match self {
            Self::Equal => 0,
            Self::MinorUpgrade => 1,
            Self::MajorUpgrade => 2,
            Self::Invalid => -2,
            Self::DowngradeInvalid => -3,
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Invalid | Self::DowngradeInvalid)
    }

    pub fn requires_upgrade_tool(self) -> bool {
        matches!(self, Self::MinorUpgrade | Self::MajorUpgrade)
    }
}

impl fmt::Display for VersionComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equal => "equal",
            Self::MinorUpgrade => "minor-upgrade",
            Self::MajorUpgrade => "major-upgrade",
            Self::Invalid => "invalid",
            Self::DowngradeInvalid => "downgrade-invalid",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Compare the image version against the volume version.
///
/// An empty `volume` means no version was recorded although a config store
/// exists; that is treated as an upgrade without reinitialization.
pub fn compare(image: &str, volume: &str) -> VersionComparison {
    let Ok(image) = image.parse::<Version>() else {
        return VersionComparison::Invalid;
    };
    if volume.trim().is_empty() {
        return VersionComparison::MinorUpgrade;
    }
    let Ok(volume) = volume.parse::<Version>() else {
        return VersionComparison::Invalid;
    };

    let pairs = image.components().into_iter().zip(volume.components());
    for (index, (image_part, volume_part)) in pairs.enumerate() {
        if volume_part > image_part {
            return VersionComparison::DowngradeInvalid;
        }
        if volume_part < image_part {
            return if index == 0 {
                VersionComparison::MajorUpgrade
            } else {
                VersionComparison::MinorUpgrade
            };
        }
    }
    VersionComparison::Equal
}
