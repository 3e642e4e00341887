//! Packaged application metadata.
//!
//! Metadata is compiled into the binary and loaded exactly once at startup.
//! It is immutable afterwards and is shared as `Arc<Metadata>`.

use serde::Deserialize;

use crate::error::{MetadataError, MetadataResult};
use crate::version::AppVersion;

/// Embedded metadata resource.
const METADATA_RESOURCE: &str = include_str!("../resources/metadata.toml");

/// Embedded application icon.
const ICON_RESOURCE: &[u8] = include_bytes!("../resources/icon.png");

/// On-disk layout of the metadata resource.
#[derive(Debug, Deserialize)]
struct MetadataFile {
    name: String,
    version: AppVersion,
}

/// Decoded RGBA icon image.
#[derive(Clone, PartialEq, Eq)]
pub struct Icon {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for Icon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Icon")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

impl Icon {
    /// Decodes an encoded image (PNG, ICO, ...) into RGBA pixels.
    pub fn decode(bytes: &[u8]) -> MetadataResult<Self> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            rgba: image.into_raw(),
        })
    }
}

/// Immutable application metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    name: String,
    version: AppVersion,
    icon: Icon,
}

impl Metadata {
    /// Loads metadata from the resources packaged with the binary.
    pub fn load() -> MetadataResult<Self> {
        Self::from_sources(METADATA_RESOURCE, ICON_RESOURCE)
    }

    /// Builds metadata from a TOML properties document and an encoded icon.
    pub fn from_sources(properties: &str, icon: &[u8]) -> MetadataResult<Self> {
        let file: MetadataFile = toml::from_str(properties)?;
        let name = file.name.trim().to_string();
        if name.is_empty() {
            return Err(MetadataError::EmptyField("name"));
        }

        Ok(Self {
            name,
            version: file.version,
            icon: Icon::decode(icon)?,
        })
    }

    /// Application display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application version.
    #[must_use]
    pub fn version(&self) -> &AppVersion {
        &self.version
    }

    /// Application icon.
    #[must_use]
    pub fn icon(&self) -> &Icon {
        &self.icon
    }

    /// Human readable version line, e.g. `Atlas v4.7.0`.
    #[must_use]
    pub fn version_text(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}
