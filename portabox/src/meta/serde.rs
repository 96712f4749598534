//! Raw wire structures of the box metadata document.

use serde::Deserialize;


/// Root of a metadata document. `name` and `versions` are mandatory, a
/// document missing either is malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub versions: Vec<MetadataVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataVersion {
    pub version: String,
    #[serde(default)]
    pub providers: Vec<MetadataProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataProvider {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub architecture: Option<String>,
    /// Documents predating architecture entries carry neither field, in that
    /// case the provider is usable from any host, hence the `true` default.
    #[serde(default = "default_architecture_default")]
    pub default_architecture: bool,
    #[serde(default)]
    pub checksum_type: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

fn default_architecture_default() -> bool {
    true
}
