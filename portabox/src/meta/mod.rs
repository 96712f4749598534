//! Box metadata documents: classification of fetched payloads, parsing into
//! a normalised structure and candidate selection.

pub(crate) mod serde;

use std::io::{self, BufReader};
use std::fs::File;
use std::path::Path;
use std::fmt;

use crate::version::{Version, VersionConstraint};


/// Return true if the given raw media type should classify the payload as a
/// metadata document: its essence is `application/json`, RFC 7231 parameters
/// such as `charset=utf-8` being ignored.
pub fn is_metadata_media_type(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/json")
}

/// Classify a fetched payload as metadata or archive.
///
/// When the transport surfaced a media type, the decision is taken from its
/// essence alone. Otherwise the payload is sniffed: parsing as JSON makes it
/// a metadata document, anything else an archive.
pub fn classify(media_type: Option<&str>, file: &Path) -> io::Result<bool> {

    if let Some(media_type) = media_type {
        return Ok(is_metadata_media_type(media_type));
    }

    let reader = BufReader::new(File::open(file)?);
    Ok(serde_json::from_reader::<_, ::serde::de::IgnoredAny>(reader).is_ok())

}

/// A parsed and normalised metadata document: the box name plus the versions
/// it enumerates, each version carrying its provider entries.
#[derive(Debug, Clone)]
pub struct BoxMetadata {
    pub name: String,
    pub description: Option<String>,
    pub versions: Vec<BoxVersion>,
}

#[derive(Debug, Clone)]
pub struct BoxVersion {
    pub version: Version,
    pub providers: Vec<BoxProvider>,
}

#[derive(Debug, Clone)]
pub struct BoxProvider {
    pub name: String,
    pub url: String,
    pub architecture: Option<String>,
    pub default_architecture: bool,
    pub checksum_type: Option<String>,
    pub checksum: Option<String>,
}

impl BoxMetadata {

    /// Read and parse a metadata document from a file.
    pub fn load(file: &Path) -> Result<Self> {

        let reader = File::open(file)
            .map(BufReader::new)
            .map_err(|e| Error::new_malformed(file, e))?;

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let raw = serde_path_to_error::deserialize::<_, serde::Metadata>(&mut deserializer)
            .map_err(|e| Error::new_malformed(file, e))?;

        Self::from_raw(raw)

    }

    fn from_raw(raw: serde::Metadata) -> Result<Self> {

        if raw.name.is_empty() {
            return Err(Error::Invalid { reason: "empty box name".into() });
        }

        let mut versions = Vec::with_capacity(raw.versions.len());
        for raw_version in raw.versions {

            let Some(version) = Version::new(&raw_version.version) else {
                return Err(Error::Invalid {
                    reason: format!("invalid version: {}", raw_version.version).into(),
                });
            };

            versions.push(BoxVersion {
                version,
                providers: raw_version.providers.into_iter()
                    .map(|p| BoxProvider {
                        name: p.name,
                        url: p.url,
                        architecture: p.architecture,
                        default_architecture: p.default_architecture,
                        checksum_type: p.checksum_type,
                        checksum: p.checksum,
                    })
                    .collect(),
            });

        }

        Ok(Self {
            name: raw.name,
            description: raw.description,
            versions,
        })

    }

    /// Apply the version, provider and architecture constraints and select
    /// the newest version with at least one acceptable provider entry.
    ///
    /// Versions failing the constraint are dropped, the survivors are walked
    /// newest first and the first one with a matching provider wins; a
    /// version with no matching provider is skipped in favor of the next
    /// older one. More than one returned entry means the caller has to
    /// disambiguate (the entries are in request order when a provider list
    /// was requested, in document order otherwise).
    pub fn select<'m>(&'m self,
        constraint: Option<&VersionConstraint>,
        providers: &[String],
        architecture: &Architecture,
        host_architecture: Option<&str>,
    ) -> std::result::Result<Selection<'m>, SelectError> {

        let mut versions = self.versions.iter()
            .filter(|v| constraint.is_none_or(|c| c.matches(&v.version)))
            .collect::<Vec<_>>();

        if versions.is_empty() {
            return Err(SelectError::NoVersion);
        }

        versions.sort_by(|a, b| b.version.cmp(&a.version));

        for version in versions {
            let matched = match_providers(version, providers, architecture, host_architecture);
            if !matched.is_empty() {
                return Ok(Selection {
                    version: &version.version,
                    providers: matched,
                });
            }
        }

        Err(SelectError::NoProvider)

    }

}

/// The architecture constraint applied when selecting a provider entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Architecture {
    /// No architecture was requested: prefer entries matching the host
    /// architecture, fall back to the version's default entries.
    #[default]
    Unset,
    /// Match the detected host architecture, with a fallback to a lone
    /// default entry predating architecture metadata.
    Auto,
    /// Match this exact architecture identifier.
    Explicit(String),
}

/// The result of candidate selection: the newest acceptable version together
/// with its matching provider entries.
#[derive(Debug)]
pub struct Selection<'m> {
    pub version: &'m Version,
    pub providers: Vec<SelectedProvider<'m>>,
}

/// A provider entry retained by selection, together with the architecture to
/// record on the artifact if this entry is chosen.
#[derive(Debug)]
pub struct SelectedProvider<'m> {
    pub provider: &'m BoxProvider,
    pub architecture: Option<String>,
}

/// Selection could not retain any candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// No version satisfies the constraint.
    NoVersion,
    /// At least one version satisfied the constraint but none of them carries
    /// an acceptable provider entry.
    NoProvider,
}

/// Retain the provider entries of one version acceptable for the requested
/// providers and architecture.
fn match_providers<'m>(
    version: &'m BoxVersion,
    requested: &[String],
    architecture: &Architecture,
    host: Option<&str>,
) -> Vec<SelectedProvider<'m>> {

    let candidates = version.providers.iter()
        .filter(|p| requested.is_empty() || requested.iter().any(|r| *r == p.name))
        .collect::<Vec<_>>();

    let mut matched = match architecture {
        Architecture::Explicit(arch) => {
            candidates.iter().copied()
                .filter(|p| p.architecture.as_deref() == Some(arch.as_str()))
                .map(|p| SelectedProvider { provider: p, architecture: Some(arch.clone()) })
                .collect::<Vec<_>>()
        }
        Architecture::Auto => {

            let mut matched = candidates.iter().copied()
                .filter(|p| host.is_some() && p.architecture.as_deref() == host)
                .map(|p| SelectedProvider { provider: p, architecture: host.map(str::to_string) })
                .collect::<Vec<_>>();

            if matched.is_empty() {
                // No host match: a single default entry with an "unknown"
                // style architecture is still usable, with no architecture
                // recorded on the artifact.
                let defaults = candidates.iter().copied()
                    .filter(|p| p.default_architecture && !recognised(p.architecture.as_deref()))
                    .collect::<Vec<_>>();
                if let [single] = defaults[..] {
                    matched.push(SelectedProvider { provider: single, architecture: None });
                }
            }

            matched

        }
        Architecture::Unset => {

            let mut matched = candidates.iter().copied()
                .filter(|p| host.is_some() && p.architecture.as_deref() == host)
                .map(|p| SelectedProvider { provider: p, architecture: host.map(str::to_string) })
                .collect::<Vec<_>>();

            if matched.is_empty() {
                matched = candidates.iter().copied()
                    .filter(|p| p.default_architecture)
                    .map(|p| SelectedProvider { provider: p, architecture: p.architecture.clone() })
                    .collect();
            }

            matched

        }
    };

    // When a provider list was requested, the request order is the
    // preference order.
    if !requested.is_empty() {
        matched.sort_by_key(|m| {
            requested.iter().position(|r| *r == m.provider.name).unwrap_or(usize::MAX)
        });
    }

    matched

}

/// An architecture identifier carried by provider entries predating the
/// architecture metadata ("unknown" style) is not a recognised one.
fn recognised(architecture: Option<&str>) -> bool {
    matches!(architecture, Some(arch) if arch != "unknown")
}

/// The metadata document could not be used.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The document could not be read or parsed as JSON.
    #[error("malformed metadata: {origin}: {error}")]
    Malformed {
        origin: Box<str>,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The document parsed but violates the schema.
    #[error("invalid metadata: {reason}")]
    Invalid {
        reason: Box<str>,
    },
}

/// Type alias for a result with the metadata error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    fn new_malformed(file: &Path, error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Malformed {
            origin: file.display().to_string().into(),
            error: Box::new(error),
        }
    }

}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoVersion => f.write_str("no matching version"),
            Self::NoProvider => f.write_str("no matching provider"),
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    fn provider(name: &str, architecture: Option<&str>, default: bool) -> BoxProvider {
        BoxProvider {
            name: name.to_string(),
            url: format!("http://host/{name}.box"),
            architecture: architecture.map(str::to_string),
            default_architecture: default,
            checksum_type: None,
            checksum: None,
        }
    }

    fn metadata(versions: Vec<(&str, Vec<BoxProvider>)>) -> BoxMetadata {
        BoxMetadata {
            name: "foo/bar".to_string(),
            description: None,
            versions: versions.into_iter()
                .map(|(version, providers)| BoxVersion {
                    version: Version::new(version).unwrap(),
                    providers,
                })
                .collect(),
        }
    }

    #[test]
    fn media_types() {
        assert!(is_metadata_media_type("application/json"));
        assert!(is_metadata_media_type("application/json; charset=utf-8"));
        assert!(is_metadata_media_type("Application/JSON"));
        assert!(!is_metadata_media_type("application/octet-stream"));
        assert!(!is_metadata_media_type("text/html"));
    }

    #[test]
    fn sniffing() {

        let dir = tempfile::tempdir().unwrap();

        let json = dir.path().join("md.json");
        std::fs::write(&json, br#"{"name":"foo","versions":[]}"#).unwrap();
        let archive = dir.path().join("some.box");
        std::fs::write(&archive, b"\x1f\x8b i am definitely not json").unwrap();

        // Media type wins when present.
        assert!(classify(Some("application/json; charset=utf-8"), &archive).unwrap());
        assert!(!classify(Some("application/octet-stream"), &json).unwrap());

        // Without a media type, the payload is sniffed.
        assert!(classify(None, &json).unwrap());
        assert!(!classify(None, &archive).unwrap());

    }

    #[test]
    fn load_and_validate() {

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("md.json");

        std::fs::write(&file, br#"{
            "name": "foo/bar",
            "versions": [
                {"version": "0.7", "providers": [
                    {"name": "virtualbox", "url": "http://host/b.box",
                     "checksum_type": "sha1", "checksum": "aa"}
                ]}
            ]
        }"#).unwrap();

        let metadata = BoxMetadata::load(&file).unwrap();
        assert_eq!(metadata.name, "foo/bar");
        assert_eq!(metadata.versions.len(), 1);
        let provider = &metadata.versions[0].providers[0];
        assert_eq!(provider.name, "virtualbox");
        assert!(provider.default_architecture);
        assert_eq!(provider.checksum.as_deref(), Some("aa"));

        // Missing versions key is malformed.
        std::fs::write(&file, br#"{"name": "foo/bar"}"#).unwrap();
        assert!(matches!(BoxMetadata::load(&file), Err(Error::Malformed { .. })));

        // Unparsable version string is invalid.
        std::fs::write(&file, br#"{"name": "foo/bar", "versions": [{"version": "no spaces allowed"}]}"#).unwrap();
        assert!(matches!(BoxMetadata::load(&file), Err(Error::Invalid { .. })));

    }

    #[test]
    fn select_newest() {

        let metadata = metadata(vec![
            ("0.5", vec![provider("virtualbox", None, true)]),
            ("0.7", vec![provider("virtualbox", None, true)]),
        ]);

        let selection = metadata.select(None, &[], &Architecture::Unset, Some("amd64")).unwrap();
        assert_eq!(selection.version.as_str(), "0.7");
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].provider.name, "virtualbox");
        assert_eq!(selection.providers[0].architecture, None);

    }

    #[test]
    fn select_constraint() {

        let metadata = metadata(vec![
            ("0.5", vec![provider("virtualbox", None, true)]),
            ("0.7", vec![provider("virtualbox", None, true)]),
        ]);

        let constraint = VersionConstraint::new("= 0.5").unwrap();
        let selection = metadata.select(Some(&constraint), &[], &Architecture::Unset, None).unwrap();
        assert_eq!(selection.version.as_str(), "0.5");

        let constraint = VersionConstraint::new("> 1.0").unwrap();
        assert_eq!(
            metadata.select(Some(&constraint), &[], &Architecture::Unset, None).unwrap_err(),
            SelectError::NoVersion);

    }

    #[test]
    fn select_skips_versions_without_acceptable_provider() {

        // The newest version has no providers at all, the next one carries
        // the requested provider.
        let metadata = metadata(vec![
            ("1.5", vec![]),
            ("0.7", vec![provider("vmware", None, true), provider("virtualbox", None, true)]),
            ("0.5", vec![provider("virtualbox", None, true)]),
        ]);

        let selection = metadata.select(None, &["vmware".to_string()], &Architecture::Unset, None).unwrap();
        assert_eq!(selection.version.as_str(), "0.7");
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].provider.name, "vmware");

        assert_eq!(
            metadata.select(None, &["hyperv".to_string()], &Architecture::Unset, None).unwrap_err(),
            SelectError::NoProvider);

    }

    #[test]
    fn select_explicit_architecture() {

        let metadata = metadata(vec![
            ("1.0", vec![
                provider("virtualbox", Some("amd64"), true),
                provider("virtualbox", Some("arm64"), false),
            ]),
        ]);

        let selection = metadata.select(None, &[], &Architecture::Explicit("arm64".to_string()), Some("amd64")).unwrap();
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].provider.architecture.as_deref(), Some("arm64"));
        assert_eq!(selection.providers[0].architecture.as_deref(), Some("arm64"));

        assert_eq!(
            metadata.select(None, &[], &Architecture::Explicit("i386".to_string()), Some("amd64")).unwrap_err(),
            SelectError::NoProvider);

    }

    #[test]
    fn select_auto_architecture() {

        let metadata = metadata(vec![
            ("1.0", vec![
                provider("virtualbox", Some("amd64"), true),
                provider("virtualbox", Some("arm64"), false),
            ]),
        ]);

        let selection = metadata.select(None, &[], &Architecture::Auto, Some("arm64")).unwrap();
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].provider.architecture.as_deref(), Some("arm64"));
        assert_eq!(selection.providers[0].architecture.as_deref(), Some("arm64"));

        // Host not present in the document and no usable default entry.
        assert_eq!(
            metadata.select(None, &[], &Architecture::Auto, Some("i386")).unwrap_err(),
            SelectError::NoProvider);

    }

    #[test]
    fn select_auto_lone_unknown_default() {

        // A lone default entry with an unrecognised architecture matches
        // with no architecture recorded.
        let metadata1 = metadata(vec![
            ("1.0", vec![provider("virtualbox", Some("unknown"), true)]),
        ]);

        let selection = metadata1.select(None, &[], &Architecture::Auto, Some("amd64")).unwrap();
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].architecture, None);

        // Two such entries are ambiguous, no match.
        let metadata2 = metadata(vec![
            ("1.0", vec![
                provider("virtualbox", Some("unknown"), true),
                provider("vmware", Some("unknown"), true),
            ]),
        ]);

        assert_eq!(
            metadata2.select(None, &[], &Architecture::Auto, Some("amd64")).unwrap_err(),
            SelectError::NoProvider);

    }

    #[test]
    fn select_unset_falls_back_to_default() {

        let metadata = metadata(vec![
            ("1.0", vec![
                provider("virtualbox", Some("arm64"), true),
                provider("vmware", Some("riscv"), false),
            ]),
        ]);

        // Host architecture absent from the document: the default entry is
        // taken, its own architecture recorded.
        let selection = metadata.select(None, &[], &Architecture::Unset, Some("amd64")).unwrap();
        assert_eq!(selection.providers.len(), 1);
        assert_eq!(selection.providers[0].provider.name, "virtualbox");
        assert_eq!(selection.providers[0].architecture.as_deref(), Some("arm64"));

    }

    #[test]
    fn select_request_order_wins() {

        let metadata = metadata(vec![
            ("1.0", vec![
                provider("virtualbox", None, true),
                provider("vmware", None, true),
            ]),
        ]);

        let requested = ["vmware".to_string(), "virtualbox".to_string()];
        let selection = metadata.select(None, &requested, &Architecture::Unset, None).unwrap();
        assert_eq!(selection.providers[0].provider.name, "vmware");
        assert_eq!(selection.providers[1].provider.name, "virtualbox");

    }

}
