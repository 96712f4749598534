//! The box-add pipeline: resolve a user reference into a concrete archive,
//! download it under mutual exclusion, verify its integrity and hand the
//! verified artifact to the catalog.
//!
//! A reference is either a direct archive (URL or local path), a metadata
//! document enumerating versions and per-provider archives, or an
//! `owner/name` shorthand expanded against a configured server. Several
//! references may be given at once, in which case each must point directly
//! at an archive and transport failures fall back to the next one.

use std::path::{Path, PathBuf};
use std::fs;
use std::env;

use url::Url;

use crate::checksum::{self, Checksum, ChecksumAlgorithm};
use crate::download::{self, Downloader, DownloadOptions};
use crate::meta::{self, BoxMetadata};
use crate::remote::{self, SourceRef};
use crate::version::VersionConstraint;
use crate::lock::UrlLock;

pub use crate::meta::Architecture;


/// Name of the process environment variable giving the default server URL
/// used to expand `owner/name` shorthands. It is read once, when the
/// installer is constructed.
pub const SERVER_URL_ENV: &str = "PORTABOX_SERVER_URL";

/// The installer driving a single box addition.
///
/// Configure it with the builder-style setters, then run [`Self::install`]
/// with the target [`Collection`], the [`Authenticator`] hooks and a
/// [`Handler`] receiving the progress events.
#[derive(Debug, Clone)]
pub struct Installer {
    name: Option<String>,
    urls: Vec<String>,
    providers: Vec<String>,
    version: Option<VersionConstraint>,
    checksum: Option<String>,
    checksum_type: Option<String>,
    architecture: Architecture,
    force: bool,
    server_url: Option<String>,
    tmp_dir: PathBuf,
    download: DownloadOptions,
}

impl Installer {

    /// Create a new installer for the given box reference: an archive URL or
    /// local path, a metadata document or an `owner/name` shorthand.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_urls([url.into()])
    }

    /// Create a new installer resolving several references, each expected to
    /// point directly at an archive.
    pub fn with_urls(urls: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: None,
            urls: urls.into_iter().collect(),
            providers: Vec::new(),
            version: None,
            checksum: None,
            checksum_type: None,
            architecture: Architecture::Unset,
            force: false,
            server_url: env::var(SERVER_URL_ENV).ok().filter(|url| !url.is_empty()),
            tmp_dir: env::temp_dir(),
            download: DownloadOptions::default(),
        }
    }

    /// The name to register the box under. Mandatory when the references
    /// point directly at archives; when a metadata document is resolved the
    /// document's name is used instead and this one, if set, must agree.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// See [`Self::name`].
    #[inline]
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// The configured box references.
    #[inline]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// See [`Self::urls`].
    #[inline]
    pub fn set_urls(&mut self, urls: impl IntoIterator<Item = String>) -> &mut Self {
        self.urls = urls.into_iter().collect();
        self
    }

    /// Acceptable providers, in order of preference. Empty means any.
    #[inline]
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// See [`Self::providers`].
    #[inline]
    pub fn set_providers(&mut self, providers: impl IntoIterator<Item = String>) -> &mut Self {
        self.providers = providers.into_iter().collect();
        self
    }

    /// The version constraint applied to metadata versions. Rejected for
    /// direct archive additions, whose version is always `0`.
    #[inline]
    pub fn version(&self) -> Option<&VersionConstraint> {
        self.version.as_ref()
    }

    /// See [`Self::version`].
    #[inline]
    pub fn set_version(&mut self, version: VersionConstraint) -> &mut Self {
        self.version = Some(version);
        self
    }

    /// The expected checksum of the archive, verified after the transfer.
    /// Surrounding whitespace is ignored and an empty string disables the
    /// verification.
    #[inline]
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// See [`Self::checksum`].
    #[inline]
    pub fn set_checksum(&mut self, checksum: impl Into<String>) -> &mut Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// The checksum algorithm identifier, matched case-insensitively.
    #[inline]
    pub fn checksum_type(&self) -> Option<&str> {
        self.checksum_type.as_deref()
    }

    /// See [`Self::checksum_type`].
    #[inline]
    pub fn set_checksum_type(&mut self, checksum_type: impl Into<String>) -> &mut Self {
        self.checksum_type = Some(checksum_type.into());
        self
    }

    /// The architecture constraint used when selecting a provider entry.
    #[inline]
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// See [`Self::architecture`].
    #[inline]
    pub fn set_architecture(&mut self, architecture: Architecture) -> &mut Self {
        self.architecture = architecture;
        self
    }

    /// When enabled, an already installed box of the same identity is
    /// overwritten instead of failing with [`Error::AlreadyExists`].
    #[inline]
    pub fn force(&self) -> bool {
        self.force
    }

    /// See [`Self::force`].
    #[inline]
    pub fn set_force(&mut self, force: bool) -> &mut Self {
        self.force = force;
        self
    }

    /// The server URL used to expand `owner/name` shorthands, initialized
    /// from the `PORTABOX_SERVER_URL` environment variable at construction.
    #[inline]
    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    /// See [`Self::server_url`].
    #[inline]
    pub fn set_server_url(&mut self, url: Option<String>) -> &mut Self {
        self.server_url = url;
        self
    }

    /// The directory receiving temporary downloads and the per-URL lock
    /// files, defaults to the system temporary directory.
    #[inline]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// See [`Self::tmp_dir`].
    #[inline]
    pub fn set_tmp_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.tmp_dir = dir.into();
        self
    }

    /// The transport options forwarded to the downloader factory.
    #[inline]
    pub fn download_options(&self) -> &DownloadOptions {
        &self.download
    }

    /// See [`Self::download_options`].
    #[inline]
    pub fn download_options_mut(&mut self) -> &mut DownloadOptions {
        &mut self.download
    }

    /// Run the pipeline once: resolve, fetch, verify and install.
    ///
    /// On success the box returned by the collection is handed back, after
    /// [`Event::Added`] has been emitted; the collection's `add` is called at
    /// most once per invocation and never when an error is returned.
    #[inline]
    pub fn install(&mut self,
        collection: &mut dyn Collection,
        auth: &mut dyn Authenticator,
        mut handler: impl Handler,
    ) -> Result<StoredBox> {
        self.install_dyn(collection, auth, &mut handler)
    }

    /// Inner install function to force dyn dispatch.
    #[inline(never)]
    fn install_dyn(&mut self,
        collection: &mut dyn Collection,
        auth: &mut dyn Authenticator,
        handler: &mut dyn Handler,
    ) -> Result<StoredBox> {

        if let Some(name) = &self.name && name.contains("://") {
            handler.on_event(Event::NameLooksLikeUrl { name });
        }

        // Parsed up front so a bad algorithm identifier fails before any
        // network I/O.
        let env_checksum = build_checksum(self.checksum.as_deref(), self.checksum_type.as_deref())?;

        if self.urls.is_empty() {
            return Err(Error::Internal {
                error: "no box reference given".into(),
                origin: "install".into(),
            });
        }

        if self.urls.len() > 1 {
            return self.install_multi(collection, auth, handler, env_checksum.as_ref());
        }

        let raw = self.urls[0].clone();
        handler.on_event(Event::Resolving { reference: &remote::redact_str(&raw) });

        match remote::classify(&raw) {
            Some(SourceRef::Shorthand(shorthand)) => {
                self.install_shorthand(collection, auth, handler, &shorthand)
            }
            Some(SourceRef::Url(url)) => {

                let fetched = self.fetch(auth, handler, &url, None)?;
                let is_metadata = meta::classify(fetched.media_type.as_deref(), &fetched.file)
                    .map_err(|e| Error::new_io(e, "classify payload"))?;

                if is_metadata {
                    self.install_metadata(collection, auth, handler, fetched, &raw)
                } else {
                    let (name, architecture) = self.direct_guards(collection)?;
                    self.add_archive(collection, handler, fetched, env_checksum.as_ref(), name, architecture)
                }

            }
            None => Err(Error::Download {
                url: remote::redact_str(&raw),
                message: "invalid box reference".to_string(),
                status: None,
            }),
        }

    }

    /// Direct addition of several URLs, each expected to be an archive, with
    /// left-to-right fallback on transport failures.
    fn install_multi(&self,
        collection: &mut dyn Collection,
        auth: &mut dyn Authenticator,
        handler: &mut dyn Handler,
        env_checksum: Option<&Checksum>,
    ) -> Result<StoredBox> {

        let (name, architecture) = self.direct_guards(collection)?;

        let mut options = self.download.clone();
        auth.authenticate_downloader(&mut options);

        let mut urls = self.urls.clone();
        auth.authenticate_urls(&mut urls);

        if urls.is_empty() {
            return Err(Error::Internal {
                error: "authentication hook removed every box reference".into(),
                origin: "install".into(),
            });
        }

        let mut last_error = None;
        for raw in &urls {

            handler.on_event(Event::Resolving { reference: &remote::redact_str(raw) });

            let url = match remote::classify(raw) {
                Some(SourceRef::Url(url)) => url,
                _ => {
                    last_error = Some(Error::Download {
                        url: remote::redact_str(raw),
                        message: "invalid box reference".to_string(),
                        status: None,
                    });
                    continue;
                }
            };

            match self.fetch_with_options(handler, &options, &url, None) {
                Ok(fetched) => {

                    let is_metadata = meta::classify(fetched.media_type.as_deref(), &fetched.file)
                        .map_err(|e| Error::new_io(e, "classify payload"))?;

                    if is_metadata {
                        return Err(Error::MetadataMultiUrl {
                            url: remote::redact_url(&url).to_string(),
                        });
                    }

                    return self.add_archive(collection, handler, fetched, env_checksum, name, architecture);

                }
                // Transport errors advance to the next URL, anything else
                // aborts immediately.
                Err(e @ Error::Download { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }

        }

        Err(last_error.unwrap())

    }

    /// Expansion of an `owner/name` shorthand: the server's API endpoint is
    /// preferred, the plain URL is the fallback on a not-found response.
    fn install_shorthand(&self,
        collection: &mut dyn Collection,
        auth: &mut dyn Authenticator,
        handler: &mut dyn Handler,
        shorthand: &str,
    ) -> Result<StoredBox> {

        let Some(server) = self.server_url.as_deref() else {
            return Err(Error::ServerNotSet { shorthand: shorthand.to_string() });
        };
        let server = server.trim_end_matches('/');

        let candidates = [
            format!("{server}/api/v2/vagrant/{shorthand}"),
            format!("{server}/{shorthand}"),
        ];

        for candidate in &candidates {

            let url = Url::parse(candidate)
                .map_err(|e| Error::new_internal(e, format!("server url: {}", remote::redact_str(candidate))))?;

            match self.fetch(auth, handler, &url, None) {
                Ok(fetched) => {
                    return self.install_metadata(collection, auth, handler, fetched, candidate);
                }
                Err(Error::Download { status: Some(404), .. }) => continue,
                Err(Error::Download { url, message, .. }) => {
                    return Err(Error::MetadataDownload { url, message });
                }
                Err(e) => return Err(e),
            }

        }

        Err(Error::ShortNotFound { shorthand: shorthand.to_string() })

    }

    /// Resolution through a fetched metadata document: parse it, select the
    /// version and provider entry, fetch the archive with its checksum fused
    /// and install.
    fn install_metadata(&self,
        collection: &mut dyn Collection,
        auth: &mut dyn Authenticator,
        handler: &mut dyn Handler,
        fetched: Fetched,
        metadata_url: &str,
    ) -> Result<StoredBox> {

        let redacted_metadata_url = remote::redact_str(metadata_url);

        let metadata = BoxMetadata::load(&fetched.file)
            .map_err(|e| Error::MetadataDownload {
                url: redacted_metadata_url.clone(),
                message: e.to_string(),
            })?;

        // The document and its lock are no longer needed once parsed.
        drop(fetched);

        handler.on_event(Event::FetchedMetadata { name: &metadata.name });

        if let Some(name) = &self.name && *name != metadata.name {
            return Err(Error::NameMismatch {
                expected: name.clone(),
                actual: metadata.name.clone(),
            });
        }

        let selection = metadata.select(
            self.version.as_ref(),
            &self.providers,
            &self.architecture,
            remote::host_architecture(),
        ).map_err(|e| match e {
            meta::SelectError::NoVersion => Error::NoMatchingVersion {
                name: metadata.name.clone(),
                constraint: self.version.as_ref()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "any".to_string()),
            },
            meta::SelectError::NoProvider => Error::NoMatchingProvider {
                name: metadata.name.clone(),
                requested: if self.providers.is_empty() {
                    "any".to_string()
                } else {
                    self.providers.join(", ")
                },
            },
        })?;

        let version = selection.version.as_str().to_string();

        // When several entries survive and no provider was requested, the
        // handler disambiguates with a 1-based menu selection. A requested
        // provider list already ordered the entries by preference.
        let chosen = if selection.providers.len() > 1 && self.providers.is_empty() {

            let names = selection.providers.iter()
                .map(|s| s.provider.name.as_str())
                .collect::<Vec<_>>();

            let mut choice = 1usize;
            handler.on_event(Event::SelectProvider {
                name: &metadata.name,
                version: &version,
                providers: &names,
                choice: &mut choice,
            });

            match choice.checked_sub(1).and_then(|index| selection.providers.get(index)) {
                Some(chosen) => chosen,
                None => return Err(Error::Internal {
                    error: format!("invalid provider selection: {choice}").into(),
                    origin: "select provider".into(),
                }),
            }

        } else {
            &selection.providers[0]
        };

        let architecture = chosen.architecture.clone();
        let provider_name = chosen.provider.name.clone();

        if let Some(existing) = collection.find(
            &metadata.name,
            std::slice::from_ref(&provider_name),
            &version,
            architecture.as_deref(),
        ) && !self.force {
            return Err(Error::AlreadyExists {
                name: existing.name,
                provider: existing.provider,
                version: existing.version,
            });
        }

        let checksum = build_checksum(
            chosen.provider.checksum.as_deref(),
            chosen.provider.checksum_type.as_deref())?;

        let archive_url = match remote::classify(&chosen.provider.url) {
            Some(SourceRef::Url(url)) => url,
            _ => return Err(Error::Download {
                url: remote::redact_str(&chosen.provider.url),
                message: "invalid provider url".to_string(),
                status: None,
            }),
        };

        if let Some(checksum) = &checksum {
            handler.on_event(Event::VerifyingChecksum { algorithm: checksum.algorithm() });
        }

        let fetched = self.fetch(auth, handler, &archive_url, checksum.as_ref())?;

        let request = AddRequest {
            file: fetched.file.clone(),
            name: metadata.name.clone(),
            version,
            providers: vec![provider_name],
            architecture,
            // Always the original user-supplied URL, never the one the
            // authentication hook rewrote.
            metadata_url: Some(metadata_url.to_string()),
            force: self.force,
        };

        self.finish(collection, handler, &request)

    }

    /// The guards of a direct (archive) addition: a name is mandatory, a
    /// version constraint is rejected, and an installed box of the same
    /// identity fails unless forced. The direct version is always `0`.
    fn direct_guards(&self, collection: &mut dyn Collection) -> Result<(String, Option<String>)> {

        let Some(name) = self.name.clone() else {
            return Err(Error::NameRequired);
        };

        if self.version.is_some() {
            return Err(Error::DirectVersion);
        }

        let architecture = match &self.architecture {
            Architecture::Unset => None,
            Architecture::Auto => remote::host_architecture().map(str::to_string),
            Architecture::Explicit(arch) => Some(arch.clone()),
        };

        if let Some(existing) = collection.find(&name, &self.providers, "0", architecture.as_deref())
            && !self.force
        {
            return Err(Error::AlreadyExists {
                name: existing.name,
                provider: existing.provider,
                version: existing.version,
            });
        }

        Ok((name, architecture))

    }

    /// Verify a directly fetched archive against the configured checksum and
    /// install it.
    fn add_archive(&self,
        collection: &mut dyn Collection,
        handler: &mut dyn Handler,
        fetched: Fetched,
        checksum: Option<&Checksum>,
        name: String,
        architecture: Option<String>,
    ) -> Result<StoredBox> {

        if let Some(checksum) = checksum {

            handler.on_event(Event::VerifyingChecksum { algorithm: checksum.algorithm() });

            let actual = checksum::hash_file(&fetched.file, checksum.algorithm())
                .map_err(|e| Error::new_io_file(e, &fetched.file))?;

            if !checksum.matches(&actual) {
                return Err(Error::ChecksumMismatch {
                    expected: checksum.digest().to_string(),
                    actual,
                });
            }

        }

        let request = AddRequest {
            file: fetched.file.clone(),
            name,
            version: "0".to_string(),
            providers: self.providers.clone(),
            architecture,
            metadata_url: None,
            force: self.force,
        };

        self.finish(collection, handler, &request)

    }

    /// Hand the verified artifact to the collection and notify the handler.
    fn finish(&self,
        collection: &mut dyn Collection,
        handler: &mut dyn Handler,
        request: &AddRequest,
    ) -> Result<StoredBox> {

        let stored = collection.add(request)
            .map_err(|e| Error::new_io(e, "collection add"))?;

        handler.on_event(Event::Added { stored: &stored });

        Ok(stored)

    }

    /// Run both authentication hooks and fetch a single URL.
    fn fetch(&self,
        auth: &mut dyn Authenticator,
        handler: &mut dyn Handler,
        url: &Url,
        checksum: Option<&Checksum>,
    ) -> Result<Fetched> {

        let mut options = self.download.clone();
        auth.authenticate_downloader(&mut options);

        let mut urls = vec![url.to_string()];
        auth.authenticate_urls(&mut urls);

        let rewritten = match urls.into_iter().next() {
            Some(raw) => Url::parse(&raw)
                .map_err(|e| Error::new_internal(e, format!("rewritten url: {}", remote::redact_str(&raw))))?,
            None => url.clone(),
        };

        self.fetch_with_options(handler, &options, &rewritten, checksum)

    }

    /// Fetch a single URL under its lock, to a temporary file keyed like the
    /// lock. The returned guard keeps both alive until dropped.
    fn fetch_with_options(&self,
        handler: &mut dyn Handler,
        options: &DownloadOptions,
        url: &Url,
        checksum: Option<&Checksum>,
    ) -> Result<Fetched> {

        let redacted = remote::redact_url(url).to_string();

        let lock = match UrlLock::acquire(&self.tmp_dir, url.as_str()) {
            Ok(Some(lock)) => lock,
            Ok(None) => return Err(Error::DownloadAlreadyInProgress { url: redacted }),
            Err(e) => return Err(Error::new_io(e, "acquire download lock")),
        };

        handler.on_event(Event::Fetch { url: &redacted });

        let file = self.tmp_dir.join(format!("box{}", crate::lock::url_digest(url.as_str())));

        let downloader = Downloader::new(options).map_err(map_download_error)?;
        let download = downloader
            .download(url, &file, checksum, (&mut *handler).into_download())
            .map_err(map_download_error)?;

        handler.on_event(Event::Fetched { file: &file, size: download.size });

        Ok(Fetched {
            file,
            media_type: download.media_type,
            _lock: lock,
        })

    }

}

/// Map a transfer error onto the pipeline error taxonomy.
fn map_download_error(error: download::Error) -> Error {
    match error {
        download::Error::Status { url, status } => Error::Download {
            url,
            message: format!("status {status}"),
            status: Some(status),
        },
        download::Error::Transport { url, message } => Error::Download {
            url,
            message,
            status: None,
        },
        download::Error::ChecksumMismatch { expected, actual } => Error::ChecksumMismatch {
            expected,
            actual,
        },
        download::Error::Internal { error, origin } => Error::Internal { error, origin },
    }
}

/// Build the expected checksum from raw digest and algorithm strings. A
/// missing or trimmed-empty digest disables verification, a digest with an
/// unknown algorithm identifier is an error.
fn build_checksum(digest: Option<&str>, checksum_type: Option<&str>) -> Result<Option<Checksum>> {

    let Some(digest) = digest else {
        return Ok(None);
    };

    if digest.trim().is_empty() {
        return Ok(None);
    }

    let raw = checksum_type.unwrap_or("").trim();
    let algorithm = raw.parse::<ChecksumAlgorithm>()
        .map_err(|()| Error::ChecksumInvalidType { checksum_type: raw.to_string() })?;

    Ok(Checksum::new(algorithm, digest))

}

/// A downloaded file with the media type the transport surfaced, holding the
/// URL lock for the fetch-and-verify span. Dropping it removes the temporary
/// file and releases the lock, whatever the exit path.
#[derive(Debug)]
struct Fetched {
    file: PathBuf,
    media_type: Option<String>,
    _lock: UrlLock,
}

impl Drop for Fetched {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.file);
    }
}

/// The request handed to the catalog on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    /// The verified archive on disk. Only valid for the duration of the
    /// `add` call, the catalog is expected to move or copy it.
    pub file: PathBuf,
    pub name: String,
    /// `"0"` for direct additions, the selected version otherwise.
    pub version: String,
    /// The selected provider for metadata additions, the acceptable ones as
    /// configured for direct additions.
    pub providers: Vec<String>,
    pub architecture: Option<String>,
    /// The original user-supplied metadata URL, none for direct additions.
    pub metadata_url: Option<String>,
    pub force: bool,
}

/// A box stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBox {
    pub name: String,
    pub version: String,
    pub provider: String,
    pub architecture: Option<String>,
    /// Location of the box inside the catalog.
    pub directory: PathBuf,
}

/// The catalog of installed boxes, external to this pipeline.
pub trait Collection {

    /// Find an installed box matching the given tuple. An empty provider
    /// list or an absent architecture match any.
    fn find(&self,
        name: &str,
        providers: &[String],
        version: &str,
        architecture: Option<&str>,
    ) -> Option<StoredBox>;

    /// Install the verified archive into the catalog. Called at most once
    /// per pipeline invocation.
    fn add(&mut self, request: &AddRequest) -> std::io::Result<StoredBox>;

}

/// Caller-provided authentication hooks, invoked before every download
/// (metadata and archive alike), possibly several times per invocation.
pub trait Authenticator {

    /// Mutate the transport options, typically to install client
    /// certificates or CA material.
    fn authenticate_downloader(&mut self, options: &mut DownloadOptions) {
        let _ = options;
    }

    /// Rewrite the candidate URL list, typically to inject access tokens.
    /// The metadata URL recorded on the artifact stays the original one.
    fn authenticate_urls(&mut self, urls: &mut Vec<String>) {
        let _ = urls;
    }

}

/// Blanket implementation when no authentication is needed.
impl Authenticator for () { }

impl<A: Authenticator + ?Sized> Authenticator for &mut A {

    #[inline]
    fn authenticate_downloader(&mut self, options: &mut DownloadOptions) {
        (**self).authenticate_downloader(options)
    }

    #[inline]
    fn authenticate_urls(&mut self, urls: &mut Vec<String>) {
        (**self).authenticate_urls(urls)
    }

}

/// Events happening while adding a box. Every URL carried by an event has
/// its credential span redacted.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// The given reference will be resolved.
    Resolving { reference: &'a str },
    /// The requested box name looks like a URL, which is probably a mistake
    /// but not a fatal one.
    NameLooksLikeUrl { name: &'a str },
    /// A URL is about to be transferred, its lock being held.
    Fetch { url: &'a str },
    /// A URL has been transferred to the given temporary file.
    Fetched { file: &'a Path, size: u64 },
    /// Progress of the running transfer.
    DownloadProgress { size: u64, total_size: Option<u64> },
    /// A metadata document has been fetched and parsed.
    FetchedMetadata { name: &'a str },
    /// Several provider entries match and none was requested: `choice` is
    /// the 1-based index into `providers`, pre-filled with 1.
    SelectProvider { name: &'a str, version: &'a str, providers: &'a [&'a str], choice: &'a mut usize },
    /// The archive is being verified against the given algorithm.
    VerifyingChecksum { algorithm: ChecksumAlgorithm },
    /// The box has been added to the collection.
    Added { stored: &'a StoredBox },
}

/// A handle for watching an addition.
pub trait Handler {
    /// Handle a single event.
    fn on_event(&mut self, event: Event);
}

// Mutable implementation.
impl<H: Handler + ?Sized> Handler for &mut H {
    #[inline]
    fn on_event(&mut self, event: Event) {
        (**self).on_event(event)
    }
}

impl Handler for () {
    fn on_event(&mut self, event: Event) {
        let _ = event;
    }
}

/// Internal adapter trait for using handlers at the transfer layer.
pub(crate) trait HandlerInto: Handler + Sized {

    #[inline]
    fn into_download(self) -> impl download::Handler {
        pub(crate) struct Adapter<H: Handler>(pub H);
        impl<H: Handler> download::Handler for Adapter<H> {
            fn on_progress(&mut self, size: u64, total_size: Option<u64>) {
                self.0.on_event(Event::DownloadProgress { size, total_size });
            }
        }
        Adapter(self)
    }

}

impl<H: Handler> HandlerInto for H { }

/// The add pipeline could not complete.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Another invocation currently holds the download lock for the same
    /// URL. This surfaces immediately, the pipeline never waits.
    #[error("download already in progress: {url}")]
    DownloadAlreadyInProgress {
        url: String,
    },
    /// Transport-level failure while fetching an archive: missing file,
    /// non-success status, interrupted body.
    #[error("download failed: {url}: {message}")]
    Download {
        url: String,
        message: String,
        status: Option<u16>,
    },
    /// The metadata document was unreachable or malformed.
    #[error("metadata download failed: {url}: {message}")]
    MetadataDownload {
        url: String,
        message: String,
    },
    /// A direct archive addition needs a name to register the box under.
    #[error("a name is required to add an archive directly")]
    NameRequired,
    /// A direct archive addition has no versions to constrain.
    #[error("a version constraint cannot be used when adding an archive directly")]
    DirectVersion,
    /// A box of the same identity is already installed and force is off.
    #[error("box already installed: {name} ({provider}, {version})")]
    AlreadyExists {
        name: String,
        provider: String,
        version: String,
    },
    /// The declared checksum disagrees with the computed digest. The
    /// artifact has not been handed to the collection.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
    },
    /// The declared checksum algorithm identifier is not a supported one.
    #[error("unsupported checksum algorithm: {checksum_type:?}")]
    ChecksumInvalidType {
        checksum_type: String,
    },
    /// A shorthand reference was given but no server URL is configured.
    #[error("no server configured to expand shorthand: {shorthand}")]
    ServerNotSet {
        shorthand: String,
    },
    /// The shorthand was not found at any of the server's endpoints.
    #[error("box not found: {shorthand}")]
    ShortNotFound {
        shorthand: String,
    },
    /// A metadata document resolved from a multiple-URL input, which only
    /// accepts direct archives.
    #[error("metadata is not allowed in a multiple URL input: {url}")]
    MetadataMultiUrl {
        url: String,
    },
    /// The metadata document's name disagrees with the requested name.
    #[error("metadata name {actual:?} does not match requested name {expected:?}")]
    NameMismatch {
        expected: String,
        actual: String,
    },
    /// No version of the box satisfies the constraint.
    #[error("no version of {name} satisfying: {constraint}")]
    NoMatchingVersion {
        name: String,
        constraint: String,
    },
    /// Versions satisfied the constraint but none carries an acceptable
    /// provider entry.
    #[error("no matching provider for {name} (requested: {requested})")]
    NoMatchingProvider {
        name: String,
        requested: String,
    },
    /// A generic error that originates from internal or third-party
    /// dependencies, associated to an origin string that helps knowing the
    /// location of the issue.
    #[error("internal: {error} @ {origin}")]
    Internal {
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
        origin: Box<str>,
    },
}

/// Type alias for a result with the add error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_internal(error: impl std::error::Error + Send + Sync + 'static, origin: impl Into<Box<str>>) -> Self {
        Self::Internal { error: Box::new(error), origin: origin.into() }
    }

    #[inline]
    pub(crate) fn new_io(error: std::io::Error, origin: impl Into<Box<str>>) -> Self {
        Self::new_internal(error, origin)
    }

    #[inline]
    pub(crate) fn new_io_file(error: std::io::Error, file: impl AsRef<Path>) -> Self {
        Self::new_io(error, file.as_ref().display().to_string())
    }

}
