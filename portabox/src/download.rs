//! The downloader factory and single-file streaming downloads with fused
//! checksum verification.
//!
//! The factory builds a transport handle wired with the TLS and redirect
//! options of the caller, the handle then streams a URL to a destination
//! file while feeding the expected checksum's hasher, so a corrupt artifact
//! never survives the transfer.

use std::io::{self, Read, Write as _};
use std::path::{Path, PathBuf};
use std::fs::{self, File};
use std::future::Future;

use once_cell::sync::OnceCell;
use reqwest::{Certificate, Identity};
use url::Url;

use crate::checksum::Checksum;
use crate::remote;


/// The user agent sent with every request.
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Transport options forwarded to the underlying client. Absent options take
/// the transport defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// PEM bundle of CA certificates to trust.
    pub ca_cert: Option<PathBuf>,
    /// Directory of PEM CA certificates to trust (`.pem` and `.crt` files).
    pub ca_path: Option<PathBuf>,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
    /// PEM client identity, the certificate followed by its private key.
    pub client_cert: Option<PathBuf>,
    /// Keep following redirects that would otherwise be refused for carrying
    /// credentials across origins.
    pub location_trusted: bool,
    /// Allow TLS revocation checks to be skipped when the platform backend
    /// cannot complete them. Only meaningful on backends that perform
    /// revocation checks at all, kept so that hooks can toggle it.
    pub disable_ssl_revoke_best_effort: bool,
}

impl DownloadOptions {

    /// True if every option takes the transport default, in which case the
    /// process-wide client can be shared.
    fn is_transport_default(&self) -> bool {
        *self == Self::default()
    }

    /// Build a client wired with these options. The rustls backend is forced
    /// so that PEM client identities behave the same on every platform.
    fn client(&self) -> Result<reqwest::Client> {

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls();

        if let Some(file) = &self.ca_cert {
            builder = builder.add_root_certificate(read_certificate(file)?);
        }

        if let Some(dir) = &self.ca_path {
            let entries = fs::read_dir(dir)
                .map_err(|e| Error::new_io(e, format!("read dir: {}", dir.display())))?;
            for entry in entries {
                let entry = entry
                    .map_err(|e| Error::new_io(e, format!("read dir: {}", dir.display())))?;
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "pem" || ext == "crt") {
                    builder = builder.add_root_certificate(read_certificate(&path)?);
                }
            }
        }

        if self.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(file) = &self.client_cert {
            let pem = fs::read(file)
                .map_err(|e| Error::new_io_file(e, file))?;
            let identity = Identity::from_pem(&pem)
                .map_err(|e| Error::new_reqwest(e, format!("client cert: {}", file.display())))?;
            builder = builder.identity(identity);
        }

        if self.location_trusted {
            builder = builder.redirect(reqwest::redirect::Policy::custom(|attempt| {
                if attempt.previous().len() >= 10 {
                    attempt.error("too many redirects")
                } else {
                    attempt.follow()
                }
            }));
        }

        builder.build()
            .map_err(|e| Error::new_reqwest(e, "build client"))

    }

}

/// A transport handle downloading URLs to caller-provided destination paths.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {

    /// Build a transport handle wired with the given options.
    pub fn new(options: &DownloadOptions) -> Result<Self> {

        // Clients are expensive to build, the default-option one is shared
        // process-wide.
        if options.is_transport_default() {
            static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();
            let client = CLIENT.get_or_try_init(|| options.client())?.clone();
            return Ok(Self { client });
        }

        Ok(Self {
            client: options.client()?,
        })

    }

    /// Download the given URL to the destination file.
    ///
    /// The optional checksum is verified while the payload is streamed to
    /// disk; on mismatch the file is deleted and [`Error::ChecksumMismatch`]
    /// is returned. Supported schemes are `http(s)` and `file`; anything else
    /// (notably `ftp`) is reported as a transport failure. Every URL carried
    /// by a returned error is credential-redacted.
    pub fn download(&self,
        url: &Url,
        dest: &Path,
        checksum: Option<&Checksum>,
        mut handler: impl Handler,
    ) -> Result<Download> {

        let redacted = remote::redact_url(url).to_string();

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::new_io(e, format!("create dir: {}", dir.display())))?;
        }

        let result = match url.scheme() {
            "file" => self.download_path(url, dest, checksum, &mut handler, &redacted),
            "http" | "https" => self.download_http(url, dest, checksum, &mut handler, &redacted),
            scheme => Err(Error::Transport {
                url: redacted.clone(),
                message: format!("unsupported scheme: {scheme}"),
            }),
        };

        if result.is_err() {
            let _ = fs::remove_file(dest);
        }

        result

    }

    /// Transfer a `file://` URL by streaming the source file.
    fn download_path(&self,
        url: &Url,
        dest: &Path,
        checksum: Option<&Checksum>,
        handler: &mut dyn Handler,
        redacted: &str,
    ) -> Result<Download> {

        let source = url.to_file_path()
            .map_err(|()| Error::Transport {
                url: redacted.to_string(),
                message: "invalid file url".to_string(),
            })?;

        let mut reader = File::open(&source)
            .map_err(|e| Error::Transport {
                url: redacted.to_string(),
                message: e.to_string(),
            })?;

        let total_size = reader.metadata().ok().map(|m| m.len());

        let mut dst = File::create(dest)
            .map_err(|e| Error::new_io_file(e, dest))?;

        let mut hasher = checksum.map(Checksum::hasher);
        let mut size = 0u64;
        let mut buf = [0u8; 65536];

        loop {

            let len = reader.read(&mut buf)
                .map_err(|e| Error::Transport {
                    url: redacted.to_string(),
                    message: e.to_string(),
                })?;

            if len == 0 {
                break;
            }

            dst.write_all(&buf[..len])
                .map_err(|e| Error::new_io_file(e, dest))?;

            if let Some(hasher) = &mut hasher {
                hasher.update(&buf[..len]);
            }

            size += len as u64;
            handler.on_progress(size, total_size);

        }

        drop(dst);
        check_fused(checksum, hasher)?;

        Ok(Download {
            media_type: None,
            size,
        })

    }

    /// Transfer an `http(s)` URL by streaming the response body.
    fn download_http(&self,
        url: &Url,
        dest: &Path,
        checksum: Option<&Checksum>,
        handler: &mut dyn Handler,
        redacted: &str,
    ) -> Result<Download> {

        block_on(async move {

            let res = self.client.get(url.clone()).send().await
                .map_err(|e| Error::new_transport(redacted, e))?;

            let status = res.status();
            if !status.is_success() {
                return Err(Error::Status {
                    url: redacted.to_string(),
                    status: status.as_u16(),
                });
            }

            let media_type = res.headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let total_size = res.content_length();

            let mut dst = File::create(dest)
                .map_err(|e| Error::new_io_file(e, dest))?;

            let mut hasher = checksum.map(Checksum::hasher);
            let mut size = 0u64;
            let mut res = res;

            while let Some(chunk) = res.chunk().await.map_err(|e| Error::new_transport(redacted, e))? {

                dst.write_all(&chunk)
                    .map_err(|e| Error::new_io_file(e, dest))?;

                if let Some(hasher) = &mut hasher {
                    hasher.update(&chunk);
                }

                size += chunk.len() as u64;
                handler.on_progress(size, total_size);

            }

            drop(dst);
            check_fused(checksum, hasher)?;

            Ok(Download {
                media_type,
                size,
            })

        })?

    }

}

/// Run an async transfer to completion from the blocking caller: async only
/// exists at the transport boundary, so every transfer gets its own
/// single-threaded runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output> {

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::new_io(e, "build runtime"))?;

    Ok(rt.block_on(future))

}

/// Compare the fused hasher against the expected checksum, if any.
fn check_fused(checksum: Option<&Checksum>, hasher: Option<crate::checksum::ChecksumHasher>) -> Result<()> {

    if let (Some(checksum), Some(hasher)) = (checksum, hasher) {
        let actual = hasher.finalize();
        if !checksum.matches(&actual) {
            return Err(Error::ChecksumMismatch {
                expected: checksum.digest().to_string(),
                actual,
            });
        }
    }

    Ok(())

}

fn read_certificate(file: &Path) -> Result<Certificate> {
    let pem = fs::read(file)
        .map_err(|e| Error::new_io_file(e, file))?;
    Certificate::from_pem(&pem)
        .map_err(|e| Error::new_reqwest(e, format!("ca cert: {}", file.display())))
}

/// The outcome of a successful transfer.
#[derive(Debug)]
pub struct Download {
    /// The raw media type surfaced by the transport, when it surfaced one.
    pub media_type: Option<String>,
    /// Total transferred size.
    pub size: u64,
}

/// A handle for watching a single transfer's progress.
pub trait Handler {
    /// Notification of transfer progress: bytes written so far and the total
    /// size when the transport announced one.
    fn on_progress(&mut self, size: u64, total_size: Option<u64>);
}

impl Handler for () {
    fn on_progress(&mut self, size: u64, total_size: Option<u64>) {
        let _ = (size, total_size);
    }
}

impl<H: Handler + ?Sized> Handler for &mut H {
    #[inline]
    fn on_progress(&mut self, size: u64, total_size: Option<u64>) {
        (**self).on_progress(size, total_size)
    }
}

/// The transfer could not complete.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The response carried a non-success status code.
    #[error("download failed: {url}: status {status}")]
    Status {
        url: String,
        status: u16,
    },
    /// Transport-level failure: unsupported scheme, unreachable source,
    /// interrupted body. The URL is credential-redacted.
    #[error("download failed: {url}: {message}")]
    Transport {
        url: String,
        message: String,
    },
    /// The declared checksum disagrees with the digest computed over the
    /// transferred payload. The destination file has been deleted.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
    },
    /// A generic error that originates from internal or third-party
    /// dependencies, associated to an origin string that helps locating the
    /// issue.
    #[error("internal: {error} @ {origin}")]
    Internal {
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
        origin: Box<str>,
    },
}

/// Type alias for a result with the download error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io(error: io::Error, origin: impl Into<Box<str>>) -> Self {
        Self::Internal { error: Box::new(error), origin: origin.into() }
    }

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::new_io(error, file.as_ref().display().to_string())
    }

    #[inline]
    pub(crate) fn new_reqwest(error: reqwest::Error, origin: impl Into<Box<str>>) -> Self {
        Self::Internal { error: Box::new(error), origin: origin.into() }
    }

    /// Build a transport error from a reqwest error, stripping the URL from
    /// the underlying error so that no unredacted URL leaks into messages.
    #[inline]
    pub(crate) fn new_transport(redacted_url: &str, error: reqwest::Error) -> Self {
        Self::Transport {
            url: redacted_url.to_string(),
            message: error.without_url().to_string(),
        }
    }

}
