use std::fs;

use portabox::checksum::{Checksum, ChecksumAlgorithm};
use portabox::download::{Downloader, DownloadOptions, Error};

use tempfile::TempDir;

use mockito::{Server, ServerGuard};

use url::Url;


const BODY: &str = "Hello world!";
const BODY_SHA1: &str = "d3486ae9136e7856bc42212385ea797094475802";


struct TestDownload {
    server: ServerGuard,
    dir: TempDir,
    downloader: Downloader,
}

impl TestDownload {

    fn new() -> Self {
        Self {
            server: Server::new(),
            dir: tempfile::tempdir().unwrap(),
            downloader: Downloader::new(&DownloadOptions::default()).unwrap(),
        }
    }

    fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}/{path}", self.server.url())).unwrap()
    }

}


#[test]
fn success_with_media_type() {

    let mut test = TestDownload::new();

    let mock = test.server.mock("GET", "/foo.box")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body(BODY)
        .create();

    let url = test.url("foo.box");
    let dest = test.dir.path().join("foo.box");

    let download = test.downloader.download(&url, &dest, None, ()).unwrap();
    assert_eq!(download.size, BODY.len() as u64);
    assert_eq!(download.media_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(fs::read_to_string(&dest).unwrap(), BODY);
    mock.assert();

}

#[test]
fn invalid_status() {

    let mut test = TestDownload::new();

    test.server.mock("GET", "/missing.box")
        .with_status(404)
        .create();

    let url = test.url("missing.box");
    let dest = test.dir.path().join("missing.box");

    match test.downloader.download(&url, &dest, None, ()).unwrap_err() {
        Error::Status { status, .. } => assert_eq!(status, 404),
        e => panic!("{e:?}"),
    }

    assert!(!dest.exists());

}

#[test]
fn fused_checksum_success() {

    let mut test = TestDownload::new();

    test.server.mock("GET", "/foo.box")
        .with_status(200)
        .with_body(BODY)
        .create();

    let url = test.url("foo.box");
    let dest = test.dir.path().join("foo.box");
    let checksum = Checksum::new(ChecksumAlgorithm::Sha1, BODY_SHA1).unwrap();

    test.downloader.download(&url, &dest, Some(&checksum), ()).unwrap();
    assert!(dest.is_file());

}

#[test]
fn fused_checksum_mismatch_deletes_file() {

    let mut test = TestDownload::new();

    test.server.mock("GET", "/foo.box")
        .with_status(200)
        .with_body(BODY)
        .create();

    let url = test.url("foo.box");
    let dest = test.dir.path().join("foo.box");
    let checksum = Checksum::new(
        ChecksumAlgorithm::Sha1,
        "0000000000000000000000000000000000000000").unwrap();

    match test.downloader.download(&url, &dest, Some(&checksum), ()).unwrap_err() {
        Error::ChecksumMismatch { actual, .. } => assert_eq!(actual, BODY_SHA1),
        e => panic!("{e:?}"),
    }

    assert!(!dest.exists());

}

#[test]
fn file_scheme() {

    let test = TestDownload::new();

    let source = test.dir.path().join("source.box");
    fs::write(&source, BODY).unwrap();

    let url = Url::from_file_path(&source).unwrap();
    let dest = test.dir.path().join("dest.box");
    let checksum = Checksum::new(ChecksumAlgorithm::Sha1, BODY_SHA1).unwrap();

    let download = test.downloader.download(&url, &dest, Some(&checksum), ()).unwrap();
    assert_eq!(download.size, BODY.len() as u64);
    assert_eq!(download.media_type, None);
    assert_eq!(fs::read_to_string(&dest).unwrap(), BODY);

}

#[test]
fn file_scheme_missing_source() {

    let test = TestDownload::new();

    let url = Url::from_file_path(test.dir.path().join("missing.box")).unwrap();
    let dest = test.dir.path().join("dest.box");

    assert!(matches!(
        test.downloader.download(&url, &dest, None, ()).unwrap_err(),
        Error::Transport { .. }));
    assert!(!dest.exists());

}

#[test]
fn unsupported_scheme() {

    let test = TestDownload::new();

    let url = Url::parse("ftp://host/foo.box").unwrap();
    let dest = test.dir.path().join("foo.box");

    match test.downloader.download(&url, &dest, None, ()).unwrap_err() {
        Error::Transport { message, .. } => assert!(message.contains("ftp")),
        e => panic!("{e:?}"),
    }

}

#[test]
fn error_urls_are_redacted() {

    let mut test = TestDownload::new();

    test.server.mock("GET", "/private.box")
        .with_status(403)
        .create();

    let mut url = test.url("private.box");
    url.set_username("vaguser").unwrap();
    url.set_password(Some("secret123")).unwrap();

    let dest = test.dir.path().join("private.box");
    let error = test.downloader.download(&url, &dest, None, ()).unwrap_err();

    let message = error.to_string();
    assert!(!message.contains("vaguser"), "{message}");
    assert!(!message.contains("secret123"), "{message}");

}

#[test]
fn progress_is_reported() {

    struct CountingHandler(u64);

    impl portabox::download::Handler for CountingHandler {
        fn on_progress(&mut self, size: u64, _total_size: Option<u64>) {
            self.0 = size;
        }
    }

    let mut test = TestDownload::new();

    test.server.mock("GET", "/foo.box")
        .with_status(200)
        .with_body(BODY)
        .create();

    let url = test.url("foo.box");
    let dest = test.dir.path().join("foo.box");

    let mut handler = CountingHandler(0);
    test.downloader.download(&url, &dest, None, &mut handler).unwrap();
    assert_eq!(handler.0, BODY.len() as u64);

}
