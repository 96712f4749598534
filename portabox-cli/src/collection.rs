//! Directory backed box catalog.

use std::path::PathBuf;
use std::fs;
use std::io;

use portabox::add::{AddRequest, Collection, StoredBox};


/// Name of the archive file stored inside each box directory.
const ARCHIVE_NAME: &str = "image.box";

/// A catalog storing each box under
/// `<root>/<name>/<version>/<provider>[-<architecture>]/image.box`.
///
/// The layout is deliberately simple: the pipeline only needs `find` and
/// `add`, and archives are stored verbatim since unpacking is provider
/// specific.
#[derive(Debug)]
pub struct DirCollection {
    root: PathBuf,
}

impl DirCollection {

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn box_dir(&self, name: &str, version: &str, provider: &str, architecture: Option<&str>) -> PathBuf {

        let mut dir_name = provider.to_string();
        if let Some(architecture) = architecture {
            dir_name.push('-');
            dir_name.push_str(architecture);
        }

        self.root
            .join(escape_name(name))
            .join(version)
            .join(dir_name)

    }

}

impl Collection for DirCollection {

    fn find(&self,
        name: &str,
        providers: &[String],
        version: &str,
        architecture: Option<&str>,
    ) -> Option<StoredBox> {

        let version_dir = self.root.join(escape_name(name)).join(version);
        let read_dir = fs::read_dir(&version_dir).ok()?;

        for entry in read_dir.flatten() {

            let file_name = entry.file_name();
            let Some(dir_name) = file_name.to_str() else {
                continue;
            };

            // A directory is either "<provider>" or "<provider>-<arch>".
            let (provider, entry_arch) = match dir_name.split_once('-') {
                Some((provider, arch)) => (provider, Some(arch)),
                None => (dir_name, None),
            };

            if !providers.is_empty() && !providers.iter().any(|p| p == provider) {
                continue;
            }

            if let Some(architecture) = architecture && entry_arch != Some(architecture) {
                continue;
            }

            if entry.path().join(ARCHIVE_NAME).is_file() {
                return Some(StoredBox {
                    name: name.to_string(),
                    version: version.to_string(),
                    provider: provider.to_string(),
                    architecture: entry_arch.map(str::to_string),
                    directory: entry.path(),
                });
            }

        }

        None

    }

    fn add(&mut self, request: &AddRequest) -> io::Result<StoredBox> {

        let provider = request.providers.first()
            .map(String::as_str)
            .unwrap_or("unknown");

        let dir = self.box_dir(&request.name, &request.version, provider, request.architecture.as_deref());

        if dir.exists() {
            if !request.force {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("box directory already exists: {}", dir.display())));
            }
            fs::remove_dir_all(&dir)?;
        }

        fs::create_dir_all(&dir)?;
        fs::copy(&request.file, dir.join(ARCHIVE_NAME))?;

        Ok(StoredBox {
            name: request.name.clone(),
            version: request.version.clone(),
            provider: provider.to_string(),
            architecture: request.architecture.clone(),
            directory: dir,
        })

    }

}

/// Box names resolved from metadata may contain a `/` (like
/// `hashicorp/bionic64`), which cannot appear in a single path component.
fn escape_name(name: &str) -> String {
    name.replace('/', "-SLASH-")
}
