//! Portabox CLI.

use std::fmt::{self, Write as _};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use portabox::add::{self, Architecture, Event, Installer};
use portabox::version::VersionConstraint;

mod collection;

use collection::DirCollection;


#[derive(Debug, Parser)]
#[command(name = "portabox", version, about = "Manage versioned VM box images in a local catalog")]
struct CliArgs {
    /// Root directory of the local box catalog.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: CliCmd,
}

#[derive(Debug, Subcommand)]
enum CliCmd {
    /// Add a box to the local catalog.
    Add(AddArgs),
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Box reference: an archive URL or path, a metadata document or an
    /// owner/name shorthand. Several references fall back left to right and
    /// must all point directly at archives.
    #[arg(required = true)]
    address: Vec<String>,
    /// Name to register the box under, required for direct archives.
    #[arg(long)]
    name: Option<String>,
    /// Acceptable provider, repeatable, in order of preference.
    #[arg(long = "provider")]
    providers: Vec<String>,
    /// Version constraint applied to metadata versions, e.g. ">= 1.0, < 2.0".
    #[arg(long)]
    box_version: Option<String>,
    /// Expected checksum of the archive.
    #[arg(long)]
    checksum: Option<String>,
    /// Checksum algorithm: md5, sha1, sha256, sha384 or sha512.
    #[arg(long)]
    checksum_type: Option<String>,
    /// Architecture to select, "auto" matches the host.
    #[arg(long)]
    architecture: Option<String>,
    /// Overwrite an already installed box of the same identity.
    #[arg(long, short)]
    force: bool,
    /// Server used to expand owner/name shorthands.
    #[arg(long, env = "PORTABOX_SERVER_URL")]
    server_url: Option<String>,
    /// Directory for temporary downloads and lock files.
    #[arg(long)]
    tmp_dir: Option<PathBuf>,
    /// PEM bundle of CA certificates to trust.
    #[arg(long)]
    ca_cert: Option<PathBuf>,
    /// Directory of PEM CA certificates to trust.
    #[arg(long)]
    ca_path: Option<PathBuf>,
    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,
    /// PEM client identity, the certificate followed by its key.
    #[arg(long)]
    client_cert: Option<PathBuf>,
    /// Keep following redirects carrying credentials across origins.
    #[arg(long)]
    location_trusted: bool,
    /// Allow TLS revocation checks to be skipped when the backend cannot
    /// complete them.
    #[arg(long)]
    disable_ssl_revoke_best_effort: bool,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    match args.cmd {
        CliCmd::Add(add_args) => cmd_add(args.data_dir, add_args),
    }
}

fn cmd_add(data_dir: Option<PathBuf>, args: AddArgs) -> ExitCode {

    let mut handler = CliHandler::default();

    let Some(data_dir) = data_dir.or_else(default_data_dir) else {
        handler.state("FAILED", format_args!("No default data directory for your platform, use --data-dir"));
        handler.newline();
        return ExitCode::FAILURE;
    };

    let mut installer = Installer::with_urls(args.address);

    if let Some(name) = args.name {
        installer.set_name(name);
    }

    installer.set_providers(args.providers);
    installer.set_force(args.force);

    if let Some(raw) = args.box_version {
        let Some(constraint) = VersionConstraint::new(&raw) else {
            handler.state("FAILED", format_args!("Invalid version constraint: {raw}"));
            handler.newline();
            return ExitCode::FAILURE;
        };
        installer.set_version(constraint);
    }

    if let Some(checksum) = args.checksum {
        installer.set_checksum(checksum);
    }

    if let Some(checksum_type) = args.checksum_type {
        installer.set_checksum_type(checksum_type);
    }

    installer.set_architecture(match args.architecture.as_deref() {
        None => Architecture::Unset,
        Some("auto") => Architecture::Auto,
        Some(arch) => Architecture::Explicit(arch.to_string()),
    });

    if args.server_url.is_some() {
        installer.set_server_url(args.server_url);
    }

    if let Some(tmp_dir) = args.tmp_dir {
        installer.set_tmp_dir(tmp_dir);
    }

    let options = installer.download_options_mut();
    options.ca_cert = args.ca_cert;
    options.ca_path = args.ca_path;
    options.insecure = args.insecure;
    options.client_cert = args.client_cert;
    options.location_trusted = args.location_trusted;
    options.disable_ssl_revoke_best_effort = args.disable_ssl_revoke_best_effort;

    let mut collection = DirCollection::new(data_dir.join("boxes"));

    match installer.install(&mut collection, &mut (), &mut handler) {
        Ok(stored) => {
            handler.newline();
            let architecture = stored.architecture.as_deref().unwrap_or("any arch");
            handler.state("OK", format_args!("Added box {} ({}, {}, {architecture})",
                stored.name, stored.version, stored.provider));
            handler.newline();
            ExitCode::SUCCESS
        }
        Err(e) => {
            handler.newline();
            handler.state("FAILED", format_args!("{e}"));
            handler.newline();
            ExitCode::FAILURE
        }
    }

}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("portabox"))
}

/// Line oriented output handler: the current line is rewritten in place
/// until a newline seals it.
#[derive(Debug, Default)]
struct CliHandler {
    /// The buffer containing the whole rendered line.
    line_buf: String,
}

impl CliHandler {

    /// Update the current line.
    fn line(&mut self, message: fmt::Arguments) -> &mut Self {

        let last_line_len = self.line_buf.len();
        self.line_buf.clear();
        self.line_buf.write_fmt(message).unwrap();

        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r{:last_line_len$}", self.line_buf);
        let _ = stdout.flush();

        self

    }

    /// Update the current state.
    fn state(&mut self, state: &str, message: fmt::Arguments) -> &mut Self {
        self.line(format_args!("[{state:^6}] {message}"))
    }

    /// Add a newline and reset the buffer, only if there was a preview.
    fn newline(&mut self) -> &mut Self {
        if self.line_buf.is_empty() {
            return self;
        }
        self.line_buf.clear();
        println!();
        self
    }

}

impl add::Handler for CliHandler {
    fn on_event(&mut self, event: Event) {
        match event {
            Event::Resolving { reference } =>
                self.state("..", format_args!("Resolving {reference}")),
            Event::NameLooksLikeUrl { name } =>
                self.state("WARN", format_args!("The box name {name:?} looks like a URL"))
                    .newline(),
            Event::Fetch { url } =>
                self.state("..", format_args!("Downloading {url}")),
            Event::Fetched { size, .. } =>
                self.state("OK", format_args!("Downloaded {}", format_size(size)))
                    .newline(),
            Event::DownloadProgress { size, total_size } => {
                match total_size {
                    Some(total_size) =>
                        self.state("..", format_args!("Downloading {} / {}", format_size(size), format_size(total_size))),
                    None =>
                        self.state("..", format_args!("Downloading {}", format_size(size))),
                }
            }
            Event::FetchedMetadata { name } =>
                self.state("OK", format_args!("Loaded metadata for {name}"))
                    .newline(),
            Event::SelectProvider { name, version, providers, choice } => {
                self.newline();
                println!("Multiple providers exist for {name} {version}, choose one:");
                for (i, provider) in providers.iter().enumerate() {
                    println!(" {}) {provider}", i + 1);
                }
                *choice = ask_selection(providers.len()).unwrap_or(1);
                self
            }
            Event::VerifyingChecksum { algorithm } =>
                self.state("..", format_args!("Verifying {algorithm} checksum")),
            Event::Added { stored } =>
                self.state("OK", format_args!("Installed {} {}", stored.name, stored.version))
                    .newline(),
            _ => self,
        };
    }
}

/// Ask a 1-based selection on stdin until valid, none on end of input.
fn ask_selection(max: usize) -> Option<usize> {

    let mut stdin = io::stdin().lock();
    let mut line = String::new();

    loop {

        print!("> ");
        let _ = io::stdout().flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => (),
        }

        if let Ok(n) = line.trim().parse::<usize>() {
            if (1..=max).contains(&n) {
                return Some(n);
            }
        }

    }

}

/// Render a byte count with a decimal unit prefix, download sizes only need
/// bytes up to gigabytes.
fn format_size(size: u64) -> String {
    if size < 1_000 {
        format!("{size} B")
    } else if size < 1_000_000 {
        format!("{:.1} kB", size as f32 / 1_000.0)
    } else if size < 1_000_000_000 {
        format!("{:.1} MB", size as f32 / 1_000_000.0)
    } else {
        format!("{:.1} GB", size as f32 / 1_000_000_000.0)
    }
}
