//! Portabox is a library and CLI for fetching versioned VM image archives
//! ("boxes") and installing them into a local catalog.
//!
//! The entry point is [`add::Installer`], which resolves a user reference
//! (archive URL, local path, metadata document or `owner/name` shorthand),
//! downloads it under a per-URL file lock, verifies its checksum and hands
//! the verified artifact to a [`add::Collection`].

#![deny(unsafe_op_in_unsafe_fn)]

pub mod remote;
pub mod version;
pub mod checksum;
pub mod lock;
pub mod download;

pub mod meta;
pub mod add;
