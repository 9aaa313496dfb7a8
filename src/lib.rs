#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

//! Decoder for payloads hidden inside obfuscated MSBuild project files:
//! the batch script kept in the first comment, the inline loader task,
//! the XOR-encrypted task parameters and the encoded .NET modules stored
//! in the remaining comments.

pub mod assembly;
pub mod cipher;
pub mod document;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod report;
pub mod tasks;

pub use error::{BlobError, CipherError, ParseError};
pub use pipeline::{analyze, Analyzer, DuplicatePolicy, Options};
pub use report::{Analysis, Issue, IssueKind, Subject};
