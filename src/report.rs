use crate::assembly::ExtractedAssembly;
use crate::error::BlobError;
use crate::tasks::{PrimaryTaskDefinition, TaskRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Which part of the document an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Task(String),
    Block(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateTask,
    DuplicateParameters,
    UndeclaredTask,
    ReplacedAssembly,
    Cipher,
    Encoding,
    Metadata,
}

impl From<&BlobError> for IssueKind {
    fn from(e: &BlobError) -> Self {
        match e {
            BlobError::Cipher(_) => IssueKind::Cipher,
            BlobError::Metadata(_) => IssueKind::Metadata,
            BlobError::Shape { .. }
            | BlobError::InvalidKey(_)
            | BlobError::Base64(_)
            | BlobError::PathNotUtf8 => IssueKind::Encoding,
        }
    }
}

/// A task or blob that could not be fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub subject: Subject,
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    pub fn task(taskname: &str, kind: IssueKind, message: impl ToString) -> Self {
        Self {
            subject: Subject::Task(taskname.to_string()),
            kind,
            message: message.to_string(),
        }
    }

    pub fn block(block: usize, kind: IssueKind, message: impl ToString) -> Self {
        Self {
            subject: Subject::Block(block),
            kind,
            message: message.to_string(),
        }
    }
}

/// Everything recovered from one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub batch: String,
    pub primary: PrimaryTaskDefinition,
    pub tasks: BTreeMap<String, TaskRecord>,
    pub assemblies: Vec<ExtractedAssembly>,
    pub issues: Vec<Issue>,
}

impl Analysis {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    /// Writes every decoded module to `dir` as `<sha1>.bin`. The declared
    /// path is attacker controlled and never used to build the file name.
    ///
    /// # Errors
    ///
    /// Fails on the first I/O error.
    pub fn dump(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for assembly in &self.assemblies {
            let path = dir.join(format!("{}.bin", assembly.sha1));
            let mut buf_write = BufWriter::new(File::create(&path)?);
            buf_write.write_all(&assembly.raw_bytes)?;
            buf_write.flush()?;
            written.push(path);
        }
        Ok(written)
    }

    /// Plain-text report.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn render(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "=== Batch script")?;
        writeln!(out, "{}", self.batch)?;
        writeln!(out)?;

        let primary = &self.primary;
        writeln!(out, "=== Primary task {}", primary.taskname)?;
        writeln!(out, "factory:      {}", primary.factory)?;
        writeln!(out, "assemblyfile: {}", primary.assemblyfile)?;
        writeln!(out, "code:         {} / {}", primary.code_type, primary.code_language)?;
        writeln!(out, "{}", primary.embedded_code)?;
        writeln!(out)?;

        writeln!(out, "=== Tasks ({})", self.tasks.len())?;
        for record in self.tasks.values() {
            writeln!(out, "{} -> {}", record.taskname, record.assemblyfile)?;
            if let Some(assembly) = &record.assembly {
                writeln!(out, "  path:    {}", assembly.declared_path)?;
                writeln!(out, "  module:  {}", assembly.module_name)?;
                writeln!(out, "  sha1:    {}", assembly.sha1)?;
                writeln!(out, "  sha256:  {}", assembly.sha256)?;
            }
            if let Some(parameters) = &record.parameters {
                for param in &parameters.params {
                    writeln!(out, "  param    {} = {}", param.name, param.value)?;
                }
                if let (Some(name), Some(key)) = (&parameters.key_parameter, &parameters.xor_key) {
                    writeln!(out, "  xor key  {} = {}", name, key)?;
                }
                for decrypted in &parameters.decrypted_strings {
                    writeln!(out, "  string   {:?}", decrypted)?;
                }
            }
        }

        let orphans: Vec<_> = self
            .assemblies
            .iter()
            .filter(|a| !self.tasks.values().any(|t| t.assemblyfile == a.file_name()))
            .collect();
        if !orphans.is_empty() {
            writeln!(out)?;
            writeln!(out, "=== Unreferenced modules")?;
            for assembly in orphans {
                writeln!(
                    out,
                    "block {}: {} ({}, sha1 {})",
                    assembly.block, assembly.declared_path, assembly.module_name, assembly.sha1
                )?;
            }
        }

        if !self.issues.is_empty() {
            writeln!(out)?;
            writeln!(out, "=== Issues ({})", self.issues.len())?;
            for issue in &self.issues {
                match &issue.subject {
                    Subject::Task(name) => write!(out, "task {}", name)?,
                    Subject::Block(block) => write!(out, "block {}", block)?,
                }
                writeln!(out, ": {}", issue.message)?;
            }
        }
        Ok(())
    }
}
