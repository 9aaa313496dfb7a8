use crate::assembly::{self, CilInspector, ExtractedAssembly, ModuleInspector};
use crate::document;
use crate::error::{BlobError, ParseError};
use crate::params::{self, TaskParameterSet};
use crate::report::{Analysis, Issue, IssueKind};
use crate::tasks::{self, Insertion, TaskTableBuilder};
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{debug, info, warn};

// Batch dialect comment marker
const BATCH_COMMENT: &str = "::";

/// What to do when two `UsingTask` elements share a task name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// The later definition wins; an issue is recorded.
    #[default]
    KeepLast,
    /// Abort with [`ParseError::DuplicateTask`].
    Reject,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub duplicate_policy: DuplicatePolicy,
}

pub struct Analyzer<I = CilInspector> {
    options: Options,
    inspector: I,
}

impl Analyzer {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            inspector: CilInspector,
        }
    }
}

impl<I: ModuleInspector> Analyzer<I> {
    pub fn with_inspector(options: Options, inspector: I) -> Self {
        Self { options, inspector }
    }

    /// Runs the whole decode-and-correlate pass over one document.
    ///
    /// # Errors
    ///
    /// Only structural problems abort; failures of single tasks or blobs
    /// are collected as [`Issue`]s in the result.
    pub fn analyze(&self, content: &str) -> Result<Analysis, ParseError> {
        let segments = document::segment(content)?;
        let (batch_source, blobs) = segments
            .comments
            .split_first()
            .ok_or(ParseError::MissingComments)?;
        let (primary, secondaries) = segments
            .using_tasks
            .split_first()
            .ok_or(ParseError::MissingUsingTask)?;

        let batch = batch_script(batch_source);
        let primary = tasks::primary_definition(&segments, primary)?;
        info!(
            "Primary task {} ({} {})",
            primary.taskname, primary.code_language, primary.code_type
        );

        let mut issues = Vec::new();
        let mut builder = TaskTableBuilder::new();

        for element in secondaries {
            let definition = tasks::secondary_definition(element)?;
            let taskname = definition.taskname.clone();
            debug!("Task {} loads {}", taskname, definition.assemblyfile);
            if builder.insert_definition(definition) == Insertion::DuplicateDetected {
                if self.options.duplicate_policy == DuplicatePolicy::Reject {
                    return Err(ParseError::DuplicateTask(taskname));
                }
                warn!("Task {} is declared again, keeping the last definition", taskname);
                issues.push(Issue::task(
                    &taskname,
                    IssueKind::DuplicateTask,
                    "declared more than once, the last definition was kept",
                ));
            }
        }

        for declaration in params::parse_declarations(segments.target) {
            let taskname = &declaration.taskname;
            if !builder.contains(taskname) {
                warn!("Parameters given for undeclared task {}", taskname);
                issues.push(Issue::task(
                    taskname,
                    IssueKind::UndeclaredTask,
                    "parameters given for a task with no UsingTask definition",
                ));
                continue;
            }

            let parameters = params::decode_parameters(&declaration).unwrap_or_else(|e| {
                warn!("Unable to decrypt parameters of {}: {}", taskname, e);
                issues.push(Issue::task(taskname, IssueKind::Cipher, e));
                TaskParameterSet::undecrypted(&declaration)
            });
            if builder.set_parameters(taskname, parameters) == Some(Insertion::DuplicateDetected) {
                warn!("Task {} is invoked again, keeping the last parameters", taskname);
                issues.push(Issue::task(
                    taskname,
                    IssueKind::DuplicateParameters,
                    "invoked more than once, the last parameters were kept",
                ));
            }
        }

        // Blobs decode independently; merging stays on this thread in block order
        let extracted: Vec<(usize, Result<ExtractedAssembly, BlobError>)> = blobs
            .par_iter()
            .enumerate()
            .map(|(i, blob)| (i + 1, assembly::extract(i + 1, blob, &self.inspector)))
            .collect();

        let mut assemblies = Vec::new();
        for (block, result) in extracted {
            let assembly = match result {
                Ok(assembly) => assembly,
                Err(e) => {
                    warn!("Unable to extract block {}: {}", block, e);
                    issues.push(Issue::block(block, IssueKind::from(&e), e));
                    continue;
                }
            };

            info!(
                "Block {}: {} ({}, sha1 {})",
                block, assembly.declared_path, assembly.module_name, assembly.sha1
            );
            let matched = builder.correlate(assembly.file_name(), &assembly.summary());
            if matched.is_empty() {
                info!("No task declares {}", assembly.file_name());
            }
            for (taskname, insertion) in matched {
                if insertion == Insertion::DuplicateDetected {
                    warn!("Task {} already had a module, block {} replaces it", taskname, block);
                    issues.push(Issue::task(
                        &taskname,
                        IssueKind::ReplacedAssembly,
                        format!("module replaced by block {}", block),
                    ));
                }
            }
            assemblies.push(assembly);
        }

        Ok(Analysis {
            batch,
            primary,
            tasks: builder.finalize(),
            assemblies,
            issues,
        })
    }
}

// Line boundaries recognised by the batch block, CR LF counting as one
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Drops the first line of the hidden batch block and every `::` comment.
pub fn batch_script(source: &str) -> String {
    let source = source.replace("\r\n", "\n");
    let source = source.strip_suffix(LINE_BREAKS).unwrap_or(&source);
    source
        .split(LINE_BREAKS)
        .skip(1)
        .filter(|line| !line.starts_with(BATCH_COMMENT))
        .join("\n")
}

/// Analyzes `content` with default options and the .NET metadata reader.
///
/// # Errors
///
/// See [`Analyzer::analyze`].
pub fn analyze(content: &str) -> Result<Analysis, ParseError> {
    Analyzer::new(Options::default()).analyze(content)
}
