use crate::assembly::AssemblySummary;
use crate::document::{self, Element, Segments};
use crate::error::ParseError;
use crate::params::TaskParameterSet;
use serde::Serialize;
use std::collections::BTreeMap;

/// The inline task carrying the loader source stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryTaskDefinition {
    pub taskname: String,
    pub factory: String,
    pub assemblyfile: String,
    pub code_type: String,
    pub code_language: String,
    pub embedded_code: String,
}

/// A task that loads an external module by file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryTaskDefinition {
    pub taskname: String,
    pub assemblyfile: String,
}

/// Final, read-only view of one secondary task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub taskname: String,
    pub assemblyfile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TaskParameterSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblySummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    DuplicateDetected,
}

fn required(
    element: &Element<'_>,
    kind: &'static str,
    attribute: &'static str,
) -> Result<String, ParseError> {
    element
        .attribute(attribute)
        .map(str::to_string)
        .ok_or(ParseError::MissingAttribute {
            element: kind,
            attribute,
        })
}

/// Reads the first `UsingTask` element and its nested `Code` element.
///
/// # Errors
///
/// Fails when an attribute or the `Code` element is missing.
pub fn primary_definition(
    segments: &Segments<'_>,
    element: &Element<'_>,
) -> Result<PrimaryTaskDefinition, ParseError> {
    let taskname = required(element, "UsingTask", "taskname")?;
    let factory = required(element, "UsingTask", "taskfactory")?;
    let assemblyfile = required(element, "UsingTask", "assemblyfile")?;

    let Some(code) = segments.children(element, "code").into_iter().next() else {
        return Err(ParseError::MissingCode(taskname));
    };

    Ok(PrimaryTaskDefinition {
        code_type: required(&code, "Code", "type")?,
        code_language: required(&code, "Code", "language")?,
        embedded_code: document::text_content(code.inner).trim().to_string(),
        taskname,
        factory,
        assemblyfile,
    })
}

/// # Errors
///
/// Fails when `taskname` or `assemblyfile` is missing.
pub fn secondary_definition(element: &Element<'_>) -> Result<SecondaryTaskDefinition, ParseError> {
    Ok(SecondaryTaskDefinition {
        taskname: required(element, "UsingTask", "taskname")?,
        assemblyfile: required(element, "UsingTask", "assemblyfile")?,
    })
}

#[derive(Debug)]
struct TaskDraft {
    definition: SecondaryTaskDefinition,
    parameters: Option<TaskParameterSet>,
    assembly: Option<AssemblySummary>,
}

/// Collects the pieces of every secondary task across the passes over the
/// document, then finalizes them into [`TaskRecord`]s.
#[derive(Debug, Default)]
pub struct TaskTableBuilder {
    drafts: BTreeMap<String, TaskDraft>,
}

impl TaskTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, taskname: &str) -> bool {
        self.drafts.contains_key(taskname)
    }

    /// Adds a definition. A repeated taskname replaces the earlier
    /// definition together with anything already attached to it.
    pub fn insert_definition(&mut self, definition: SecondaryTaskDefinition) -> Insertion {
        let draft = TaskDraft {
            definition,
            parameters: None,
            assembly: None,
        };
        match self.drafts.insert(draft.definition.taskname.clone(), draft) {
            Some(_) => Insertion::DuplicateDetected,
            None => Insertion::Inserted,
        }
    }

    /// Attaches a parameter set. Returns `None` if no such task was defined.
    pub fn set_parameters(
        &mut self,
        taskname: &str,
        parameters: TaskParameterSet,
    ) -> Option<Insertion> {
        let draft = self.drafts.get_mut(taskname)?;
        Some(match draft.parameters.replace(parameters) {
            Some(_) => Insertion::DuplicateDetected,
            None => Insertion::Inserted,
        })
    }

    /// Attaches `summary` to every task declaring `file_name`. Returns the
    /// names of the tasks that matched and whether each already had one.
    pub fn correlate(
        &mut self,
        file_name: &str,
        summary: &AssemblySummary,
    ) -> Vec<(String, Insertion)> {
        self.drafts
            .values_mut()
            .filter(|draft| draft.definition.assemblyfile == file_name)
            .map(|draft| {
                let insertion = match draft.assembly.replace(summary.clone()) {
                    Some(_) => Insertion::DuplicateDetected,
                    None => Insertion::Inserted,
                };
                (draft.definition.taskname.clone(), insertion)
            })
            .collect()
    }

    pub fn finalize(self) -> BTreeMap<String, TaskRecord> {
        self.drafts
            .into_iter()
            .map(|(name, draft)| {
                let record = TaskRecord {
                    taskname: draft.definition.taskname,
                    assemblyfile: draft.definition.assemblyfile,
                    parameters: draft.parameters,
                    assembly: draft.assembly,
                };
                (name, record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::segment;
    use pretty_assertions::assert_eq;

    fn secondary(name: &str, file: &str) -> SecondaryTaskDefinition {
        SecondaryTaskDefinition {
            taskname: name.to_string(),
            assemblyfile: file.to_string(),
        }
    }

    fn summary(path: &str) -> AssemblySummary {
        AssemblySummary {
            declared_path: path.to_string(),
            sha1: "00".to_string(),
            sha256: "11".to_string(),
            module_name: "Mod.dll".to_string(),
        }
    }

    #[test]
    fn reads_primary_definition() {
        let doc = r#"<!--x-->
<UsingTask TaskName="Loader" TaskFactory="CodeTaskFactory" AssemblyFile="Microsoft.Build.Tasks.v4.0.dll">
  <Task><Code Type="Fragment" Language="vb">
    <![CDATA[
      Dim x = 1
    ]]>
  </Code></Task>
</UsingTask><Target/>"#;
        let segments = segment(doc).unwrap();
        let primary = primary_definition(&segments, &segments.using_tasks[0]).unwrap();
        assert_eq!(
            primary,
            PrimaryTaskDefinition {
                taskname: "Loader".to_string(),
                factory: "CodeTaskFactory".to_string(),
                assemblyfile: "Microsoft.Build.Tasks.v4.0.dll".to_string(),
                code_type: "Fragment".to_string(),
                code_language: "vb".to_string(),
                embedded_code: "Dim x = 1".to_string(),
            }
        );
    }

    #[test]
    fn primary_without_code_fails() {
        let doc = r#"<!--x--><UsingTask TaskName="L" TaskFactory="F" AssemblyFile="A"></UsingTask><Target/>"#;
        let segments = segment(doc).unwrap();
        assert_eq!(
            primary_definition(&segments, &segments.using_tasks[0]),
            Err(ParseError::MissingCode("L".to_string()))
        );
    }

    #[test]
    fn secondary_requires_assemblyfile() {
        let doc = r#"<!--x--><UsingTask TaskName="L"/><Target/>"#;
        let segments = segment(doc).unwrap();
        assert_eq!(
            secondary_definition(&segments.using_tasks[0]),
            Err(ParseError::MissingAttribute {
                element: "UsingTask",
                attribute: "assemblyfile"
            })
        );
    }

    #[test]
    fn duplicate_definitions_are_detected() {
        let mut builder = TaskTableBuilder::new();
        assert_eq!(builder.insert_definition(secondary("A", "a.dll")), Insertion::Inserted);
        assert_eq!(
            builder.insert_definition(secondary("A", "b.dll")),
            Insertion::DuplicateDetected
        );
        let table = builder.finalize();
        assert_eq!(table.len(), 1);
        assert_eq!(table["A"].assemblyfile, "b.dll");
    }

    #[test]
    fn correlates_every_task_sharing_a_file_name() {
        let mut builder = TaskTableBuilder::new();
        builder.insert_definition(secondary("A", "x.dll"));
        builder.insert_definition(secondary("B", "x.dll"));
        builder.insert_definition(secondary("C", "y.dll"));

        let matched = builder.correlate("x.dll", &summary("C:\\x.dll"));
        assert_eq!(
            matched,
            vec![
                ("A".to_string(), Insertion::Inserted),
                ("B".to_string(), Insertion::Inserted)
            ]
        );
        let again = builder.correlate("x.dll", &summary("D:\\x.dll"));
        assert_eq!(again[0].1, Insertion::DuplicateDetected);

        let table = builder.finalize();
        assert_eq!(table["A"].assembly.as_ref().unwrap().declared_path, "D:\\x.dll");
        assert_eq!(table["C"].assembly, None);
    }

    #[test]
    fn parameters_need_a_definition() {
        let mut builder = TaskTableBuilder::new();
        builder.insert_definition(secondary("A", "a.dll"));
        assert_eq!(
            builder.set_parameters("A", TaskParameterSet::default()),
            Some(Insertion::Inserted)
        );
        assert_eq!(builder.set_parameters("Z", TaskParameterSet::default()), None);
        assert!(builder.finalize()["A"].parameters.is_some());
    }
}
