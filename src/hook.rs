//! Decompile result hook.
//!
//! The decompiler calls [`ResultSaver::save_class_entry`] once per finished
//! class. [`LineMappingSaver`] hands the text to a [`TextSink`] and, when the
//! decompiler produced a line mapping, patches the class's line-number tables
//! in the original archive so they point into the decompiled text.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::archive::ArchiveStore;
use crate::mapping::LineMapping;
use crate::remap::remap_class;
use crate::sink::TextSink;

/// One class worth of decompiler output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileUnit {
    /// Internal name, e.g. `com/example/Foo`.
    pub qualified_name: String,
    /// Source entry name, e.g. `com/example/Foo.java`.
    pub entry_name: String,
    pub content: String,
    /// Flat `[original, target, ...]` line pairs.
    #[serde(default)]
    pub mapping: Option<Vec<i32>>,
}

impl DecompileUnit {
    pub fn class_entry(&self) -> String {
        format!("{}.class", self.qualified_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOutcome {
    /// Remapped bytes were written back to the original archive.
    Persisted,
    /// No mapping (or an empty one) came with the class.
    Skipped,
    /// Patching failed and was logged; the batch carries on.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub text_saved: bool,
    pub lines: LineOutcome,
}

pub trait ResultSaver: Sync {
    fn save_class_entry(&self, unit: &DecompileUnit) -> SaveOutcome;
}

pub struct LineMappingSaver<'a, S: TextSink> {
    source: PathBuf,
    sink: &'a S,
    store: &'a ArchiveStore,
}

impl<'a, S: TextSink> LineMappingSaver<'a, S> {
    /// `source` is the archive the decompiler read classes from; patched
    /// classes are written back into it.
    pub fn new(source: &Path, sink: &'a S, store: &'a ArchiveStore) -> Self {
        Self {
            source: source.to_path_buf(),
            sink,
            store,
        }
    }

    fn patch_lines(&self, unit: &DecompileUnit, flat: &[i32]) -> Result<()> {
        let mapping = LineMapping::from_flat(flat).context("Invalid line mapping")?;
        let entry = unit.class_entry();

        let original = self.store.read(&self.source, &entry)?;
        let (patched, report) = remap_class(&original, &mapping)?;
        self.store.write(&self.source, &entry, &patched)?;

        log::debug!(
            "Remapped {} line entries in {} ({} exact, {} ceiling, {} unchanged)",
            report.entries(),
            entry,
            report.exact,
            report.ceiling,
            report.unchanged
        );
        Ok(())
    }
}

impl<S: TextSink> ResultSaver for LineMappingSaver<'_, S> {
    fn save_class_entry(&self, unit: &DecompileUnit) -> SaveOutcome {
        let text_saved = match self
            .sink
            .save(&unit.qualified_name, &unit.entry_name, &unit.content)
        {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "Failed to save decompiled source {}: {err:#}",
                    unit.entry_name
                );
                false
            }
        };

        let lines = match unit.mapping.as_deref() {
            None | Some([]) => LineOutcome::Skipped,
            Some(flat) => match self.patch_lines(unit, flat) {
                Ok(()) => LineOutcome::Persisted,
                Err(err) => {
                    log::warn!(
                        "Line mapping failed on {} in {}: {err:#}",
                        unit.class_entry(),
                        self.source.display()
                    );
                    LineOutcome::Failed
                }
            },
        };

        SaveOutcome { text_saved, lines }
    }
}
