//! Line remap engine.
//!
//! Rewrites every `LineNumberTable` entry of a class so that original source
//! lines point at lines of the decompiled text. A line with an exact mapping
//! takes its target; otherwise the target of the nearest following mapped
//! line is used; a line past the last mapped line is left alone. Nothing but
//! the line fields changes, and the transform is pure.

use serde::Serialize;
use thiserror::Error;

use crate::classfile::{ClassFile, ClassFormatError};
use crate::mapping::{LineMapping, MappingError, Resolution};

#[derive(Debug, Error)]
pub enum RemapError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Class(#[from] ClassFormatError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    pub methods: usize,
    pub exact: usize,
    pub ceiling: usize,
    pub unchanged: usize,
}

impl RemapReport {
    pub fn entries(&self) -> usize {
        self.exact + self.ceiling + self.unchanged
    }
}

pub fn remap_class(
    bytes: &[u8],
    mapping: &LineMapping,
) -> Result<(Vec<u8>, RemapReport), ClassFormatError> {
    let mut class = ClassFile::parse(bytes)?;
    let mut report = RemapReport {
        methods: class.methods().len(),
        ..RemapReport::default()
    };

    for entry in class.lines_mut() {
        let resolved = mapping.resolve(entry.line);
        match resolved {
            Resolution::Exact(_) => report.exact += 1,
            Resolution::Ceiling(_) => report.ceiling += 1,
            Resolution::Unchanged(_) => report.unchanged += 1,
        }
        entry.line = resolved.line();
    }

    Ok((class.to_bytes(), report))
}

/// Remaps with the decompiler's flat `[original, target, ...]` encoding.
pub fn remap_lines(bytes: &[u8], flat: &[i32]) -> Result<Vec<u8>, RemapError> {
    let mapping = LineMapping::from_flat(flat)?;
    let (out, _) = remap_class(bytes, &mapping)?;
    Ok(out)
}
