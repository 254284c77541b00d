use std::collections::BTreeMap;
use std::ops::Bound;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("line mapping has odd length {0}; expected (original, target) pairs")]
    OddLength(usize),
    #[error("line mapping value {value} at position {position} is not a valid line number")]
    LineOutOfRange { position: usize, value: i32 },
}

/// How a source line was resolved against a [`LineMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact(u16),
    /// Target of the smallest original line strictly greater than the query.
    Ceiling(u16),
    Unchanged(u16),
}

impl Resolution {
    pub fn line(self) -> u16 {
        match self {
            Resolution::Exact(l) | Resolution::Ceiling(l) | Resolution::Unchanged(l) => l,
        }
    }
}

/// Original line -> decompiled line table, sorted and deduplicated by
/// original line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMapping {
    table: BTreeMap<u16, u16>,
}

impl LineMapping {
    /// Builds the table from the decompiler's flat `[o0, t0, o1, t1, ...]`
    /// encoding. Repeated original lines keep the last target.
    pub fn from_flat(flat: &[i32]) -> Result<Self, MappingError> {
        if flat.len() % 2 != 0 {
            return Err(MappingError::OddLength(flat.len()));
        }

        let mut table = BTreeMap::new();
        for (pair, chunk) in flat.chunks_exact(2).enumerate() {
            let original = to_line(chunk[0], pair * 2)?;
            let target = to_line(chunk[1], pair * 2 + 1)?;
            table.insert(original, target);
        }
        Ok(Self { table })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Self {
            table: pairs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn resolve(&self, line: u16) -> Resolution {
        if let Some(&target) = self.table.get(&line) {
            return Resolution::Exact(target);
        }
        match self
            .table
            .range((Bound::Excluded(line), Bound::Unbounded))
            .next()
        {
            Some((_, &target)) => Resolution::Ceiling(target),
            None => Resolution::Unchanged(line),
        }
    }

    pub fn map_line(&self, line: u16) -> u16 {
        self.resolve(line).line()
    }
}

fn to_line(value: i32, position: usize) -> Result<u16, MappingError> {
    u16::try_from(value).map_err(|_| MappingError::LineOutOfRange { position, value })
}
