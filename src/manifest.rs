use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;

use crate::hook::DecompileUnit;

/// Reads decompiler output in JSON Lines form, one [`DecompileUnit`] per line.
pub fn read_units(path: &Path) -> Result<Vec<DecompileUnit>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open unit manifest: {}", path.display()))?;
    parse_units(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to read unit manifest: {}", path.display()))
}

pub fn parse_units(reader: impl BufRead) -> Result<Vec<DecompileUnit>> {
    let mut units = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let unit: DecompileUnit = serde_json::from_str(&line)
            .with_context(|| format!("Malformed decompile unit on line {}", idx + 1))?;
        units.push(unit);
    }
    Ok(units)
}
