//! # class-linemap
//!
//! Rewrites the line-number tables of compiled Java classes so that, once a
//! decompiler has regenerated their sources, stack traces and debuggers
//! resolve against the decompiled text.
//!
//! ## Architecture
//!
//! - **archive**: Shared, lazily opened read/write handles on jar entries
//! - **classfile**: Class file structure reader/writer for line-number tables
//! - **mapping**: Original-line to decompiled-line lookup table
//! - **remap**: Line remap engine applied to raw class bytes
//! - **hook**: Per-class decompiler callback that saves text and patches lines
//! - **sink**: Destinations for decompiled source text
//! - **batch**: Parallel driver over a batch of decompile units
//! - **manifest**: JSON Lines reader for decompiler output
//! - **config**: Effective settings from flags, environment and defaults

pub mod archive;
pub mod batch;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod hook;
pub mod manifest;
pub mod mapping;
pub mod remap;
pub mod sink;

#[cfg(test)]
mod fixtures;
