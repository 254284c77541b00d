//! Destinations for decompiled source text.

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub trait TextSink: Sync {
    /// Stores `content` under the source entry name (`com/example/Foo.java`).
    fn save(&self, qualified_name: &str, entry_name: &str, content: &str) -> Result<()>;

    /// Flushes everything written so far. Further saves fail.
    fn close(&self) -> Result<()>;
}

/// Collects every class's source into one output zip.
pub struct ZipTextSink {
    path: PathBuf,
    inner: Mutex<ZipSinkState>,
}

struct ZipSinkState {
    writer: Option<ZipWriter<BufWriter<File>>>,
    written: HashSet<String>,
}

impl ZipTextSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output zip: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(ZipSinkState {
                writer: Some(ZipWriter::new(BufWriter::new(file))),
                written: HashSet::new(),
            }),
        })
    }
}

impl TextSink for ZipTextSink {
    fn save(&self, qualified_name: &str, entry_name: &str, content: &str) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let ZipSinkState { writer, written } = &mut *state;
        let Some(writer) = writer.as_mut() else {
            bail!("Output zip already closed: {}", self.path.display());
        };

        if written.contains(entry_name) {
            log::warn!("Zip entry {entry_name} already exists, skipping source of {qualified_name}");
            return Ok(());
        }

        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(entry_name, options)
            .with_context(|| format!("Failed to add {entry_name} to {}", self.path.display()))?;
        writer
            .write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {entry_name} to {}", self.path.display()))?;
        written.insert(entry_name.to_string());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut writer) = state.writer.take() else {
            return Ok(());
        };
        let mut buffered = writer
            .finish()
            .with_context(|| format!("Failed to finish output zip: {}", self.path.display()))?;
        buffered
            .flush()
            .with_context(|| format!("Failed to flush output zip: {}", self.path.display()))?;
        Ok(())
    }
}

/// Writes each source as a file under a root directory.
pub struct DirTextSink {
    root: PathBuf,
}

impl DirTextSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl TextSink for DirTextSink {
    fn save(&self, _qualified_name: &str, entry_name: &str, content: &str) -> Result<()> {
        let relative = Path::new(entry_name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Refusing to write source outside {}: {entry_name}", self.root.display());
        }
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write source file: {}", target.display()))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{read_jar_entry, temp_path};

    #[test]
    fn zip_sink_writes_each_entry_once() -> Result<()> {
        let base = temp_path("zip_sink");
        let out = base.join("out/sources.zip");
        let sink = ZipTextSink::create(&out)?;

        sink.save("a/A", "a/A.java", "class A {}")?;
        sink.save("a/B", "a/B.java", "class B {}")?;
        sink.save("a/A", "a/A.java", "class A { int x; }")?;
        sink.close()?;

        assert_eq!(read_jar_entry(&out, "a/A.java")?, b"class A {}");
        assert_eq!(read_jar_entry(&out, "a/B.java")?, b"class B {}");
        assert!(sink.save("a/C", "a/C.java", "class C {}").is_err());
        assert!(sink.close().is_ok());

        let _ = std::fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn dir_sink_creates_package_directories() -> Result<()> {
        let base = temp_path("dir_sink");
        let sink = DirTextSink::new(base.clone());
        sink.save("org/example/Demo", "org/example/Demo.java", "class Demo {}")?;
        sink.close()?;

        assert_eq!(
            std::fs::read_to_string(base.join("org/example/Demo.java"))?,
            "class Demo {}"
        );
        let _ = std::fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn dir_sink_rejects_entries_escaping_the_root() -> Result<()> {
        let base = temp_path("dir_sink_escape");
        let root = base.join("root");
        let sink = DirTextSink::new(root.clone());

        assert!(sink.save("x/Evil", "../Evil.java", "class Evil {}").is_err());
        assert!(sink.save("x/Evil", "a/../../Evil.java", "class Evil {}").is_err());
        assert!(!base.join("Evil.java").exists());

        sink.save("a/Fine", "/a/./Fine.java", "class Fine {}")?;
        assert_eq!(std::fs::read_to_string(root.join("a/Fine.java"))?, "class Fine {}");
        let _ = std::fs::remove_dir_all(base);
        Ok(())
    }

    /// Writes to `/dev/full` always fail with ENOSPC.
    #[cfg(target_os = "linux")]
    #[test]
    fn failed_zip_save_is_not_recorded_as_written() -> Result<()> {
        let full = Path::new("/dev/full");
        if File::options().write(true).open(full).is_err() {
            return Ok(());
        }
        let sink = ZipTextSink::create(full)?;

        // Large enough to get past the write buffer, and incompressible.
        let mut seed = 0x2545_f491_4f6c_dd1d_u64;
        let content: String = (0..1024 * 1024)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                char::from(b'!' + (seed % 94) as u8)
            })
            .collect();

        assert!(sink.save("a/Big", "a/Big.java", &content).is_err());
        // A retry hits the same failure instead of being skipped as a duplicate.
        assert!(sink.save("a/Big", "a/Big.java", &content).is_err());
        let _ = sink.close();
        Ok(())
    }
}
