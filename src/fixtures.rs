//! Hand-assembled class files for unit tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct MethodSpec<'a> {
    name: &'a str,
    lines: &'a [(u16, u16)],
}

impl<'a> MethodSpec<'a> {
    pub fn new(name: &'a str, lines: &'a [(u16, u16)]) -> Self {
        Self { name, lines }
    }
}

struct Pool {
    bytes: Vec<u8>,
    next: u16,
}

impl Pool {
    fn utf8(&mut self, s: &str) -> u16 {
        self.bytes.push(1);
        self.bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
        self.slot(1)
    }

    fn class(&mut self, name_index: u16) -> u16 {
        self.bytes.push(7);
        self.bytes.extend_from_slice(&name_index.to_be_bytes());
        self.slot(1)
    }

    fn long(&mut self, value: i64) -> u16 {
        self.bytes.push(5);
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self.slot(2)
    }

    fn slot(&mut self, width: u16) -> u16 {
        let index = self.next;
        self.next += width;
        index
    }
}

fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// A version 52 class with one field, a `SourceFile` attribute, a `Long`
/// constant and one `()V` method per [`MethodSpec`] whose code is a run of `nop`s
/// followed by `return`.
pub fn class_bytes(this_class: &str, methods: &[MethodSpec<'_>]) -> Vec<u8> {
    let mut pool = Pool {
        bytes: Vec::new(),
        next: 1,
    };
    let this_name = pool.utf8(this_class);
    let this_index = pool.class(this_name);
    let super_name = pool.utf8("java/lang/Object");
    let super_index = pool.class(super_name);
    let _ = pool.long(42);
    let code_name = pool.utf8("Code");
    let lnt_name = pool.utf8("LineNumberTable");
    let void_desc = pool.utf8("()V");
    let field_name = pool.utf8("value");
    let field_desc = pool.utf8("I");
    let source_attr = pool.utf8("SourceFile");
    let source_file = pool.utf8("Foo.java");
    let method_names: Vec<u16> = methods.iter().map(|m| pool.utf8(m.name)).collect();

    let mut out = Vec::new();
    u4(&mut out, 0xCAFE_BABE);
    u2(&mut out, 0);
    u2(&mut out, 52);
    u2(&mut out, pool.next);
    out.extend_from_slice(&pool.bytes);
    u2(&mut out, 0x0021);
    u2(&mut out, this_index);
    u2(&mut out, super_index);
    u2(&mut out, 0);

    u2(&mut out, 1);
    u2(&mut out, 0x0002);
    u2(&mut out, field_name);
    u2(&mut out, field_desc);
    u2(&mut out, 0);

    u2(&mut out, methods.len() as u16);
    for (spec, name_index) in methods.iter().zip(method_names) {
        let code_len = spec.lines.iter().map(|(pc, _)| *pc + 1).max().unwrap_or(0) as usize + 1;
        let mut code = vec![0x00u8; code_len - 1];
        code.push(0xB1);

        let mut lnt = Vec::new();
        u2(&mut lnt, spec.lines.len() as u16);
        for (pc, line) in spec.lines {
            u2(&mut lnt, *pc);
            u2(&mut lnt, *line);
        }

        let mut body = Vec::new();
        u2(&mut body, 1);
        u2(&mut body, 1);
        u4(&mut body, code.len() as u32);
        body.extend_from_slice(&code);
        u2(&mut body, 0);
        u2(&mut body, 1);
        u2(&mut body, lnt_name);
        u4(&mut body, lnt.len() as u32);
        body.extend_from_slice(&lnt);

        u2(&mut out, 0x0001);
        u2(&mut out, name_index);
        u2(&mut out, void_desc);
        u2(&mut out, 1);
        u2(&mut out, code_name);
        u4(&mut out, body.len() as u32);
        out.extend_from_slice(&body);
    }

    u2(&mut out, 1);
    u2(&mut out, source_attr);
    u4(&mut out, 2);
    u2(&mut out, source_file);
    out
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "class_linemap_test_{}_{}_{}_{}",
        std::process::id(),
        nanos,
        n,
        name
    ))
}

pub fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

pub fn read_jar_entry(path: &Path, name: &str) -> anyhow::Result<Vec<u8>> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
    let mut entry = archive.by_name(name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}
