//! Byte-level class file structure reader/writer.
//!
//! Only what line remapping needs is decoded: the constant pool (to resolve
//! attribute and method names), the method table and each `Code` attribute's
//! `LineNumberTable` entries. Everything else is walked for bounds and left
//! untouched, so [`ClassFile::to_bytes`] reproduces the input exactly except
//! for line numbers that were changed through [`ClassFile::lines_mut`].

use serde::Serialize;
use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("not a class file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("class file truncated at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },
    #[error("invalid constant pool tag {tag} at index {index}")]
    BadConstantTag { tag: u8, index: u16 },
    #[error("constant pool index {0} does not refer to a Utf8 entry")]
    NotUtf8(u16),
    #[error("{name} attribute declares {declared} bytes but contains {actual}")]
    AttributeLength {
        name: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("{0} trailing bytes after class structure")]
    TrailingBytes(usize),
}

/// One `LineNumberTable` entry. `offset` is the byte position of the line
/// field inside the class buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineEntry {
    pub start_pc: u16,
    pub line: u16,
    #[serde(skip)]
    offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodLines {
    pub name: String,
    pub descriptor: String,
    /// Entries of every `LineNumberTable` in the method's `Code`, in emission order.
    pub entries: Vec<LineEntry>,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    bytes: Vec<u8>,
    methods: Vec<MethodLines>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let mut r = Reader::new(bytes);

        let magic = r.u4()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        r.skip(4)?; // minor + major version

        let pool = ConstantPool::read(&mut r)?;

        r.skip(6)?; // access_flags, this_class, super_class
        let interfaces = r.u2()? as usize;
        r.skip(interfaces * 2)?;

        let fields = r.u2()?;
        for _ in 0..fields {
            r.skip(6)?;
            skip_attributes(&mut r)?;
        }

        let method_count = r.u2()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            r.skip(2)?;
            let name = pool.utf8_lossy(r.u2()?)?;
            let descriptor = pool.utf8_lossy(r.u2()?)?;
            let mut entries = Vec::new();

            let attributes = r.u2()?;
            for _ in 0..attributes {
                let attr_name = pool.utf8(r.u2()?)?;
                let len = r.u4()? as usize;
                if attr_name == b"Code" {
                    read_code(&mut r, &pool, len, &mut entries)?;
                } else {
                    r.skip(len)?;
                }
            }

            methods.push(MethodLines {
                name,
                descriptor,
                entries,
            });
        }

        skip_attributes(&mut r)?;

        let rest = r.remaining();
        if rest != 0 {
            return Err(ClassFormatError::TrailingBytes(rest));
        }

        Ok(Self {
            bytes: bytes.to_vec(),
            methods,
        })
    }

    pub fn methods(&self) -> &[MethodLines] {
        &self.methods
    }

    /// Line fields may be edited freely; start offsets and table shapes are
    /// fixed by the parsed layout.
    pub fn lines_mut(&mut self) -> impl Iterator<Item = &mut LineEntry> {
        self.methods.iter_mut().flat_map(|m| m.entries.iter_mut())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.bytes.clone();
        for entry in self.methods.iter().flat_map(|m| m.entries.iter()) {
            out[entry.offset..entry.offset + 2].copy_from_slice(&entry.line.to_be_bytes());
        }
        out
    }
}

fn read_code(
    r: &mut Reader<'_>,
    pool: &ConstantPool<'_>,
    declared: usize,
    entries: &mut Vec<LineEntry>,
) -> Result<(), ClassFormatError> {
    let start = r.pos;
    r.skip(4)?; // max_stack, max_locals
    let code_len = r.u4()? as usize;
    r.skip(code_len)?;
    let exceptions = r.u2()? as usize;
    r.skip(exceptions * 8)?;

    let attributes = r.u2()?;
    for _ in 0..attributes {
        let name = pool.utf8(r.u2()?)?;
        let len = r.u4()? as usize;
        if name != b"LineNumberTable" {
            r.skip(len)?;
            continue;
        }

        let count = r.u2()? as usize;
        let actual = 2 + count * 4;
        if actual != len {
            return Err(ClassFormatError::AttributeLength {
                name: "LineNumberTable",
                declared: len,
                actual,
            });
        }
        for _ in 0..count {
            let start_pc = r.u2()?;
            let offset = r.pos;
            let line = r.u2()?;
            entries.push(LineEntry {
                start_pc,
                line,
                offset,
            });
        }
    }

    let actual = r.pos - start;
    if actual != declared {
        return Err(ClassFormatError::AttributeLength {
            name: "Code",
            declared,
            actual,
        });
    }
    Ok(())
}

fn skip_attributes(r: &mut Reader<'_>) -> Result<(), ClassFormatError> {
    let count = r.u2()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u4()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

/// Utf8 slots of the constant pool; every other slot is `None`.
struct ConstantPool<'a> {
    utf8: Vec<Option<&'a [u8]>>,
}

impl<'a> ConstantPool<'a> {
    fn read(r: &mut Reader<'a>) -> Result<Self, ClassFormatError> {
        let count = r.u2()?;
        let mut utf8 = vec![None; count as usize];

        let mut index = 1usize;
        while index < count as usize {
            let tag = r.u1()?;
            match tag {
                1 => {
                    let len = r.u2()? as usize;
                    utf8[index] = Some(r.take(len)?);
                }
                7 | 8 | 16 | 19 | 20 => r.skip(2)?,
                15 => r.skip(3)?,
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => r.skip(4)?,
                5 | 6 => {
                    r.skip(8)?;
                    // Long and Double take two slots.
                    index += 1;
                }
                _ => {
                    return Err(ClassFormatError::BadConstantTag {
                        tag,
                        index: index as u16,
                    });
                }
            }
            index += 1;
        }

        Ok(Self { utf8 })
    }

    fn utf8(&self, index: u16) -> Result<&'a [u8], ClassFormatError> {
        self.utf8
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or(ClassFormatError::NotUtf8(index))
    }

    fn utf8_lossy(&self, index: u16) -> Result<String, ClassFormatError> {
        Ok(String::from_utf8_lossy(self.utf8(index)?).into_owned())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        if self.remaining() < n {
            return Err(ClassFormatError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ClassFormatError> {
        self.take(n).map(|_| ())
    }

    fn u1(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
