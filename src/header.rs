//! The C header device programs are compiled against, and its inverse.
//!
//! `generate` renders the schema tables. `parse` reads a header back into a
//! [`DeviceLayoutManifest`] so a stale device build can be caught before any
//! memory is allocated.

use shared_structs::layout::{FieldLayout, RecordLayout, RECORDS};
use shared_structs::slots::{CONSTANTS, SLOT_ENUMS};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use thiserror::Error;

const GUARD: &str = "BINDLESS_SCENE_LAYOUT_H";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct HeaderParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldManifest {
    pub name: String,
    pub slot: Option<u32>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordManifest {
    pub size: Option<usize>,
    pub fields: Vec<FieldManifest>,
}

/// Every number a device program bakes in: enumerators, constants, record
/// sizes and field offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLayoutManifest {
    pub constants: BTreeMap<String, u32>,
    pub records: BTreeMap<String, RecordManifest>,
}

impl DeviceLayoutManifest {
    /// The layout this build of the host uses.
    pub fn current() -> Self {
        let mut manifest = Self::default();

        for registry in SLOT_ENUMS {
            for (entry, value) in registry.entries {
                manifest
                    .constants
                    .insert(format!("{}{}", registry.name, entry), *value);
            }
        }

        for (name, value) in CONSTANTS {
            manifest.constants.insert(name.to_string(), *value);
        }

        for record in RECORDS {
            manifest.records.insert(
                record.name.to_string(),
                RecordManifest {
                    size: Some(record.size),
                    fields: record
                        .fields
                        .iter()
                        .map(|field| FieldManifest {
                            name: field.name.to_string(),
                            slot: field.slot,
                            offset: field.offset,
                        })
                        .collect(),
                },
            );
        }

        manifest
    }

    /// Human-readable differences, empty when the layouts agree.
    pub fn diff(&self, expected: &Self) -> Vec<String> {
        let mut mismatches = Vec::new();

        for (name, value) in &self.constants {
            match expected.constants.get(name) {
                Some(other) if other == value => {}
                Some(other) => {
                    mismatches.push(format!("{} is {} on the host, {} on the device", name, value, other))
                }
                None => mismatches.push(format!("{} is missing on the device", name)),
            }
        }

        for name in expected.constants.keys() {
            if !self.constants.contains_key(name) {
                mismatches.push(format!("{} is unknown to the host", name));
            }
        }

        for (name, record) in &self.records {
            match expected.records.get(name) {
                Some(other) => diff_record(name, record, other, &mut mismatches),
                None => mismatches.push(format!("record {} is missing on the device", name)),
            }
        }

        for name in expected.records.keys() {
            if !self.records.contains_key(name) {
                mismatches.push(format!("record {} is unknown to the host", name));
            }
        }

        mismatches
    }
}

fn diff_record(
    name: &str,
    host: &RecordManifest,
    device: &RecordManifest,
    mismatches: &mut Vec<String>,
) {
    if host.size != device.size {
        mismatches.push(format!(
            "{} size is {:?} on the host, {:?} on the device",
            name, host.size, device.size
        ));
    }

    if host.fields.len() != device.fields.len() {
        mismatches.push(format!(
            "{} has {} fields on the host, {} on the device",
            name,
            host.fields.len(),
            device.fields.len()
        ));
    }

    for (host_field, device_field) in host.fields.iter().zip(&device.fields) {
        if host_field != device_field {
            mismatches.push(format!(
                "{}.{} is slot {:?} at offset {} on the host, {}: slot {:?} at offset {} on the device",
                name,
                host_field.name,
                host_field.slot,
                host_field.offset,
                device_field.name,
                device_field.slot,
                device_field.offset
            ));
        }
    }
}

fn write_declarator<W: Write>(out: &mut W, field: &FieldLayout) -> fmt::Result {
    write!(out, "{}", field.name)?;
    for dim in field.dims {
        write!(out, "[{}]", dim)?;
    }
    Ok(())
}

fn write_record<W: Write>(out: &mut W, record: &RecordLayout) -> fmt::Result {
    writeln!(out, "typedef struct {{")?;

    for field in record.fields {
        write!(out, "    {} ", field.ty.c_name())?;
        write_declarator(out, field)?;
        match field.slot {
            Some(slot) => writeln!(out, "; // slot {}, offset {}", slot, field.offset)?,
            None => writeln!(out, "; // offset {}", field.offset)?,
        }
    }

    writeln!(out, "}} {};", record.name)?;
    writeln!(
        out,
        "_Static_assert(sizeof({0}) == {1}, \"{0} size\");",
        record.name, record.size
    )?;

    for field in record.addressable_fields() {
        writeln!(
            out,
            "_Static_assert(offsetof({0}, {1}) == {2}, \"{0}.{1} offset\");",
            record.name, field.name, field.offset
        )?;
    }

    writeln!(out)
}

/// Writes the header for the current schema.
pub fn write_header<W: Write>(out: &mut W) -> fmt::Result {
    writeln!(out, "// Generated by bindless-scene. Do not edit.")?;
    writeln!(out, "#ifndef {}", GUARD)?;
    writeln!(out, "#define {}", GUARD)?;
    writeln!(out)?;
    writeln!(out, "#include <stddef.h>")?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;

    for (name, value) in CONSTANTS {
        writeln!(out, "#define {} {}", name, value)?;
    }
    writeln!(out)?;

    for registry in SLOT_ENUMS {
        writeln!(out, "typedef enum {{")?;
        for (entry, value) in registry.entries {
            writeln!(out, "    {}{} = {},", registry.name, entry, value)?;
        }
        writeln!(out, "}} {};", registry.name)?;
        writeln!(out)?;
    }

    for record in RECORDS {
        write_record(out, record)?;
    }

    writeln!(out, "#endif // {}", GUARD)
}

/// Renders the header for the current schema into a string.
pub fn generate() -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_header(&mut out)?;
    Ok(out)
}

enum Block {
    Top,
    Enum,
    Struct(Vec<FieldManifest>),
}

/// Reads back a header in the form `generate` writes. Lines it does not
/// recognise are skipped.
pub fn parse(text: &str) -> Result<DeviceLayoutManifest, HeaderParseError> {
    let mut manifest = DeviceLayoutManifest::default();
    let mut block = Block::Top;

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let error = |message: String| HeaderParseError {
            line: line_number,
            message,
        };
        let line = raw.trim();

        block = match block {
            Block::Top => {
                if line.starts_with("typedef enum") {
                    Block::Enum
                } else if line.starts_with("typedef struct") {
                    Block::Struct(Vec::new())
                } else if let Some(rest) = line.strip_prefix("#define ") {
                    let mut parts = rest.split_whitespace();
                    if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                        let value = parse_number(value).map_err(error)?;
                        manifest.constants.insert(name.to_string(), value);
                    }
                    Block::Top
                } else if let Some(rest) = line.strip_prefix("_Static_assert(sizeof(") {
                    let (name, size) = parse_size_assert(rest).map_err(error)?;
                    let record = manifest.records.get_mut(name).ok_or_else(|| {
                        error(format!("size assertion for undeclared record {}", name))
                    })?;
                    record.size = Some(size as usize);
                    Block::Top
                } else {
                    Block::Top
                }
            }
            Block::Enum => {
                if line.starts_with('}') {
                    Block::Top
                } else if line.is_empty() || line.starts_with("//") {
                    Block::Enum
                } else {
                    let (name, value) = line
                        .trim_end_matches(',')
                        .split_once('=')
                        .ok_or_else(|| error(format!("expected `Name = value`, found {:?}", line)))?;
                    let value = parse_number(value.trim()).map_err(error)?;
                    manifest.constants.insert(name.trim().to_string(), value);
                    Block::Enum
                }
            }
            Block::Struct(mut fields) => {
                if let Some(rest) = line.strip_prefix('}') {
                    let name = rest.trim().trim_end_matches(';').trim();
                    if name.is_empty() {
                        return Err(error("struct without a typedef name".to_string()));
                    }
                    manifest.records.insert(
                        name.to_string(),
                        RecordManifest { size: None, fields },
                    );
                    Block::Top
                } else if line.is_empty() {
                    Block::Struct(fields)
                } else {
                    fields.push(parse_field(line).map_err(error)?);
                    Block::Struct(fields)
                }
            }
        };
    }

    match block {
        Block::Top => Ok(manifest),
        _ => Err(HeaderParseError {
            line: text.lines().count(),
            message: "unterminated typedef".to_string(),
        }),
    }
}

fn parse_number(text: &str) -> Result<u32, String> {
    text.parse()
        .map_err(|_| format!("expected a number, found {:?}", text))
}

// `Name) == 56, "Name size");`
fn parse_size_assert(rest: &str) -> Result<(&str, u32), String> {
    let malformed = || format!("malformed size assertion {:?}", rest);

    let (name, rest) = rest.split_once(')').ok_or_else(malformed)?;
    let rest = rest.trim_start().strip_prefix("==").ok_or_else(malformed)?;
    let (size, _) = rest.split_once(',').ok_or_else(malformed)?;
    Ok((name.trim(), parse_number(size.trim())?))
}

// `uint64_t materials[5]; // slot 3, offset 16`
fn parse_field(line: &str) -> Result<FieldManifest, String> {
    let (declaration, comment) = line
        .split_once("//")
        .ok_or_else(|| format!("field without a slot/offset comment: {:?}", line))?;

    let declarator = declaration
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .last()
        .ok_or_else(|| format!("empty field declaration: {:?}", line))?;
    let name = declarator.split('[').next().unwrap_or(declarator);

    let mut slot = None;
    let mut offset = None;

    for part in comment.split(',') {
        let mut words = part.split_whitespace();
        match (words.next(), words.next()) {
            (Some("slot"), Some(value)) => slot = Some(parse_number(value)?),
            (Some("offset"), Some(value)) => offset = Some(parse_number(value)? as usize),
            _ => return Err(format!("unexpected field annotation {:?}", part.trim())),
        }
    }

    Ok(FieldManifest {
        name: name.to_string(),
        slot,
        offset: offset.ok_or_else(|| format!("field {} has no offset", name))?,
    })
}
