use crate::jvm::{ConstantPool, Deserialize, Error, Serialize};
use byteorder::ReadBytesExt;
use std::io::Read;

/// Method body, as in the `Code` attribute
///
/// Offsets are kept as `u32` even though the class file format caps code at 65535 bytes, so that
/// intermediate results can be checked for overflow instead of silently wrapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionRange>,

    /// Entries of the `LineNumberTable` sub-attributes, in table order
    pub line_numbers: Vec<LineNumberEntry>,

    /// Other sub-attributes (eg. `StackMapTable`, `LocalVariableTable`), left undecoded
    pub attributes: Vec<RawAttribute>,
}

/// Entry in the exception table
///
/// The range covers `start_pc` inclusive to `end_pc` exclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExceptionRange {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,

    /// Index of a `Class` constant, or 0 to catch everything
    pub catch_type: u16,
}

impl ExceptionRange {
    pub fn is_catch_all(&self) -> bool {
        self.catch_type == 0
    }

    pub fn covers(&self, offset: u32) -> bool {
        self.start_pc <= offset && offset < self.end_pc
    }
}

/// Line number associated with code starting at some offset
///
/// After inlining, the table also contains sentinel entries bracketing each inlined body. The
/// `source` names where the line number comes from when it is not the method's own source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u32,
    pub line: LineNumber,
    pub source: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LineNumber {
    Line(u32),

    /// Start of an inlined body, whose source reads `class.method(descriptor):low:high`
    Enter,

    /// End of an inlined body
    Exit,
}

impl LineNumberEntry {
    pub fn line(start_pc: u32, line: u32) -> LineNumberEntry {
        LineNumberEntry {
            start_pc,
            line: LineNumber::Line(line),
            source: None,
        }
    }

    /// Ordinary line number, if this isn't a sentinel
    pub fn line_number(&self) -> Option<u32> {
        match self.line {
            LineNumber::Line(line) => Some(line),
            LineNumber::Enter | LineNumber::Exit => None,
        }
    }
}

/// Attribute which is carried along without being interpreted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub info: Vec<u8>,
}

impl CodeAttribute {
    pub const NAME: &'static str = "Code";
    pub const LINE_NUMBER_TABLE: &'static str = "LineNumberTable";

    /// Sub-attributes describing offsets or frames, which no longer match once the code is
    /// rewritten
    pub const OFFSET_DEPENDENT_ATTRIBUTES: [&'static str; 3] = [
        "StackMapTable",
        "LocalVariableTable",
        "LocalVariableTypeTable",
    ];

    pub fn code_length(&self) -> u32 {
        self.code.len() as u32
    }

    /// Range of ordinary line numbers which belong to the method itself (ie. untagged), if any
    pub fn own_line_range(&self) -> Option<(u32, u32)> {
        self.line_numbers
            .iter()
            .filter(|entry| entry.source.is_none())
            .filter_map(LineNumberEntry::line_number)
            .fold(None, |range, line| match range {
                None => Some((line, line)),
                Some((low, high)) => Some((low.min(line), high.max(line))),
            })
    }

    /// Encode the body of the `Code` attribute (everything after the attribute name and length)
    ///
    /// Sentinel line numbers are written as line 0.
    pub fn serialize_info(&self, constants: &mut ConstantPool) -> Result<Vec<u8>, Error> {
        let mut info = vec![];
        self.max_stack.serialize(&mut info)?;
        self.max_locals.serialize(&mut info)?;
        (self.code.len() as u32).serialize(&mut info)?;
        info.extend_from_slice(&self.code);

        let narrow = |offset: u32| -> Result<u16, Error> {
            u16::try_from(offset).map_err(|_| Error::MethodCodeOverflow(offset as usize))
        };

        (self.exception_table.len() as u16).serialize(&mut info)?;
        for range in &self.exception_table {
            narrow(range.start_pc)?.serialize(&mut info)?;
            narrow(range.end_pc)?.serialize(&mut info)?;
            narrow(range.handler_pc)?.serialize(&mut info)?;
            range.catch_type.serialize(&mut info)?;
        }

        let mut attributes: Vec<(u16, Vec<u8>)> = vec![];
        if !self.line_numbers.is_empty() {
            let mut table = vec![];
            (self.line_numbers.len() as u16).serialize(&mut table)?;
            for entry in &self.line_numbers {
                narrow(entry.start_pc)?.serialize(&mut table)?;
                let line = entry.line_number().unwrap_or(0);
                u16::try_from(line)
                    .map_err(|_| Error::LineNumberOverflow(line))?
                    .serialize(&mut table)?;
            }
            attributes.push((constants.get_utf8(Self::LINE_NUMBER_TABLE)?, table));
        }
        for attribute in &self.attributes {
            let name_index = constants.get_utf8(&attribute.name)?;
            attributes.push((name_index, attribute.info.clone()));
        }

        (attributes.len() as u16).serialize(&mut info)?;
        for (name_index, body) in attributes {
            name_index.serialize(&mut info)?;
            (body.len() as u32).serialize(&mut info)?;
            info.extend_from_slice(&body);
        }
        Ok(info)
    }

    /// Decode the body of a `Code` attribute
    pub fn deserialize_info(info: &[u8], constants: &ConstantPool) -> Result<CodeAttribute, Error> {
        let mut reader: &[u8] = info;
        let max_stack = u16::deserialize(&mut reader)?;
        let max_locals = u16::deserialize(&mut reader)?;
        let code_length = u32::deserialize(&mut reader)?;
        let code = read_bytes(&mut reader, code_length)?;

        let mut exception_table = vec![];
        for _ in 0..u16::deserialize(&mut reader)? {
            exception_table.push(ExceptionRange {
                start_pc: u16::deserialize(&mut reader)? as u32,
                end_pc: u16::deserialize(&mut reader)? as u32,
                handler_pc: u16::deserialize(&mut reader)? as u32,
                catch_type: u16::deserialize(&mut reader)?,
            });
        }

        let mut line_numbers = vec![];
        let mut attributes = vec![];
        for _ in 0..u16::deserialize(&mut reader)? {
            let name = constants.utf8(u16::deserialize(&mut reader)?)?.to_owned();
            let body_length = u32::deserialize(&mut reader)?;
            let body = read_bytes(&mut reader, body_length)?;
            if name == Self::LINE_NUMBER_TABLE {
                let mut table: &[u8] = &body;
                for _ in 0..u16::deserialize(&mut table)? {
                    let start_pc = u16::deserialize(&mut table)? as u32;
                    let line = u16::deserialize(&mut table)? as u32;
                    line_numbers.push(LineNumberEntry::line(start_pc, line));
                }
            } else {
                attributes.push(RawAttribute { name, info: body });
            }
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            line_numbers,
            attributes,
        })
    }
}

fn read_bytes<R: ReadBytesExt>(reader: &mut R, len: u32) -> Result<Vec<u8>, Error> {
    let mut buffer = vec![];
    reader.by_ref().take(len as u64).read_to_end(&mut buffer)?;
    if buffer.len() != len as usize {
        let msg = "Attribute ends early";
        return Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            msg,
        )));
    }
    Ok(buffer)
}
