use super::{Deserialize, Error, Serialize};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{ErrorKind, Read};

/// Class file constant pool
///
/// Indices start at 1 and `long`/`double` constants take up two indices. Pushing a constant that
/// structurally matches an existing entry returns the existing index instead of growing the pool,
/// which is what makes merging constants from other classes cheap to repeat.
#[derive(Clone)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
    lookup: HashMap<Constant, u16>,
}

/// Constants as in the constant pool
///
/// Indices stored inside constants refer to the pool that contains the constant.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the null character
    /// `\u{0000}` and the encoding of supplementary characters is different).
    Utf8(String),

    Integer(i32),

    /// Raw IEEE 754 bits of a `float`
    Float(u32),

    Long(i64),

    /// Raw IEEE 754 bits of a `double`
    Double(u64),

    /// Class or an interface
    Class(u16),

    /// Constant object of type `java.lang.String`
    String(u16),

    FieldRef {
        class: u16,
        name_and_type: u16,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: u16,
        name_and_type: u16,
        is_interface: bool,
    },

    NameAndType {
        name: u16,
        descriptor: u16,
    },

    MethodHandle {
        kind: u8,
        member: u16,
    },

    MethodType(u16),

    /// Dynamically-computed constant
    ///
    /// The bootstrap method index points into the `BootstrapMethods` attribute of the class, so it
    /// is only meaningful inside the class owning the pool.
    Dynamic {
        bootstrap_method: u16,
        name_and_type: u16,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        bootstrap_method: u16,
        name_and_type: u16,
    },

    Module(u16),
    Package(u16),
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Kind of member reference
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// Resolved view of a `FieldRef` or `MethodRef` constant
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            lookup: HashMap::new(),
        }
    }

    /// Number of entries (not the same as the next free index)
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Value of `constant_pool_count` in the class file (one more than the last used index)
    pub fn count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, _, constant)| (offset.0 as u16, constant))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// If an equal constant is already in the pool, its index is returned.
    pub fn push(&mut self, constant: Constant) -> Result<u16, Error> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }
        let index = self.push_distinct(constant)?;
        Ok(index)
    }

    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_distinct(&mut self, constant: Constant) -> Result<u16, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow { constant, offset });
        }
        self.lookup.entry(constant.clone()).or_insert(offset as u16);
        self.constants.push(constant);
        Ok(offset as u16)
    }

    pub fn get(&self, index: u16) -> Result<&Constant, Error> {
        self.constants
            .get_offset(Offset(index as usize))
            .ok()
            .ok_or(Error::MissingConstant(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Binary name of a `Class` constant
    pub fn class_name(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Name and descriptor of a `NameAndType` constant
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Class, name, and descriptor of a field or method reference
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, Error> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => (MemberKind::Field, *class, *name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let kind = if *is_interface {
                    MemberKind::InterfaceMethod
                } else {
                    MemberKind::Method
                };
                (kind, *class, *name_and_type)
            }
            _ => {
                return Err(Error::UnexpectedConstant {
                    index,
                    expected: "FieldRef or MethodRef",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            class: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    /// Name and descriptor of an `InvokeDynamic` or `Dynamic` constant
    pub fn dynamic_name_and_type(&self, index: u16) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. }
            | Constant::Dynamic { name_and_type, .. } => self.name_and_type(*name_and_type),
            _ => Err(Error::UnexpectedConstant {
                index,
                expected: "InvokeDynamic or Dynamic",
            }),
        }
    }

    pub fn get_utf8(&mut self, string: &str) -> Result<u16, Error> {
        self.push(Constant::Utf8(string.to_owned()))
    }

    pub fn get_class(&mut self, class_name: &str) -> Result<u16, Error> {
        let name = self.get_utf8(class_name)?;
        self.push(Constant::Class(name))
    }

    pub fn get_string(&mut self, string: &str) -> Result<u16, Error> {
        let utf8 = self.get_utf8(string)?;
        self.push(Constant::String(utf8))
    }

    pub fn get_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, Error> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        self.push(Constant::NameAndType { name, descriptor })
    }

    pub fn get_field_ref(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, Error> {
        let class = self.get_class(class_name)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.push(Constant::FieldRef {
            class,
            name_and_type,
        })
    }

    pub fn get_method_ref(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16, Error> {
        let class = self.get_class(class_name)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.push(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }

    /// Copy the constant at `index` in `source` (along with everything it refers to) into this
    /// pool, returning its index here
    ///
    /// Dynamic constants name a bootstrap method of the class owning `source`, so they cannot be
    /// moved to another class and are refused.
    pub fn merge_from(&mut self, source: &ConstantPool, index: u16) -> Result<u16, Error> {
        let merged = match source.get(index)? {
            constant @ (Constant::Utf8(_)
            | Constant::Integer(_)
            | Constant::Float(_)
            | Constant::Long(_)
            | Constant::Double(_)) => constant.clone(),
            Constant::Class(name) => Constant::Class(self.merge_from(source, *name)?),
            Constant::String(utf8) => Constant::String(self.merge_from(source, *utf8)?),
            Constant::FieldRef {
                class,
                name_and_type,
            } => Constant::FieldRef {
                class: self.merge_from(source, *class)?,
                name_and_type: self.merge_from(source, *name_and_type)?,
            },
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => Constant::MethodRef {
                class: self.merge_from(source, *class)?,
                name_and_type: self.merge_from(source, *name_and_type)?,
                is_interface: *is_interface,
            },
            Constant::NameAndType { name, descriptor } => Constant::NameAndType {
                name: self.merge_from(source, *name)?,
                descriptor: self.merge_from(source, *descriptor)?,
            },
            Constant::MethodHandle { kind, member } => Constant::MethodHandle {
                kind: *kind,
                member: self.merge_from(source, *member)?,
            },
            Constant::MethodType(descriptor) => {
                Constant::MethodType(self.merge_from(source, *descriptor)?)
            }
            Constant::Dynamic { .. } | Constant::InvokeDynamic { .. } => {
                return Err(Error::BootstrapMethodConstant(index))
            }
            Constant::Module(name) => Constant::Module(self.merge_from(source, *name)?),
            Constant::Package(name) => Constant::Package(self.merge_from(source, *name)?),
        };
        self.push(merged)
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl std::fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.constants.fmt(f)
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.constants == other.constants
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)?;
        let mut pool = ConstantPool::new();
        while pool.count() < count {
            let constant = Constant::deserialize(reader)?;
            pool.push_distinct(constant).map_err(|err| {
                let msg = format!("Invalid constant pool: {:?}", err);
                std::io::Error::new(ErrorKind::InvalidData, msg)
            })?;
        }
        Ok(pool)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(bits) => {
                4u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(bits) => {
                6u8.serialize(writer)?;
                bits.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(utf8) => {
                8u8.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle { kind, member } => {
                15u8.serialize(writer)?;
                kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType(descriptor) => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let mut buffer = vec![0; len as usize];
                reader.read_exact(&mut buffer)?;
                let string = decode_modified_utf8(&buffer).ok_or_else(|| {
                    std::io::Error::new(ErrorKind::InvalidData, "Invalid modified UTF-8")
                })?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(u32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(u64::deserialize(reader)?),
            7 => Constant::Class(u16::deserialize(reader)?),
            8 => Constant::String(u16::deserialize(reader)?),
            9 => Constant::FieldRef {
                class: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            10 | 11 => Constant::MethodRef {
                class: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: u16::deserialize(reader)?,
                descriptor: u16::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                kind: u8::deserialize(reader)?,
                member: u16::deserialize(reader)?,
            },
            16 => Constant::MethodType(u16::deserialize(reader)?),
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: u16::deserialize(reader)?,
            },
            19 => Constant::Module(u16::deserialize(reader)?),
            20 => Constant::Package(u16::deserialize(reader)?),
            other => {
                let msg = format!("Unknown constant tag {}", other);
                return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. The null character is encoded on two bytes and
/// supplementary characters are encoded as surrogate pairs, each surrogate on three bytes.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for unit in string.encode_utf16() {
        match unit {
            0x0001..=0x007F => buffer.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                buffer.push((unit >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            }
            _ => {
                buffer.push((unit >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((unit >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`], returning `None` on malformed input
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    fn continuation(byte: Option<u8>) -> Option<u16> {
        match byte {
            Some(byte) if byte & 0b1100_0000 == 0b1000_0000 => Some((byte & 0x3F) as u16),
            _ => None,
        }
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut bytes = bytes.iter().copied();
    while let Some(first) = bytes.next() {
        let unit = if first & 0b1000_0000 == 0 {
            first as u16
        } else if first & 0b1110_0000 == 0b1100_0000 {
            ((first & 0x1F) as u16) << 6 | continuation(bytes.next())?
        } else if first & 0b1111_0000 == 0b1110_0000 {
            let second = continuation(bytes.next())?;
            let third = continuation(bytes.next())?;
            ((first & 0x0F) as u16) << 12 | second << 6 | third
        } else {
            return None;
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).as_deref(),
            Some("a\x00a")
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(encode_modified_utf8("ĄǍ"), vec![196, 132, 199, 141]);
        assert_eq!(encode_modified_utf8("ऄअ"), vec![224, 164, 132, 224, 164, 133]);
        assert_eq!(decode_modified_utf8(&[224, 164, 132]).as_deref(), Some("ऄ"));
    }

    #[test]
    fn supplementary_characters() {
        let encoded = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(
            decode_modified_utf8(&encoded).as_deref(),
            Some("\u{10000}\u{10FFFF}")
        );
    }

    #[test]
    fn malformed_input() {
        assert_eq!(decode_modified_utf8(&[0b1100_0000]), None);
        assert_eq!(decode_modified_utf8(&[0xFF]), None);
        assert_eq!(decode_modified_utf8(&[237, 160, 128]), None);
    }
}
