use super::{Deserialize, Serialize};
use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

bitflags! {
    /// Access flags on classes
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1-200-E.1
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on methods
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6-200-A.1
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Access flags on fields
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5-200-A.1
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

/// How visible a member is, ordered from least to most visible
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

impl MethodAccessFlags {
    pub fn visibility(&self) -> Visibility {
        visibility(self.bits())
    }
}

impl FieldAccessFlags {
    pub fn visibility(&self) -> Visibility {
        visibility(self.bits())
    }
}

impl ClassAccessFlags {
    /// Classes are either public or package-private
    pub fn visibility(&self) -> Visibility {
        if self.contains(ClassAccessFlags::PUBLIC) {
            Visibility::Public
        } else {
            Visibility::Package
        }
    }
}

fn visibility(bits: u16) -> Visibility {
    if bits & 0x0002 != 0 {
        Visibility::Private
    } else if bits & 0x0004 != 0 {
        Visibility::Protected
    } else if bits & 0x0001 != 0 {
        Visibility::Public
    } else {
        Visibility::Package
    }
}

macro_rules! flags_binary_format {
    ($flags:ty) => {
        impl Serialize for $flags {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                self.bits().serialize(writer)
            }
        }

        impl Deserialize for $flags {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
                u16::deserialize(reader).map(<$flags>::from_bits_truncate)
            }
        }
    };
}

flags_binary_format!(ClassAccessFlags);
flags_binary_format!(MethodAccessFlags);
flags_binary_format!(FieldAccessFlags);

#[cfg(test)]
mod access_flags_tests {
    use super::*;

    #[test]
    fn member_visibility() {
        assert_eq!(
            (MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC).visibility(),
            Visibility::Private
        );
        assert_eq!(MethodAccessFlags::FINAL.visibility(), Visibility::Package);
        assert_eq!(
            FieldAccessFlags::PROTECTED.visibility(),
            Visibility::Protected
        );
        assert_eq!(ClassAccessFlags::SUPER.visibility(), Visibility::Package);
        assert!(Visibility::Private < Visibility::Public);
    }
}
