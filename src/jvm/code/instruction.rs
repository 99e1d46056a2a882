use super::opcodes::*;
use crate::jvm::{ConstantPool, Error, FieldType, MethodDescriptor, ParseDescriptor, Serialize};
use crate::util::Width;
use byteorder::WriteBytesExt;

/// Decoded JVM instruction
///
/// Opcodes are stored in their canonical form: `iload_2` decodes as `iload` with index 2, `wide`
/// prefixes are folded into the variable index, `ldc_w` becomes `ldc`, and `goto_w`/`jsr_w`
/// become `goto`/`jsr`. Encoding picks the most compact form that fits the operands at the time
/// of writing, so the same instruction may have different lengths at different offsets or with
/// different jump distances.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Instruction without a constant pool or local variable operand
    ///
    /// The constant holds the immediate of `bipush`, `sipush`, and `newarray` (zero otherwise).
    Simple { opcode: u8, constant: i32 },

    /// Access to a local variable: loads, stores, `iinc`, and `ret`
    ///
    /// The constant is the increment of `iinc` (zero otherwise).
    Variable { opcode: u8, index: u16, constant: i32 },

    /// Instruction referencing the constant pool
    ///
    /// The extra operand is the argument count of `invokeinterface` and the number of dimensions
    /// of `multianewarray` (zero otherwise).
    Constant { opcode: u8, index: u16, operand: u8 },

    /// Jump, with an offset relative to the start of the instruction
    Branch { opcode: u8, offset: i32 },

    /// `tableswitch` or `lookupswitch`, with offsets relative to the start of the instruction
    ///
    /// Cases are `(key, offset)` pairs. For `tableswitch` the keys must be consecutive.
    Switch {
        opcode: u8,
        default: i32,
        cases: Vec<(i32, i32)>,
    },
}

impl Instruction {
    pub const fn simple(opcode: u8) -> Instruction {
        Instruction::Simple {
            opcode,
            constant: 0,
        }
    }

    /// Load or store of a local variable (`opcode` is the canonical `iload`, `astore`, etc.)
    pub const fn variable(opcode: u8, index: u16) -> Instruction {
        Instruction::Variable {
            opcode,
            index,
            constant: 0,
        }
    }

    pub const fn constant(opcode: u8, index: u16) -> Instruction {
        Instruction::Constant {
            opcode,
            index,
            operand: 0,
        }
    }

    pub const fn branch(opcode: u8, offset: i32) -> Instruction {
        Instruction::Branch { opcode, offset }
    }

    /// Decode the instruction starting at `offset` in the code array, also returning how many
    /// bytes it used
    pub fn decode(code: &[u8], offset: u32) -> Result<(Instruction, u32), Error> {
        let mut cursor = Cursor {
            code,
            start: offset,
            position: offset as usize,
        };
        let opcode = cursor.u8()?;
        let instruction = match opcode {
            BIPUSH => Instruction::Simple {
                opcode,
                constant: cursor.u8()? as i8 as i32,
            },
            SIPUSH => Instruction::Simple {
                opcode,
                constant: cursor.u16()? as i16 as i32,
            },
            NEWARRAY => Instruction::Simple {
                opcode,
                constant: cursor.u8()? as i32,
            },

            LDC => Instruction::constant(LDC, cursor.u8()? as u16),
            LDC_W => Instruction::constant(LDC, cursor.u16()?),
            LDC2_W => Instruction::constant(LDC2_W, cursor.u16()?),
            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD | INVOKEVIRTUAL | INVOKESPECIAL
            | INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Instruction::constant(opcode, cursor.u16()?)
            }
            INVOKEINTERFACE => {
                let index = cursor.u16()?;
                let operand = cursor.u8()?;
                cursor.u8()?;
                Instruction::Constant {
                    opcode,
                    index,
                    operand,
                }
            }
            INVOKEDYNAMIC => {
                let index = cursor.u16()?;
                cursor.u16()?;
                Instruction::constant(opcode, index)
            }
            MULTIANEWARRAY => Instruction::Constant {
                opcode,
                index: cursor.u16()?,
                operand: cursor.u8()?,
            },

            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                Instruction::variable(opcode, cursor.u8()? as u16)
            }
            0x1a..=0x2d => {
                let n = opcode - ILOAD_0;
                Instruction::variable(ILOAD + n / 4, (n % 4) as u16)
            }
            0x3b..=0x4e => {
                let n = opcode - ISTORE_0;
                Instruction::variable(ISTORE + n / 4, (n % 4) as u16)
            }
            IINC => Instruction::Variable {
                opcode,
                index: cursor.u8()? as u16,
                constant: cursor.u8()? as i8 as i32,
            },
            WIDE => match cursor.u8()? {
                widened @ (ILOAD..=ALOAD | ISTORE..=ASTORE | RET) => {
                    Instruction::variable(widened, cursor.u16()?)
                }
                IINC => Instruction::Variable {
                    opcode: IINC,
                    index: cursor.u16()?,
                    constant: cursor.u16()? as i16 as i32,
                },
                widened => {
                    return Err(Error::InvalidWideOpcode {
                        opcode: widened,
                        offset,
                    })
                }
            },

            IFEQ..=JSR | IFNULL | IFNONNULL => {
                Instruction::branch(opcode, cursor.u16()? as i16 as i32)
            }
            GOTO_W => Instruction::branch(GOTO, cursor.i32()?),
            JSR_W => Instruction::branch(JSR, cursor.i32()?),

            TABLESWITCH => {
                cursor.skip_padding()?;
                let default = cursor.i32()?;
                let low = cursor.i32()?;
                let high = cursor.i32()?;
                let count = (high as i64) - (low as i64) + 1;
                if count < 0 {
                    return Err(Error::MalformedSwitch { offset });
                }
                cursor.ensure_remaining(count as usize * 4)?;
                let mut cases = Vec::with_capacity(count as usize);
                for key in (low as i64)..=(high as i64) {
                    cases.push((key as i32, cursor.i32()?));
                }
                Instruction::Switch {
                    opcode,
                    default,
                    cases,
                }
            }
            LOOKUPSWITCH => {
                cursor.skip_padding()?;
                let default = cursor.i32()?;
                let count = cursor.i32()?;
                if count < 0 {
                    return Err(Error::MalformedSwitch { offset });
                }
                cursor.ensure_remaining(count as usize * 8)?;
                let mut cases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = cursor.i32()?;
                    cases.push((key, cursor.i32()?));
                }
                Instruction::Switch {
                    opcode,
                    default,
                    cases,
                }
            }

            _ if fixed_stack_effect(opcode).is_some() => Instruction::simple(opcode),
            _ => return Err(Error::UnknownOpcode { opcode, offset }),
        };
        Ok((instruction, cursor.position as u32 - offset))
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Simple { opcode, .. }
            | Instruction::Variable { opcode, .. }
            | Instruction::Constant { opcode, .. }
            | Instruction::Branch { opcode, .. }
            | Instruction::Switch { opcode, .. } => *opcode,
        }
    }

    /// Opcode with short and wide variants folded away
    pub fn canonical_opcode(&self) -> u8 {
        match self.opcode() {
            GOTO_W => GOTO,
            JSR_W => JSR,
            LDC_W => LDC,
            opcode => opcode,
        }
    }

    /// Byte length of the instruction when encoded at `offset`
    pub fn length(&self, offset: u32) -> u32 {
        match self {
            Instruction::Simple { opcode, .. } => match *opcode {
                BIPUSH | NEWARRAY => 2,
                SIPUSH => 3,
                _ => 1,
            },
            Instruction::Variable {
                opcode,
                index,
                constant,
            } => match *opcode {
                IINC if *index <= 0xFF && i8::try_from(*constant).is_ok() => 3,
                IINC => 6,
                _ if *index <= 3 && *opcode != RET => 1,
                _ if *index <= 0xFF => 2,
                _ => 4,
            },
            Instruction::Constant { opcode, index, .. } => match *opcode {
                LDC if *index <= 0xFF => 2,
                INVOKEINTERFACE | INVOKEDYNAMIC => 5,
                MULTIANEWARRAY => 4,
                _ => 3,
            },
            Instruction::Branch { opcode, offset } => match *opcode {
                GOTO_W | JSR_W => 5,
                GOTO | JSR if i16::try_from(*offset).is_err() => 5,
                _ => 3,
            },
            Instruction::Switch { opcode, cases, .. } => {
                let fixed = if *opcode == TABLESWITCH { 12 } else { 8 };
                let per_case = if *opcode == TABLESWITCH { 4 } else { 8 };
                1 + switch_padding(offset) + fixed + per_case * cases.len() as u32
            }
        }
    }

    /// Encode the instruction as if it were at `offset` in the code array
    pub fn encode<W: WriteBytesExt>(&self, offset: u32, writer: &mut W) -> Result<(), Error> {
        let overflow = || Error::OperandOverflow {
            offset,
            opcode: self.opcode(),
        };

        match self {
            Instruction::Simple { opcode, constant } => {
                opcode.serialize(writer)?;
                match *opcode {
                    BIPUSH => i8::try_from(*constant)
                        .map_err(|_| overflow())?
                        .serialize(writer)?,
                    SIPUSH => i16::try_from(*constant)
                        .map_err(|_| overflow())?
                        .serialize(writer)?,
                    NEWARRAY => u8::try_from(*constant)
                        .map_err(|_| overflow())?
                        .serialize(writer)?,
                    _ => (),
                }
            }

            Instruction::Variable {
                opcode: IINC,
                index,
                constant,
            } => match (u8::try_from(*index), i8::try_from(*constant)) {
                (Ok(index), Ok(constant)) => {
                    IINC.serialize(writer)?;
                    index.serialize(writer)?;
                    constant.serialize(writer)?;
                }
                _ => {
                    WIDE.serialize(writer)?;
                    IINC.serialize(writer)?;
                    index.serialize(writer)?;
                    i16::try_from(*constant)
                        .map_err(|_| overflow())?
                        .serialize(writer)?;
                }
            },
            Instruction::Variable { opcode, index, .. } => {
                let short_form = match *opcode {
                    ILOAD..=ALOAD => Some(ILOAD_0 + (opcode - ILOAD) * 4),
                    ISTORE..=ASTORE => Some(ISTORE_0 + (opcode - ISTORE) * 4),
                    _ => None,
                };
                match (short_form, u8::try_from(*index)) {
                    (Some(short_form), Ok(n @ 0..=3)) => (short_form + n).serialize(writer)?,
                    (_, Ok(n)) => {
                        opcode.serialize(writer)?;
                        n.serialize(writer)?;
                    }
                    (_, Err(_)) => {
                        WIDE.serialize(writer)?;
                        opcode.serialize(writer)?;
                        index.serialize(writer)?;
                    }
                }
            }

            Instruction::Constant {
                opcode,
                index,
                operand,
            } => match *opcode {
                LDC | LDC_W => match u8::try_from(*index) {
                    Ok(index) => {
                        LDC.serialize(writer)?;
                        index.serialize(writer)?;
                    }
                    Err(_) => {
                        LDC_W.serialize(writer)?;
                        index.serialize(writer)?;
                    }
                },
                INVOKEINTERFACE => {
                    opcode.serialize(writer)?;
                    index.serialize(writer)?;
                    operand.serialize(writer)?;
                    0u8.serialize(writer)?;
                }
                INVOKEDYNAMIC => {
                    opcode.serialize(writer)?;
                    index.serialize(writer)?;
                    0u16.serialize(writer)?;
                }
                MULTIANEWARRAY => {
                    opcode.serialize(writer)?;
                    index.serialize(writer)?;
                    operand.serialize(writer)?;
                }
                _ => {
                    opcode.serialize(writer)?;
                    index.serialize(writer)?;
                }
            },

            Instruction::Branch {
                opcode,
                offset: jump,
            } => {
                let short_jump = i16::try_from(*jump);
                match (*opcode, short_jump) {
                    (GOTO_W, _) | (GOTO, Err(_)) => {
                        GOTO_W.serialize(writer)?;
                        jump.serialize(writer)?;
                    }
                    (JSR_W, _) | (JSR, Err(_)) => {
                        JSR_W.serialize(writer)?;
                        jump.serialize(writer)?;
                    }
                    (_, Ok(short_jump)) => {
                        opcode.serialize(writer)?;
                        short_jump.serialize(writer)?;
                    }
                    (_, Err(_)) => {
                        return Err(Error::JumpOverflow {
                            offset,
                            jump: *jump as i64,
                        })
                    }
                }
            }

            Instruction::Switch {
                opcode,
                default,
                cases,
            } => {
                opcode.serialize(writer)?;
                for _ in 0..switch_padding(offset) {
                    0u8.serialize(writer)?;
                }
                default.serialize(writer)?;
                if *opcode == TABLESWITCH {
                    let low = cases.first().map_or(0, |(key, _)| *key);
                    let high = cases.last().map_or(-1, |(key, _)| *key);
                    let consecutive = cases
                        .iter()
                        .enumerate()
                        .all(|(i, (key, _))| *key as i64 == low as i64 + i as i64);
                    if !consecutive {
                        return Err(Error::MalformedSwitch { offset });
                    }
                    low.serialize(writer)?;
                    high.serialize(writer)?;
                    for (_, jump) in cases {
                        jump.serialize(writer)?;
                    }
                } else {
                    (cases.len() as i32).serialize(writer)?;
                    for (key, jump) in cases {
                        key.serialize(writer)?;
                        jump.serialize(writer)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Operand stack slots `(popped, pushed)` by the instruction
    ///
    /// Field access and method invocation depend on descriptors, which are looked up in the
    /// constant pool.
    pub fn stack_effect(&self, constants: &ConstantPool) -> Result<(u32, u32), Error> {
        if let Instruction::Constant {
            opcode,
            index,
            operand,
        } = self
        {
            let effect = match *opcode {
                LDC | LDC_W => (0, 1),
                LDC2_W => (0, 2),
                GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
                    let member = constants.member_ref(*index)?;
                    let width = FieldType::parse(member.descriptor)
                        .map_err(|_| Error::BadDescriptor(member.descriptor.to_owned()))?
                        .width() as u32;
                    match *opcode {
                        GETSTATIC => (0, width),
                        PUTSTATIC => (width, 0),
                        GETFIELD => (1, width),
                        _ => (1 + width, 0),
                    }
                }
                INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                    let member = constants.member_ref(*index)?;
                    let descriptor = parse_method_descriptor(member.descriptor)?;
                    let has_receiver = *opcode != INVOKESTATIC;
                    (
                        descriptor.parameter_length(has_receiver) as u32,
                        descriptor.return_width() as u32,
                    )
                }
                INVOKEDYNAMIC => {
                    let (_, descriptor) = constants.dynamic_name_and_type(*index)?;
                    let descriptor = parse_method_descriptor(descriptor)?;
                    (
                        descriptor.parameter_length(false) as u32,
                        descriptor.return_width() as u32,
                    )
                }
                MULTIANEWARRAY => (*operand as u32, 1),
                other => fixed_stack_effect(other).ok_or(Error::UnknownOpcode {
                    opcode: other,
                    offset: 0,
                })?,
            };
            return Ok(effect);
        }

        let opcode = self.canonical_opcode();
        fixed_stack_effect(opcode).ok_or(Error::UnknownOpcode { opcode, offset: 0 })
    }

    pub fn stack_pop_count(&self, constants: &ConstantPool) -> Result<u32, Error> {
        self.stack_effect(constants).map(|(popped, _)| popped)
    }

    pub fn stack_push_count(&self, constants: &ConstantPool) -> Result<u32, Error> {
        self.stack_effect(constants).map(|(_, pushed)| pushed)
    }

    /// Is this one of the `*return` instructions?
    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Simple { opcode: IRETURN..=RETURN, .. })
    }

    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            Instruction::Constant {
                opcode: INVOKEVIRTUAL..=INVOKEDYNAMIC,
                ..
            }
        )
    }

    /// Can execution continue to the next instruction in the code array?
    pub fn falls_through(&self) -> bool {
        match self {
            Instruction::Simple { opcode, .. } => {
                !matches!(*opcode, IRETURN..=RETURN | ATHROW)
            }
            Instruction::Variable { opcode, .. } => *opcode != RET,
            Instruction::Branch { .. } => !matches!(self.canonical_opcode(), GOTO),
            Instruction::Switch { .. } => false,
            Instruction::Constant { .. } => true,
        }
    }

    /// Relative offsets of all explicit jump targets
    pub fn jump_offsets(&self) -> Vec<i32> {
        match self {
            Instruction::Branch { offset, .. } => vec![*offset],
            Instruction::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, jump)| *jump))
                .collect(),
            _ => vec![],
        }
    }
}

/// Number of padding bytes after a switch opcode at `offset`, so that the operands are 4-byte
/// aligned relative to the start of the code array
pub fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(descriptor).map_err(|_| Error::BadDescriptor(descriptor.to_owned()))
}

/// Decode a whole code array into instructions along with their offsets
pub fn decode_all(code: &[u8]) -> Result<Vec<(u32, Instruction)>, Error> {
    let mut instructions = vec![];
    let mut offset: u32 = 0;
    while (offset as usize) < code.len() {
        let (instruction, length) = Instruction::decode(code, offset)?;
        instructions.push((offset, instruction));
        offset += length;
    }
    Ok(instructions)
}

/// Encode a sequence of instructions back to back, with jump offsets used as given
pub fn encode_all(instructions: &[Instruction]) -> Result<Vec<u8>, Error> {
    let mut code = vec![];
    for instruction in instructions {
        instruction.encode(code.len() as u32, &mut code)?;
    }
    Ok(code)
}

struct Cursor<'a> {
    code: &'a [u8],
    start: u32,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn truncated(&self) -> Error {
        Error::TruncatedInstruction { offset: self.start }
    }

    fn ensure_remaining(&self, bytes: usize) -> Result<(), Error> {
        if self.code.len().saturating_sub(self.position) < bytes {
            Err(self.truncated())
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let byte = *self.code.get(self.position).ok_or_else(|| self.truncated())?;
        self.position += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok((self.u8()? as u16) << 8 | self.u8()? as u16)
    }

    fn i32(&mut self) -> Result<i32, Error> {
        Ok(((self.u16()? as u32) << 16 | self.u16()? as u32) as i32)
    }

    fn skip_padding(&mut self) -> Result<(), Error> {
        for _ in 0..switch_padding(self.start) {
            self.u8()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod instruction_tests {
    use super::*;

    fn decoded(code: &[u8]) -> Vec<(u32, Instruction)> {
        decode_all(code).unwrap()
    }

    #[test]
    fn short_and_wide_forms_are_canonical() {
        let code = vec![
            0x1b, // iload_1
            0x15, 0x01, // iload 1
            0xc4, 0x15, 0x00, 0x01, // wide iload 1
            0x4e, // astore_3
            0xc4, 0x84, 0x01, 0x00, 0xff, 0xfe, // wide iinc 256 -2
        ];
        let instructions = decoded(&code);
        assert_eq!(
            instructions,
            vec![
                (0, Instruction::variable(ILOAD, 1)),
                (1, Instruction::variable(ILOAD, 1)),
                (3, Instruction::variable(ILOAD, 1)),
                (7, Instruction::variable(ASTORE, 3)),
                (
                    8,
                    Instruction::Variable {
                        opcode: IINC,
                        index: 256,
                        constant: -2
                    }
                ),
            ]
        );

        // Re-encoding picks the compact forms
        let instructions: Vec<Instruction> = instructions.into_iter().map(|(_, i)| i).collect();
        assert_eq!(
            encode_all(&instructions).unwrap(),
            vec![0x1b, 0x1b, 0x1b, 0x4e, 0xc4, 0x84, 0x01, 0x00, 0xff, 0xfe]
        );
    }

    #[test]
    fn variable_lengths() {
        assert_eq!(Instruction::variable(DLOAD, 3).length(0), 1);
        assert_eq!(Instruction::variable(DLOAD, 4).length(0), 2);
        assert_eq!(Instruction::variable(DLOAD, 300).length(0), 4);
        assert_eq!(Instruction::variable(RET, 0).length(0), 2);
        let iinc = Instruction::Variable {
            opcode: IINC,
            index: 2,
            constant: 200,
        };
        assert_eq!(iinc.length(0), 6);
    }

    #[test]
    fn goto_widens_when_needed() {
        assert_eq!(Instruction::branch(GOTO, 40_000).length(0), 5);
        assert_eq!(Instruction::branch(GOTO, -3).length(0), 3);
        assert_eq!(
            encode_all(&[Instruction::branch(GOTO, 40_000)]).unwrap(),
            vec![0xc8, 0x00, 0x00, 0x9c, 0x40]
        );
        assert!(matches!(
            encode_all(&[Instruction::branch(IFEQ, 40_000)]),
            Err(Error::JumpOverflow { offset: 0, .. })
        ));

        let (decoded, length) = Instruction::decode(&[0xc8, 0x00, 0x00, 0x00, 0x05], 0).unwrap();
        assert_eq!(decoded, Instruction::branch(GOTO, 5));
        assert_eq!(length, 5);
    }

    #[test]
    fn switch_padding_depends_on_offset() {
        let switch = Instruction::Switch {
            opcode: TABLESWITCH,
            default: 20,
            cases: vec![(1, 16), (2, 18)],
        };
        assert_eq!(switch.length(0), 1 + 3 + 12 + 8);
        assert_eq!(switch.length(3), 1 + 12 + 8);

        let mut code = vec![NOP, NOP];
        switch.encode(2, &mut code).unwrap();
        assert_eq!(code.len() as u32, 2 + switch.length(2));

        let instructions = decoded(&code);
        assert_eq!(instructions[2], (2, switch));
    }

    #[test]
    fn lookup_switch() {
        let switch = Instruction::Switch {
            opcode: LOOKUPSWITCH,
            default: 9,
            cases: vec![(-5, 3), (100, 7)],
        };
        let code = encode_all(&[switch.clone()]).unwrap();
        assert_eq!(code.len(), 1 + 3 + 8 + 16);
        assert_eq!(decoded(&code), vec![(0, switch)]);
    }

    #[test]
    fn malformed_code() {
        assert!(matches!(
            Instruction::decode(&[0x11, 0x00], 0),
            Err(Error::TruncatedInstruction { offset: 0 })
        ));
        assert!(matches!(
            Instruction::decode(&[0xc4, 0x99, 0, 0], 0),
            Err(Error::InvalidWideOpcode { opcode: 0x99, .. })
        ));
        assert!(matches!(
            Instruction::decode(&[0xcb], 0),
            Err(Error::UnknownOpcode { opcode: 0xcb, .. })
        ));
    }

    #[test]
    fn invoke_stack_effects() {
        let mut constants = ConstantPool::new();
        let virtual_method = constants
            .get_method_ref("a/B", "mix", "(JI)D", false)
            .unwrap();
        let static_method = constants.get_method_ref("a/B", "run", "()V", false).unwrap();
        let field = constants.get_field_ref("a/B", "total", "J").unwrap();

        let invoke = Instruction::constant(INVOKEVIRTUAL, virtual_method);
        assert_eq!(invoke.stack_effect(&constants).unwrap(), (4, 2));
        let invoke = Instruction::constant(INVOKESTATIC, static_method);
        assert_eq!(invoke.stack_effect(&constants).unwrap(), (0, 0));
        let put = Instruction::constant(PUTFIELD, field);
        assert_eq!(put.stack_effect(&constants).unwrap(), (3, 0));
        let get = Instruction::constant(GETSTATIC, field);
        assert_eq!(get.stack_effect(&constants).unwrap(), (0, 2));
        let multi = Instruction::Constant {
            opcode: MULTIANEWARRAY,
            index: 1,
            operand: 3,
        };
        assert_eq!(multi.stack_effect(&constants).unwrap(), (3, 1));
        assert_eq!(
            Instruction::variable(LSTORE, 7)
                .stack_pop_count(&constants)
                .unwrap(),
            2
        );
    }

    #[test]
    fn control_flow_classification() {
        assert!(Instruction::simple(IRETURN).is_return());
        assert!(!Instruction::simple(IRETURN).falls_through());
        assert!(!Instruction::simple(ATHROW).falls_through());
        assert!(!Instruction::branch(GOTO_W, 8).falls_through());
        assert!(Instruction::branch(IFNULL, 8).falls_through());
        assert!(Instruction::branch(JSR, 8).falls_through());
        assert!(!Instruction::variable(RET, 1).falls_through());
        assert!(Instruction::constant(INVOKEDYNAMIC, 1).is_invoke());
    }
}
