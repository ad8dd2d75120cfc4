use crate::vm::classes::AccessFlags;
use crate::vm::error::VmError;
use byteorder::{BigEndian, ReadBytesExt};
use log::trace;
use std::io::Cursor;

pub const MAGIC: u32 = 0xCAFEBABE;
pub const MIN_SUPPORTED_MAJOR: u16 = 45;

pub const CONSTANT_VALUE: &str = "ConstantValue";
pub const CODE: &str = "Code";

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Index 0 and the second index of a long/double entry.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

/// Flat 1-indexed constant table. Index 0 is never valid.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant, VmError> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(VmError::malformed(format!(
                "constant pool index {} is not usable",
                index
            ))),
            Some(constant) => Ok(constant),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, VmError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            other => Err(VmError::malformed(format!(
                "expected Utf8 at #{}, found {:?}",
                index, other
            ))),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, VmError> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            other => Err(VmError::malformed(format!(
                "expected Class at #{}, found {:?}",
                index, other
            ))),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), VmError> {
        match self.get(index)? {
            Constant::NameAndType(name, descriptor) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(VmError::malformed(format!(
                "expected NameAndType at #{}, found {:?}",
                index, other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything.
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    pub fn covers(&self, pc: usize) -> bool {
        (self.start_pc as usize) <= pc && pc < (self.end_pc as usize)
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub enum Attribute {
    ConstantValue(u16),
    Code(CodeAttribute),
    Other { name: String, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn constant_value(&self) -> Option<u16> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::ConstantValue(index) => Some(*index),
            _ => None,
        })
    }
}

/// Parsed form of one binary class.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

impl ClassDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, VmError> {
        let mut reader = Cursor::new(bytes);
        let magic = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if magic != MAGIC {
            return Err(VmError::malformed(format!("bad magic 0x{:08x}", magic)));
        }
        let minor_version = reader.read_u16::<BigEndian>().map_err(truncated)?;
        let major_version = reader.read_u16::<BigEndian>().map_err(truncated)?;
        if major_version < MIN_SUPPORTED_MAJOR {
            return Err(VmError::malformed(format!(
                "unsupported class version {}.{}",
                major_version, minor_version
            )));
        }

        let constant_pool = read_constant_pool(&mut reader)?;
        let access_flags = AccessFlags::from_bits_truncate(u16_of(&mut reader)?);
        let name = constant_pool.class_name(u16_of(&mut reader)?)?.to_string();
        let super_index = u16_of(&mut reader)?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interfaces_count = u16_of(&mut reader)?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(constant_pool.class_name(u16_of(&mut reader)?)?.to_string());
        }

        let fields = read_members(&mut reader, &constant_pool)?;
        let methods = read_members(&mut reader, &constant_pool)?;
        let attributes = read_attributes(&mut reader, &constant_pool)?;
        trace!(
            "Parsed {} v{}.{}: {} constants, {} fields, {} methods",
            name,
            major_version,
            minor_version,
            constant_pool.len(),
            fields.len(),
            methods.len()
        );

        Ok(ClassDescriptor {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            name,
            super_name,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}

type Reader<'a> = Cursor<&'a [u8]>;

fn truncated(err: std::io::Error) -> VmError {
    VmError::malformed(format!("truncated class descriptor: {}", err))
}

fn u8_of(reader: &mut Reader) -> Result<u8, VmError> {
    reader.read_u8().map_err(truncated)
}

fn u16_of(reader: &mut Reader) -> Result<u16, VmError> {
    reader.read_u16::<BigEndian>().map_err(truncated)
}

fn u32_of(reader: &mut Reader) -> Result<u32, VmError> {
    reader.read_u32::<BigEndian>().map_err(truncated)
}

/// Lengths are checked against what is left before anything is allocated.
fn bytes_of(reader: &mut Reader, len: usize) -> Result<Vec<u8>, VmError> {
    let start = reader.position() as usize;
    let data: &[u8] = reader.get_ref();
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            VmError::malformed(format!(
                "truncated class descriptor: {} bytes wanted at offset {}, {} left",
                len,
                start,
                data.len().saturating_sub(start)
            ))
        })?;
    let bytes = data[start..end].to_vec();
    reader.set_position(end as u64);
    Ok(bytes)
}

fn read_constant_pool(reader: &mut Reader) -> Result<ConstantPool, VmError> {
    let count = u16_of(reader)? as usize;
    let mut entries = Vec::with_capacity(count);
    entries.push(Constant::Unusable);
    while entries.len() < count {
        let tag = u8_of(reader)?;
        let entry = match tag {
            1 => {
                let len = u16_of(reader)? as usize;
                Constant::Utf8(decode_modified_utf8(&bytes_of(reader, len)?)?)
            }
            3 => Constant::Integer(reader.read_i32::<BigEndian>().map_err(truncated)?),
            4 => Constant::Float(f32::from_bits(u32_of(reader)?)),
            5 => Constant::Long(reader.read_i64::<BigEndian>().map_err(truncated)?),
            6 => Constant::Double(f64::from_bits(
                reader.read_u64::<BigEndian>().map_err(truncated)?,
            )),
            7 => Constant::Class(u16_of(reader)?),
            8 => Constant::String(u16_of(reader)?),
            9 => Constant::FieldRef(u16_of(reader)?, u16_of(reader)?),
            10 => Constant::MethodRef(u16_of(reader)?, u16_of(reader)?),
            11 => Constant::InterfaceMethodRef(u16_of(reader)?, u16_of(reader)?),
            12 => Constant::NameAndType(u16_of(reader)?, u16_of(reader)?),
            15 => Constant::MethodHandle(u8_of(reader)?, u16_of(reader)?),
            16 => Constant::MethodType(u16_of(reader)?),
            17 => Constant::Dynamic(u16_of(reader)?, u16_of(reader)?),
            18 => Constant::InvokeDynamic(u16_of(reader)?, u16_of(reader)?),
            19 => Constant::Module(u16_of(reader)?),
            20 => Constant::Package(u16_of(reader)?),
            _ => {
                return Err(VmError::malformed(format!(
                    "unknown constant pool tag {} at #{}",
                    tag,
                    entries.len()
                )))
            }
        };
        let wide = matches!(entry, Constant::Long(_) | Constant::Double(_));
        entries.push(entry);
        if wide {
            entries.push(Constant::Unusable);
        }
    }
    if entries.len() != count {
        return Err(VmError::malformed(
            "wide constant overruns the constant pool",
        ));
    }
    Ok(ConstantPool { entries })
}

fn read_members(reader: &mut Reader, pool: &ConstantPool) -> Result<Vec<MemberInfo>, VmError> {
    let count = u16_of(reader)?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = AccessFlags::from_bits_truncate(u16_of(reader)?);
        let name = pool.utf8(u16_of(reader)?)?.to_string();
        let descriptor = pool.utf8(u16_of(reader)?)?.to_string();
        let attributes = read_attributes(reader, pool)?;
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

fn read_attributes(reader: &mut Reader, pool: &ConstantPool) -> Result<Vec<Attribute>, VmError> {
    let count = u16_of(reader)?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(u16_of(reader)?)?;
        let len = u32_of(reader)? as usize;
        let data = bytes_of(reader, len)?;
        let attribute = match name {
            CONSTANT_VALUE => {
                let mut inner = Cursor::new(data.as_slice());
                Attribute::ConstantValue(u16_of(&mut inner)?)
            }
            CODE => Attribute::Code(read_code(&data, pool)?),
            _ => Attribute::Other {
                name: name.to_string(),
                data,
            },
        };
        attributes.push(attribute);
    }
    Ok(attributes)
}

fn read_code(data: &[u8], pool: &ConstantPool) -> Result<CodeAttribute, VmError> {
    let mut reader = Cursor::new(data);
    let max_stack = u16_of(&mut reader)?;
    let max_locals = u16_of(&mut reader)?;
    let code_len = u32_of(&mut reader)? as usize;
    let code = bytes_of(&mut reader, code_len)?;
    let table_len = u16_of(&mut reader)?;
    let mut exception_table = Vec::with_capacity(table_len as usize);
    for _ in 0..table_len {
        exception_table.push(ExceptionTableEntry {
            start_pc: u16_of(&mut reader)?,
            end_pc: u16_of(&mut reader)?,
            handler_pc: u16_of(&mut reader)?,
            catch_type: u16_of(&mut reader)?,
        });
    }
    let attributes = read_attributes(&mut reader, pool)?;
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}

/// Class files store strings as "modified UTF-8": NUL is two bytes and
/// supplementary characters are encoded as surrogate pairs.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, VmError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        if b & 0x80 == 0 {
            units.push(b);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push(((b & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(
                ((b & 0x0F) << 12)
                    | ((bytes[i + 1] as u16 & 0x3F) << 6)
                    | (bytes[i + 2] as u16 & 0x3F),
            );
            i += 3;
        } else {
            return Err(VmError::malformed(format!(
                "invalid modified UTF-8 byte 0x{:02x} at {}",
                b, i
            )));
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(major: u16) -> Vec<u8> {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&major.to_be_bytes());
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let err = ClassDescriptor::parse(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]).unwrap_err();
        assert!(matches!(err, VmError::MalformedInput(_)));
    }

    #[test]
    fn rejects_old_versions() {
        let err = ClassDescriptor::parse(&header(44)).unwrap_err();
        assert!(matches!(err, VmError::MalformedInput(msg) if msg.contains("version")));
    }

    #[test]
    fn truncated_input_is_malformed() {
        let err = ClassDescriptor::parse(&header(52)).unwrap_err();
        assert!(matches!(err, VmError::MalformedInput(_)));
    }

    #[test]
    fn oversized_lengths_fail_without_reading() {
        let data = [1u8, 2, 3, 4];
        let mut reader = Cursor::new(&data[..]);
        u8_of(&mut reader).unwrap();
        let err = bytes_of(&mut reader, u32::MAX as usize).unwrap_err();
        assert!(matches!(err, VmError::MalformedInput(msg) if msg.contains("3 left")));
        assert_eq!(reader.position(), 1);
        assert_eq!(bytes_of(&mut reader, 3).unwrap(), vec![2, 3, 4]);
        assert!(bytes_of(&mut reader, 0).unwrap().is_empty());
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut bytes = header(52);
        // count 5: #1 Long, #2 unusable, #3 Utf8 "A", #4 Class #3
        bytes.extend_from_slice(&5u16.to_be_bytes());
        bytes.push(5);
        bytes.extend_from_slice(&(-2i64).to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.push(b'A');
        bytes.push(7);
        bytes.extend_from_slice(&3u16.to_be_bytes());
        let mut reader = Cursor::new(&bytes[8..]);
        let pool = read_constant_pool(&mut reader).unwrap();
        assert_eq!(pool.get(1).unwrap(), &Constant::Long(-2));
        assert!(pool.get(2).is_err());
        assert_eq!(pool.class_name(4).unwrap(), "A");
    }

    #[test]
    fn decodes_modified_utf8() {
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\u{0}");
        assert_eq!(decode_modified_utf8(&[0xE2, 0x82, 0xAC]).unwrap(), "\u{20AC}");
        assert_eq!(
            decode_modified_utf8(&[0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]).unwrap(),
            "\u{1F600}"
        );
        assert!(decode_modified_utf8(&[0xFF]).is_err());
    }
}
