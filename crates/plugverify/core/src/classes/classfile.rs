// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Class file reader
//!
//! Decodes the parts of a JVM class file the verifier needs: the constant pool,
//! the class header, declared members and the `Deprecated` attributes. Method
//! bodies are never interpreted; the symbolic references in the constant pool
//! already name every class and member the bytecode can touch.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::classes::descriptor::class_name_of_array_or_plain;
use crate::classes::{AccessFlags, ClassDefinition, FieldInfo, MemberKind, MemberReference, MethodInfo};
use crate::error::{ClassFileError, ClassFileResult};

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

const DEPRECATED_ATTRIBUTE: &str = "Deprecated";

#[derive(Debug, Clone)]
enum Constant {
    /// Slot 0 and the second slot of long/double entries
    Unusable,
    Utf8(String),
    Class(u16),
    NameAndType { name: u16, descriptor: u16 },
    MemberRef { kind: MemberKind, class: u16, name_and_type: u16 },
    Other,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn utf8(&self, index: u16) -> ClassFileResult<&str> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(value)) => Ok(value),
            _ => Err(ClassFileError::BadConstantIndex(index)),
        }
    }

    fn class_name(&self, index: u16) -> ClassFileResult<&str> {
        match self.entries.get(index as usize) {
            Some(Constant::Class(name_index)) => self.utf8(*name_index),
            _ => Err(ClassFileError::BadConstantIndex(index)),
        }
    }

    fn name_and_type(&self, index: u16) -> ClassFileResult<(&str, &str)> {
        match self.entries.get(index as usize) {
            Some(Constant::NameAndType { name, descriptor }) => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            _ => Err(ClassFileError::BadConstantIndex(index)),
        }
    }
}

/// Decodes a class file into a [`ClassDefinition`]
pub fn read_class(bytes: &[u8]) -> ClassFileResult<ClassDefinition> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    if magic != CLASS_MAGIC {
        return Err(ClassFileError::InvalidMagic(magic));
    }
    let _minor = read_u16(&mut cursor)?;
    let major = read_u16(&mut cursor)?;

    let pool = read_constant_pool(&mut cursor)?;

    let access = AccessFlags::new(read_u16(&mut cursor)?);
    let this_index = read_u16(&mut cursor)?;
    let name = pool.class_name(this_index)?.to_string();
    let super_index = read_u16(&mut cursor)?;
    let super_name = if super_index == 0 { None } else { Some(pool.class_name(super_index)?.to_string()) };

    let interface_count = read_u16(&mut cursor)?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        let index = read_u16(&mut cursor)?;
        interfaces.push(pool.class_name(index)?.to_string());
    }

    let fields = read_members(&mut cursor, &pool)?
        .into_iter()
        .map(|member| FieldInfo {
            name: member.name,
            descriptor: member.descriptor,
            access: member.access,
            deprecated: member.deprecated,
        })
        .collect();

    let methods = read_members(&mut cursor, &pool)?
        .into_iter()
        .map(|member| MethodInfo {
            name: member.name,
            descriptor: member.descriptor,
            access: member.access,
            deprecated: member.deprecated,
        })
        .collect();

    let deprecated = read_attributes(&mut cursor, &pool)?;

    let mut class_references: Vec<String> = Vec::new();
    let mut member_references = Vec::new();
    for entry in &pool.entries {
        match entry {
            Constant::Class(name_index) => {
                let referenced = pool.utf8(*name_index)?;
                if let Some(plain) = class_name_of_array_or_plain(referenced)
                    && plain != name
                    && !class_references.iter().any(|known| known == plain)
                {
                    class_references.push(plain.to_string());
                }
            }
            Constant::MemberRef { kind, class, name_and_type } => {
                let owner = pool.class_name(*class)?;
                let (member_name, descriptor) = pool.name_and_type(*name_and_type)?;
                let reference = MemberReference {
                    kind: *kind,
                    owner: owner.to_string(),
                    name: member_name.to_string(),
                    descriptor: descriptor.to_string(),
                };
                if !member_references.contains(&reference) {
                    member_references.push(reference);
                }
            }
            _ => {}
        }
    }

    Ok(ClassDefinition {
        name,
        super_name,
        interfaces,
        access,
        methods,
        fields,
        class_references,
        member_references,
        deprecated,
        major_version: major,
    })
}

fn truncated(_: std::io::Error) -> ClassFileError {
    ClassFileError::Truncated
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> ClassFileResult<u16> {
    cursor.read_u16::<BigEndian>().map_err(truncated)
}

fn skip(cursor: &mut Cursor<&[u8]>, len: u64) -> ClassFileResult<()> {
    let target = cursor.position() + len;
    if target > cursor.get_ref().len() as u64 {
        return Err(ClassFileError::Truncated);
    }
    cursor.set_position(target);
    Ok(())
}

fn read_constant_pool(cursor: &mut Cursor<&[u8]>) -> ClassFileResult<ConstantPool> {
    let count = read_u16(cursor)?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);

    let mut index: u16 = 1;
    while index < count {
        let tag = cursor.read_u8().map_err(truncated)?;
        let entry = match tag {
            TAG_UTF8 => {
                let len = read_u16(cursor)? as usize;
                let mut raw = vec![0u8; len];
                cursor.read_exact(&mut raw).map_err(truncated)?;
                // Modified UTF-8 only differs for NUL and supplementary characters,
                // neither of which appear in class or member names.
                Constant::Utf8(String::from_utf8_lossy(&raw).into_owned())
            }
            TAG_INTEGER | TAG_FLOAT => {
                skip(cursor, 4)?;
                Constant::Other
            }
            TAG_LONG | TAG_DOUBLE => {
                // Second slot must still lie inside the pool
                if index + 1 >= count {
                    return Err(ClassFileError::BadConstantIndex(index));
                }
                skip(cursor, 8)?;
                entries.push(Constant::Other);
                index += 1;
                Constant::Unusable
            }
            TAG_CLASS => Constant::Class(read_u16(cursor)?),
            TAG_STRING | TAG_METHOD_TYPE | TAG_MODULE | TAG_PACKAGE => {
                skip(cursor, 2)?;
                Constant::Other
            }
            TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => {
                let kind = match tag {
                    TAG_FIELDREF => MemberKind::Field,
                    TAG_METHODREF => MemberKind::Method,
                    _ => MemberKind::InterfaceMethod,
                };
                Constant::MemberRef {
                    kind,
                    class: read_u16(cursor)?,
                    name_and_type: read_u16(cursor)?,
                }
            }
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name: read_u16(cursor)?,
                descriptor: read_u16(cursor)?,
            },
            TAG_METHOD_HANDLE => {
                skip(cursor, 3)?;
                Constant::Other
            }
            TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => {
                skip(cursor, 4)?;
                Constant::Other
            }
            other => return Err(ClassFileError::UnknownConstantTag { tag: other, index }),
        };
        entries.push(entry);
        index += 1;
    }

    Ok(ConstantPool { entries })
}

struct RawMember {
    access: AccessFlags,
    name: String,
    descriptor: String,
    deprecated: bool,
}

fn read_members(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> ClassFileResult<Vec<RawMember>> {
    let count = read_u16(cursor)?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access = AccessFlags::new(read_u16(cursor)?);
        let name = pool.utf8(read_u16(cursor)?)?.to_string();
        let descriptor = pool.utf8(read_u16(cursor)?)?.to_string();
        let deprecated = read_attributes(cursor, pool)?;
        members.push(RawMember {
            access,
            name,
            descriptor,
            deprecated,
        });
    }
    Ok(members)
}

/// Skips an attribute table, returning whether it contained `Deprecated`
fn read_attributes(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> ClassFileResult<bool> {
    let count = read_u16(cursor)?;
    let mut deprecated = false;
    for _ in 0..count {
        let name = pool.utf8(read_u16(cursor)?)?;
        let len = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        if name == DEPRECATED_ATTRIBUTE {
            deprecated = true;
        }
        skip(cursor, u64::from(len))?;
    }
    Ok(deprecated)
}
