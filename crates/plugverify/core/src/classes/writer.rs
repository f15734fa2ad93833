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

//! Minimal class file writer
//!
//! Emits structurally valid class files (no code attributes) for stub
//! classpaths and fixtures. Only what the reader consumes is written.

use std::collections::HashMap;

use crate::classes::classfile::CLASS_MAGIC;
use crate::classes::{ClassDefinition, MemberKind};

const JAVA_8_MAJOR: u16 = 52;

struct PoolWriter {
    bytes: Vec<u8>,
    next_index: u16,
    known: HashMap<String, u16>,
}

impl PoolWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_index: 1,
            known: HashMap::new(),
        }
    }

    fn intern(&mut self, key: String, slots: u16, encode: impl FnOnce(&mut Vec<u8>)) -> u16 {
        if let Some(index) = self.known.get(&key) {
            return *index;
        }
        let index = self.next_index;
        encode(&mut self.bytes);
        self.next_index += slots;
        self.known.insert(key, index);
        index
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let encoded = value.as_bytes().to_vec();
        self.intern(format!("utf8:{value}"), 1, |out| {
            out.push(1);
            put_u16(out, encoded.len() as u16);
            out.extend_from_slice(&encoded);
        })
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(format!("class:{name}"), 1, |out| {
            out.push(7);
            put_u16(out, name_index);
        })
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(format!("nat:{name}:{descriptor}"), 1, |out| {
            out.push(12);
            put_u16(out, name_index);
            put_u16(out, descriptor_index);
        })
    }

    fn member_ref(&mut self, kind: MemberKind, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let nat_index = self.name_and_type(name, descriptor);
        let tag = match kind {
            MemberKind::Field => 9,
            MemberKind::Method => 10,
            MemberKind::InterfaceMethod => 11,
        };
        self.intern(format!("ref:{tag}:{owner}:{name}:{descriptor}"), 1, |out| {
            out.push(tag);
            put_u16(out, class_index);
            put_u16(out, nat_index);
        })
    }

    fn long(&mut self, value: i64) -> u16 {
        self.intern(format!("long:{value}"), 2, |out| {
            out.push(5);
            out.extend_from_slice(&value.to_be_bytes());
        })
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[derive(Debug, Clone)]
struct MemberSpec {
    name: String,
    descriptor: String,
    access: u16,
    deprecated: bool,
}

/// Builder producing class file bytes
#[derive(Debug, Clone)]
pub struct ClassFileBuilder {
    name: String,
    access: u16,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
    member_refs: Vec<(MemberKind, String, String, String)>,
    class_refs: Vec<String>,
    longs: Vec<i64>,
    deprecated: bool,
}

impl ClassFileBuilder {
    pub fn new(name: impl Into<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            access,
            super_name: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            member_refs: Vec::new(),
            class_refs: Vec::new(),
            longs: Vec::new(),
            deprecated: false,
        }
    }

    /// Starts from an existing definition, carrying over everything the writer supports
    pub fn from_definition(class: &ClassDefinition) -> Self {
        let mut builder = Self::new(class.name.clone(), class.access.bits());
        builder.super_name = class.super_name.clone();
        builder.interfaces = class.interfaces.clone();
        builder.deprecated = class.deprecated;
        builder.fields = class
            .fields
            .iter()
            .map(|f| MemberSpec {
                name: f.name.clone(),
                descriptor: f.descriptor.clone(),
                access: f.access.bits(),
                deprecated: f.deprecated,
            })
            .collect();
        builder.methods = class
            .methods
            .iter()
            .map(|m| MemberSpec {
                name: m.name.clone(),
                descriptor: m.descriptor.clone(),
                access: m.access.bits(),
                deprecated: m.deprecated,
            })
            .collect();
        builder.member_refs = class
            .member_references
            .iter()
            .map(|r| (r.kind, r.owner.clone(), r.name.clone(), r.descriptor.clone()))
            .collect();
        builder.class_refs = class.class_references.clone();
        builder
    }

    pub fn super_class(mut self, name: impl Into<String>) -> Self {
        self.super_name = Some(name.into());
        self
    }

    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        self.fields.push(MemberSpec {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            deprecated: false,
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        self.methods.push(MemberSpec {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            deprecated: false,
        });
        self
    }

    pub fn deprecated_method(mut self, name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        self.methods.push(MemberSpec {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            deprecated: true,
        });
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn method_reference(mut self, owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.member_refs.push((MemberKind::Method, owner.into(), name.into(), descriptor.into()));
        self
    }

    pub fn interface_method_reference(mut self, owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.member_refs.push((MemberKind::InterfaceMethod, owner.into(), name.into(), descriptor.into()));
        self
    }

    pub fn field_reference(mut self, owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.member_refs.push((MemberKind::Field, owner.into(), name.into(), descriptor.into()));
        self
    }

    pub fn class_reference(mut self, name: impl Into<String>) -> Self {
        self.class_refs.push(name.into());
        self
    }

    pub fn long_constant(mut self, value: i64) -> Self {
        self.longs.push(value);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = PoolWriter::new();

        for value in &self.longs {
            pool.long(*value);
        }
        let this_index = pool.class(&self.name);
        let super_index = self.super_name.as_deref().map_or(0, |name| pool.class(name));
        let interface_indices: Vec<u16> = self.interfaces.iter().map(|name| pool.class(name)).collect();
        for name in &self.class_refs {
            pool.class(name);
        }
        for (kind, owner, name, descriptor) in &self.member_refs {
            pool.member_ref(*kind, owner, name, descriptor);
        }
        let deprecated_index = pool.utf8("Deprecated");
        let fields: Vec<(u16, u16, u16, bool)> =
            self.fields.iter().map(|f| (f.access, pool.utf8(&f.name), pool.utf8(&f.descriptor), f.deprecated)).collect();
        let methods: Vec<(u16, u16, u16, bool)> =
            self.methods.iter().map(|m| (m.access, pool.utf8(&m.name), pool.utf8(&m.descriptor), m.deprecated)).collect();

        let mut out = Vec::with_capacity(pool.bytes.len() + 64);
        put_u32(&mut out, CLASS_MAGIC);
        put_u16(&mut out, 0);
        put_u16(&mut out, JAVA_8_MAJOR);
        put_u16(&mut out, pool.next_index);
        out.extend_from_slice(&pool.bytes);

        put_u16(&mut out, self.access);
        put_u16(&mut out, this_index);
        put_u16(&mut out, super_index);
        put_u16(&mut out, interface_indices.len() as u16);
        for index in interface_indices {
            put_u16(&mut out, index);
        }

        for members in [&fields, &methods] {
            put_u16(&mut out, members.len() as u16);
            for (access, name, descriptor, deprecated) in members {
                put_u16(&mut out, *access);
                put_u16(&mut out, *name);
                put_u16(&mut out, *descriptor);
                write_deprecated_attribute(&mut out, *deprecated, deprecated_index);
            }
        }

        write_deprecated_attribute(&mut out, self.deprecated, deprecated_index);
        out
    }
}

fn write_deprecated_attribute(out: &mut Vec<u8>, deprecated: bool, name_index: u16) {
    if deprecated {
        put_u16(out, 1);
        put_u16(out, name_index);
        put_u32(out, 0);
    } else {
        put_u16(out, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, MethodInfo, read_class};

    #[test]
    fn test_definition_survives_writing() {
        let original = ClassDefinition::new("p/Widget", AccessFlags::new(AccessFlags::PUBLIC | AccessFlags::FINAL))
            .with_super("p/Base")
            .with_interface("p/Shape")
            .with_method(MethodInfo::new("draw", "()V", AccessFlags::new(AccessFlags::PUBLIC)))
            .deprecated();

        let decoded = read_class(&ClassFileBuilder::from_definition(&original).build()).unwrap();

        assert_eq!(decoded.name, original.name);
        assert_eq!(decoded.super_name, original.super_name);
        assert_eq!(decoded.interfaces, original.interfaces);
        assert_eq!(decoded.methods, original.methods);
        assert!(decoded.deprecated);
        assert!(decoded.is_final());
    }
}
