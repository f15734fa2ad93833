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

//! Bytecode-derived view of compiled classes
//!
//! Class names use the JVM internal form (`com/example/Foo`, nested classes as
//! `com/example/Foo$Bar`). Definitions are immutable once built and shared
//! read-only between verification runs through `Arc`.

pub mod classfile;
pub mod descriptor;
pub mod index;
pub mod writer;

pub use classfile::read_class;
pub use index::ClassIndex;
pub use writer::ClassFileBuilder;

use serde::Serialize;
use std::fmt;

/// JVM access flags shared by classes, methods and fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const BRIDGE: u16 = 0x0040;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;

    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub const fn with(self, flag: u16) -> Self {
        Self(self.0 | flag)
    }

    pub const fn is_public(&self) -> bool {
        self.contains(Self::PUBLIC)
    }

    pub const fn is_private(&self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub const fn is_protected(&self) -> bool {
        self.contains(Self::PROTECTED)
    }

    pub const fn is_static(&self) -> bool {
        self.contains(Self::STATIC)
    }

    pub const fn is_final(&self) -> bool {
        self.contains(Self::FINAL)
    }

    pub const fn is_interface(&self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub const fn is_abstract(&self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub const fn is_synthetic(&self) -> bool {
        self.contains(Self::SYNTHETIC)
    }

    pub fn level(&self) -> AccessLevel {
        if self.is_public() {
            AccessLevel::Public
        } else if self.is_protected() {
            AccessLevel::Protected
        } else if self.is_private() {
            AccessLevel::Private
        } else {
            AccessLevel::PackagePrivate
        }
    }
}

/// Visibility of a class member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AccessLevel {
    Private,
    PackagePrivate,
    Protected,
    Public,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::PackagePrivate => write!(f, "package-private"),
            Self::Protected => write!(f, "protected"),
            Self::Public => write!(f, "public"),
        }
    }
}

/// A method declared by a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub deprecated: bool,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            deprecated: false,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// A field declared by a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub deprecated: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            deprecated: false,
        }
    }
}

/// Kind of a symbolic member reference found in the constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// Symbolic reference to a member of another (or the same) class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberReference {
    pub kind: MemberKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberReference {
    pub fn method(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            kind: MemberKind::Method,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn field(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            kind: MemberKind::Field,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn is_field(&self) -> bool {
        self.kind == MemberKind::Field
    }
}

/// Immutable view of one compiled class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    /// Internal name of the class
    pub name: String,
    /// Direct superclass; `None` only for the implicit root class
    pub super_name: Option<String>,
    /// Directly implemented (or, for interfaces, extended) interfaces in declaration order
    pub interfaces: Vec<String>,
    pub access: AccessFlags,
    pub methods: Vec<MethodInfo>,
    pub fields: Vec<FieldInfo>,
    /// Class names mentioned by the constant pool, excluding the class itself
    pub class_references: Vec<String>,
    /// Field and method references mentioned by the constant pool
    pub member_references: Vec<MemberReference>,
    pub deprecated: bool,
    /// Class file major version
    pub major_version: u16,
}

impl ClassDefinition {
    /// Creates an empty definition, mostly useful for synthetic classpaths
    pub fn new(name: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            access,
            methods: Vec::new(),
            fields: Vec::new(),
            class_references: Vec::new(),
            member_references: Vec::new(),
            deprecated: false,
            major_version: 52,
        }
    }

    pub fn with_super(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_method(mut self, method: MethodInfo) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_class_reference(mut self, class_name: impl Into<String>) -> Self {
        self.class_references.push(class_name.into());
        self
    }

    pub fn with_member_reference(mut self, reference: MemberReference) -> Self {
        self.member_references.push(reference);
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    pub fn is_final(&self) -> bool {
        self.access.is_final()
    }

    /// Concrete classes must implement every inherited abstract method
    pub fn is_concrete(&self) -> bool {
        !self.is_interface() && !self.is_abstract()
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name && f.descriptor == descriptor)
    }

    pub fn package_name(&self) -> &str {
        package_of(&self.name)
    }
}

/// Package part of an internal class name (empty for the default package)
pub fn package_of(class_name: &str) -> &str {
    class_name.rfind('/').map_or("", |idx| &class_name[..idx])
}

/// Top-level class of a possibly nested class name
pub fn outermost_class(class_name: &str) -> &str {
    let simple_start = class_name.rfind('/').map_or(0, |idx| idx + 1);
    match class_name[simple_start..].find('$') {
        Some(offset) => &class_name[..simple_start + offset],
        None => class_name,
    }
}

/// Converts an internal name to the dotted form used in reports
pub fn to_dotted(class_name: &str) -> String {
    class_name.replace('/', ".")
}
