//! Data model types.
//!
//! This is our abstract description of the native types in a program, reduced
//! to the facts the layout engine cares about: where things are, how big they
//! are, and what numbers the compiler attached to names.

use indexmap::IndexMap;

/// Identifies a specific type within a program, using its offset within the
/// `.debug_info` section.
///
/// Sometimes types appear more than once in debug info (once per compilation
/// unit that includes the header). In that case, each copy will have a
/// distinct `TypeId`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TypeId(pub gimli::DebugInfoOffset);

impl From<gimli::DebugInfoOffset> for TypeId {
    fn from(x: gimli::DebugInfoOffset) -> Self {
        Self(x)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<.debug_info+0x{:08x}>", (self.0).0)
    }
}

/// Broad category of a recorded type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TypeKind {
    /// `struct` in C or C++.
    Struct,
    /// `class` in C++. Identical to `Struct` for our purposes, but kept apart
    /// so listings read like the source.
    Class,
    /// C-style untagged union.
    Union,
    /// Enumeration type, scoped or not.
    Enum,
    /// Primitive type like `int` or `unsigned short`.
    Base,
    /// Pointer to some other type. These have no name in most compilers'
    /// output and exist here so that members of pointer type have a size.
    Pointer,
}

/// Information about one type definition from the debug info.
#[derive(Clone, Debug)]
pub struct TypeEntry {
    /// Fully qualified name, with namespace and enclosing type components
    /// joined by `::`, e.g. `v8::internal::Map`.
    pub name: String,
    /// What sort of type this is.
    pub kind: TypeKind,
    /// Size of a value of the type in bytes, if the compiler said.
    pub byte_size: Option<u64>,
    /// When `true`, this entry came from a forward declaration and carries no
    /// layout of its own. Lookups prefer complete definitions.
    pub declaration: bool,
    /// For enumeration types, whether the enum is scoped (`enum class`).
    pub enum_class: bool,
    /// Data members, in declaration order.
    pub members: IndexMap<String, Member>,
    /// Compile-time constants attached to this type: static constant members,
    /// and enumerators of unscoped enums nested inside it.
    ///
    /// Insertion order is declaration order.
    pub constants: IndexMap<String, i64>,
    /// For enumeration types, the enumerators, in declaration order.
    pub enumerators: Vec<Enumerator>,
    /// Direct base classes, in declaration order. This is the explicit base
    /// list consulted when searching for inherited constants.
    pub bases: Vec<BaseRef>,
    /// Location in debug info.
    pub offset: TypeId,
}

impl TypeEntry {
    pub(crate) fn new(
        name: String,
        kind: TypeKind,
        offset: TypeId,
    ) -> Self {
        Self {
            name,
            kind,
            byte_size: None,
            declaration: false,
            enum_class: false,
            members: IndexMap::new(),
            constants: IndexMap::new(),
            enumerators: vec![],
            bases: vec![],
            offset,
        }
    }

    /// Returns the last component of the qualified name, ignoring any
    /// template argument list, e.g. `HashTable` for
    /// `v8::internal::HashTable<NameDictionary, NameDictionaryShape>`.
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    /// Looks up a constant defined directly on this type.
    ///
    /// Data members also answer to their own name with their byte offset, so
    /// that `'Type'::member` paths work for plain fields.
    pub fn own_const(&self, name: &str) -> Option<i64> {
        if let Some(&v) = self.constants.get(name) {
            return Some(v);
        }
        self.members
            .get(name)
            .and_then(|m| m.location)
            .and_then(|l| i64::try_from(l).ok())
    }
}

/// Strips namespaces and template arguments from a qualified type name.
pub fn short_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// A data member of a struct, class, or union.
#[derive(Clone, Debug)]
pub struct Member {
    /// Name of the member.
    pub name: String,
    /// Type of data stored in this member, if recorded.
    pub type_id: Option<TypeId>,
    /// Byte offset of this member within the enclosing type. Missing for
    /// members whose location is expressed in a way we don't evaluate.
    pub location: Option<u64>,
    /// For bit-field members, the width in bits.
    pub bit_size: Option<u64>,
    /// For bit-field members, the offset in bits from the start of the
    /// enclosing type.
    pub bit_offset: Option<u64>,
}

/// One named value of an enumeration type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enumerator {
    /// Name of this enumerator, unqualified.
    pub name: String,
    /// Numeric value. Unsigned values above `i64::MAX` wrap, which doesn't
    /// occur for the enums we care about.
    pub value: i64,
}

/// A reference from a derived class to one of its bases.
#[derive(Copy, Clone, Debug)]
pub struct BaseRef {
    /// The base type.
    pub type_id: TypeId,
    /// Offset of the base subobject within the derived type.
    pub location: u64,
}

/// A resolved compile-time constant.
///
/// `end` carries the companion `<name>End` constant when the type defines one,
/// which is how offset ranges are described (`kFooOffset` / `kFooOffsetEnd`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantFact {
    /// Name of the constant, as looked up.
    pub name: String,
    /// Value of the constant.
    pub value: i64,
    /// Value of the companion end constant, if any.
    pub end: Option<i64>,
}

impl ConstantFact {
    /// Width of the range described by `value..=end`, when there is an end.
    pub fn span(&self) -> Option<u64> {
        let end = self.end?;
        u64::try_from(end - self.value + 1).ok()
    }
}
