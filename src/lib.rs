//! Reconstructs typed object graphs from raw target memory, using layout facts
//! pulled out of the target's DWARF at runtime.
//!
//! The pieces, leaves first:
//!
//! - `DebugInfoImage` (this module, built by `dwarf_parser`) answers "what is
//!   the offset/size/value of constant X in type Y".
//! - `layout` compiles declarative field lists against the image.
//! - `value` and `heap` classify tagged words and bind addresses to kinds.
//! - `graph` walks the heap from roots and `snapshot` writes the result.

pub mod catalog;
pub mod config;
pub mod dwarf_parser;
pub mod error;
pub mod graph;
pub mod heap;
pub mod layout;
pub mod load;
pub mod logging;
pub mod model;
pub mod snapshot;
pub mod value;

pub use error::{ConfigError, GraphError, ImageError, LayoutError, MissingDebugInfo, ObjectError};
pub use model::*;

use indexmap::IndexMap;
use object::{Object, ObjectSection};
use regex::Regex;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

// Internal type abbreviations
type RtSlice<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;
type BTreeIndex<I, K> = BTreeMap<K, BTreeSet<I>>;

/// Base-class short names that are always followed during inherited constant
/// search, even when their name shares nothing with the derived class.
pub const DEFAULT_BASE_ALLOW_LIST: &[&str] = &[
    "^TorqueGenerated",
    "^HashTable(Base)?$",
    "^FixedArray(Base)?$",
    "^HeapObject$",
];

/// Everything we know about one program's debug info.
///
/// This is immutable once built, apart from the constant-resolution cache,
/// which only ever memoizes pure lookups.
#[derive(Debug)]
pub struct DebugInfoImage {
    /// Endianness of the target system.
    endian: gimli::RunTimeEndian,
    /// Pointer width of the target system. Currently only 32 and 64 are
    /// supported here.
    is_64: bool,

    /// All types in the program, indexed by location in `.debug_info`.
    ///
    /// This is the authoritative set of types, other type-related fields index
    /// into this.
    ///
    /// Invariant: within each entry, the key is the same as the type's `offset`
    /// field.
    types: BTreeMap<TypeId, TypeEntry>,

    /// Transparent type wrappers (typedefs, cv-qualifiers), mapping the
    /// wrapper's location to the type it wraps.
    aliases: BTreeMap<TypeId, TypeId>,

    /// Index: type name to location(s) that can be looked up in `types` or
    /// `aliases`.
    type_name_index: BTreeIndex<TypeId, String>,

    /// Constants defined at namespace scope, by qualified name.
    globals: IndexMap<String, i64>,

    /// Patterns applied to base-class short names during inherited search.
    base_allow_list: Vec<Regex>,

    /// Memoized results of `(type name, constant name)` lookups.
    ///
    /// Invariant: write-once per key. A second resolution of the same key must
    /// produce the same answer.
    const_cache: RefCell<HashMap<(String, String), Option<i64>>>,
}

impl DebugInfoImage {
    /// Memory-maps the file at `path` and parses its debug info.
    ///
    /// The mapping only lives for the duration of this call; everything the
    /// session needs is copied into owned structures.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        // Safety: the mapping is read-only and is dropped before we return, so
        // nothing we hand out can observe later modification of the file.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        let object = object::File::parse(&*map)?;
        let image = parse_file(&object)?;
        tracing::info!(
            path = %path.display(),
            types = image.type_count(),
            globals = image.globals.len(),
            "debug info loaded",
        );
        Ok(image)
    }

    /// Parses debug info from raw section contents.
    ///
    /// `section` is asked for each DWARF section by id and returns an empty
    /// slice for sections that don't exist.
    pub fn from_sections<'a>(
        endian: gimli::RunTimeEndian,
        is_64: bool,
        section: impl Fn(gimli::SectionId) -> &'a [u8],
    ) -> Result<Self, ImageError> {
        if section(gimli::SectionId::DebugInfo).is_empty() {
            return Err(ImageError::MissingSection(".debug_info"));
        }
        if section(gimli::SectionId::DebugAbbrev).is_empty() {
            return Err(ImageError::MissingSection(".debug_abbrev"));
        }
        let dwarf = gimli::Dwarf::load(|id| {
            Ok::<_, gimli::Error>(gimli::EndianSlice::new(section(id), endian))
        })?;
        let mut builder = ImageBuilder::new(endian, is_64);
        dwarf_parser::parse_dwarf(&dwarf, &mut builder)?;
        builder.build()
    }

    /// Replaces the base-class allow-list used by inherited constant search.
    ///
    /// This clears the constant cache, since answers may change.
    pub fn set_base_allow_list(&mut self, patterns: Vec<Regex>) {
        self.base_allow_list = patterns;
        self.const_cache.get_mut().clear();
    }

    /// Gets the endianness of the program.
    pub fn endian(&self) -> gimli::RunTimeEndian {
        self.endian
    }

    /// Gets the size of a pointer in the program, in bytes.
    pub fn pointer_size(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    /// Returns the number of types in the debug info.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Produces an iterator over all types defined in the debug info, together
    /// with their IDs.
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeEntry)> + '_ {
        self.types.iter().map(|(&id, ty)| (id, ty))
    }

    /// Produces an iterator over constants defined at namespace scope.
    pub fn globals(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.globals.iter().map(|(n, &v)| (n.as_str(), v))
    }

    /// Looks up the type with the given ID, seeing through typedefs and
    /// qualifiers.
    pub fn type_by_id(&self, id: TypeId) -> Option<&TypeEntry> {
        self.types.get(&self.resolve_alias(id))
    }

    /// Consults the type-name index and returns an iterator over types with a
    /// given name.
    ///
    /// Names are matched in their entirety, e.g. the name `"Map"` does not
    /// match a type `"v8::internal::Map"`.
    pub fn types_by_name<'d>(
        &'d self,
        name: &str,
    ) -> impl Iterator<Item = (TypeId, &'d TypeEntry)> + 'd {
        self.type_name_index
            .get(name)
            .into_iter()
            .flat_map(move |set| {
                set.iter().filter_map(move |&id| {
                    let id = self.resolve_alias(id);
                    self.types.get(&id).map(|t| (id, t))
                })
            })
    }

    /// Finds the definition of a type by qualified name.
    ///
    /// Both `ns::Type` and `ns.Type` spellings are accepted. Complete
    /// definitions are preferred over forward declarations.
    pub fn find_type(&self, name: &str) -> Result<&TypeEntry, MissingDebugInfo> {
        let name: Cow<'_, str> = if !name.contains("::") && name.contains('.') {
            name.replace('.', "::").into()
        } else {
            name.into()
        };
        let mut fallback = None;
        for (_, t) in self.types_by_name(&name) {
            if !t.declaration {
                return Ok(t);
            }
            fallback.get_or_insert(t);
        }
        fallback.ok_or_else(|| MissingDebugInfo(name.into_owned()))
    }

    /// Shorthand for the byte size of a named type.
    pub fn type_size(&self, name: &str) -> Result<u64, MissingDebugInfo> {
        self.find_type(name)?
            .byte_size
            .ok_or_else(|| MissingDebugInfo(format!("size of {}", name)))
    }

    /// Reads a constant by path.
    ///
    /// `path` is either a bare symbol (`v8::internal::kTaggedSize`, or just
    /// `kTaggedSize` if the unqualified name is unique enough) or a member of a
    /// type, written `'Type'::kName` or `Type::kName`.
    pub fn read_const(&self, path: &str) -> Result<i64, MissingDebugInfo> {
        let missing = || MissingDebugInfo(path.to_string());

        if let Some((ty, member)) = split_quoted_path(path) {
            return self.type_const(ty, member).ok_or_else(missing);
        }

        if let Some(&v) = self.globals.get(path) {
            return Ok(v);
        }
        if let Some((ty, member)) = path.rsplit_once("::") {
            if let Some(v) = self.type_const(ty, member) {
                return Ok(v);
            }
        } else {
            let suffix = format!("::{}", path);
            if let Some((_, &v)) =
                self.globals.iter().find(|(n, _)| n.ends_with(&suffix))
            {
                return Ok(v);
            }
        }
        Err(missing())
    }

    /// Reads a constant together with its `End` companion, if present.
    pub fn read_const_fact(
        &self,
        path: &str,
    ) -> Result<ConstantFact, MissingDebugInfo> {
        let value = self.read_const(path)?;
        let end = self.read_const(&format!("{}End", path)).ok();
        let name = split_quoted_path(path)
            .map(|(_, m)| m)
            .unwrap_or(path)
            .to_string();
        Ok(ConstantFact { name, value, end })
    }

    /// Collects every constant visible on a type.
    ///
    /// With `include_inherited`, constants from base classes are included too,
    /// with nearer definitions shadowing farther ones. Base expansion follows
    /// the same restrictions as `read_const`.
    pub fn read_all_consts(
        &self,
        type_name: &str,
        include_inherited: bool,
    ) -> Result<IndexMap<String, i64>, MissingDebugInfo> {
        let root = self.find_type(type_name)?;
        let mut out = IndexMap::new();
        if include_inherited {
            for t in self.lineage(root) {
                for (n, &v) in &t.constants {
                    out.entry(n.clone()).or_insert(v);
                }
            }
        } else {
            out.extend(root.constants.iter().map(|(n, &v)| (n.clone(), v)));
        }
        Ok(out)
    }

    /// Lists the enumerators of an enumeration type, in declaration order.
    pub fn enum_members(
        &self,
        type_name: &str,
    ) -> Result<Vec<(String, i64)>, MissingDebugInfo> {
        let t = self.find_type(type_name)?;
        if t.kind != TypeKind::Enum {
            return Err(MissingDebugInfo(format!("{} is not an enum", type_name)));
        }
        Ok(t.enumerators
            .iter()
            .map(|e| (e.name.clone(), e.value))
            .collect())
    }

    /// Resolves `member` against `type_name` and its bases, memoized.
    fn type_const(&self, type_name: &str, member: &str) -> Option<i64> {
        let key = (type_name.to_string(), member.to_string());
        if let Some(&v) = self.const_cache.borrow().get(&key) {
            return v;
        }

        let v = self.find_type(type_name).ok().and_then(|root| {
            self.lineage(root).into_iter().find_map(|t| t.own_const(member))
        });

        let mut cache = self.const_cache.borrow_mut();
        let prev = cache.insert(key, v);
        debug_assert!(
            prev.map_or(true, |p| p == v),
            "constant resolution is not idempotent for {}::{}",
            type_name,
            member,
        );
        v
    }

    /// Produces `root` followed by its bases, depth-first in declaration
    /// order, visiting each base at most once.
    ///
    /// Bases are only expanded when their name overlaps the name of the class
    /// deriving from them, or when they match the allow-list. Deep
    /// hierarchies of unrelated mixins are not followed.
    fn lineage<'d>(&'d self, root: &'d TypeEntry) -> Vec<&'d TypeEntry> {
        let mut out = vec![];
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(t) = stack.pop() {
            if !seen.insert(t.offset) {
                continue;
            }
            out.push(t);
            // Reverse so that the first declared base is expanded first.
            for b in t.bases.iter().rev() {
                if let Some(bt) = self.type_by_id(b.type_id) {
                    if self.should_expand(t, bt) {
                        stack.push(bt);
                    } else {
                        tracing::trace!(
                            derived = %t.name,
                            base = %bt.name,
                            "not following base",
                        );
                    }
                }
            }
        }
        out
    }

    fn should_expand(&self, derived: &TypeEntry, base: &TypeEntry) -> bool {
        let d = derived.short_name();
        let b = base.short_name();
        if d.contains(b) || base.name.contains(d) {
            return true;
        }
        self.base_allow_list.iter().any(|re| re.is_match(b))
    }

    fn resolve_alias(&self, mut id: TypeId) -> TypeId {
        // Alias chains are acyclic; `ImageBuilder::build` checks.
        while let Some(&next) = self.aliases.get(&id) {
            id = next;
        }
        id
    }
}

/// Splits `'Type'::member` into its parts.
fn split_quoted_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('\'')?;
    let (ty, member) = rest.split_once("'::")?;
    Some((ty, member))
}

/// Builder that accumulates the type information from a program and produces a
/// `DebugInfoImage`.
///
/// This is primarily intended as a write-only sink for type information. After
/// everything is stuffed in, `build()` will validate the information, generate
/// indices, and produce the image.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    endian: gimli::RunTimeEndian,
    is_64: bool,
    types: BTreeMap<TypeId, TypeEntry>,
    aliases: BTreeMap<TypeId, TypeId>,
    alias_names: Vec<(String, TypeId)>,
    globals: IndexMap<String, i64>,
    /// Out-of-line definitions of static members: declaration location and
    /// value. The declaration tells us which type owns the constant.
    pending_specs: Vec<(TypeId, i64)>,
    /// Member declarations that an out-of-line definition may point at.
    member_decls: BTreeMap<TypeId, (TypeId, String)>,
}

impl ImageBuilder {
    /// Creates a new `ImageBuilder` for information from a program with the
    /// given endianness and pointer width.
    pub fn new(endian: gimli::RunTimeEndian, is_64: bool) -> Self {
        Self {
            endian,
            is_64,
            types: BTreeMap::new(),
            aliases: BTreeMap::new(),
            alias_names: vec![],
            globals: IndexMap::new(),
            pending_specs: vec![],
            member_decls: BTreeMap::new(),
        }
    }

    pub fn pointer_size(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    pub fn endian(&self) -> gimli::RunTimeEndian {
        self.endian
    }

    pub fn build(mut self) -> Result<DebugInfoImage, ImageError> {
        // Validate that alias chains end somewhere.
        for &start in self.aliases.keys() {
            let mut id = start;
            let mut hops = 0;
            while let Some(&next) = self.aliases.get(&id) {
                id = next;
                hops += 1;
                if hops > self.aliases.len() {
                    return Err(ImageError::Inconsistent(format!(
                        "typedef cycle through {}",
                        start
                    )));
                }
            }
        }

        // Drop base references we can't follow; they'd only fail later.
        let known: BTreeSet<TypeId> = self.types.keys().copied().collect();
        let aliases = &self.aliases;
        for t in self.types.values_mut() {
            t.bases.retain(|b| {
                let mut id = b.type_id;
                while let Some(&next) = aliases.get(&id) {
                    id = next;
                }
                let ok = known.contains(&id);
                if !ok {
                    tracing::warn!(
                        derived = %t.name,
                        base = %b.type_id,
                        "base class not recorded; ignoring",
                    );
                }
                ok
            });
        }

        // Attach out-of-line static member definitions to their owners.
        for (decl, value) in std::mem::take(&mut self.pending_specs) {
            if let Some((owner, name)) = self.member_decls.get(&decl) {
                if let Some(t) = self.types.get_mut(owner) {
                    t.constants.entry(name.clone()).or_insert(value);
                }
            }
        }

        // Build type name index.
        let mut type_name_index =
            index_by_key(&self.types, |_, t| match t.kind {
                TypeKind::Pointer => None,
                _ if t.name.is_empty() => None,
                _ => Some(t.name.clone()),
            });
        for (name, id) in self.alias_names {
            type_name_index.entry(name).or_default().insert(id);
        }

        let base_allow_list = DEFAULT_BASE_ALLOW_LIST
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ImageError::Inconsistent(e.to_string()))?;

        Ok(DebugInfoImage {
            endian: self.endian,
            is_64: self.is_64,
            types: self.types,
            aliases: self.aliases,
            type_name_index,
            globals: self.globals,
            base_allow_list,
            const_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Adds a type to the database.
    ///
    /// It's unusual to call this from outside the library, but it might be
    /// useful if you have additional type information from some outside source.
    pub fn record_type(&mut self, t: TypeEntry) {
        self.types.insert(t.offset, t);
    }

    /// Gets a recorded type for amendment while its children are parsed.
    pub fn type_mut(&mut self, id: TypeId) -> Option<&mut TypeEntry> {
        self.types.get_mut(&id)
    }

    /// Records a transparent wrapper (typedef or qualifier) at `id` around
    /// `target`. Named wrappers become findable by that name.
    pub fn record_alias(&mut self, id: TypeId, target: TypeId, name: Option<String>) {
        self.aliases.insert(id, target);
        if let Some(name) = name {
            self.alias_names.push((name, id));
        }
    }

    /// Records a namespace-scope constant. The first definition wins.
    pub fn record_global(&mut self, name: String, value: i64) {
        self.globals.entry(name).or_insert(value);
    }

    pub(crate) fn record_member_decl(&mut self, decl: TypeId, owner: TypeId, name: String) {
        self.member_decls.insert(decl, (owner, name));
    }

    pub(crate) fn record_specification(&mut self, decl: TypeId, value: i64) {
        self.pending_specs.push((decl, value));
    }
}

/// Utility for indexing entries in a key-value table by some projection.
///
/// `table` is a sequence of keys and values in arbitrary order.
///
/// `project` takes a key-value pair and produces some datum to be indexed.
///
/// The result is a mapping from the data produced by `project` to keys in
/// `table`.
fn index_by_key<'t, K: 't, V: 't, T>(
    table: impl IntoIterator<Item = (&'t K, &'t V)>,
    mut project: impl FnMut(&K, &V) -> Option<T>,
) -> BTreeMap<T, BTreeSet<K>>
where
    T: Ord,
    K: Ord + Clone,
{
    let mut index: BTreeMap<T, BTreeSet<K>> = BTreeMap::new();

    for (k, v) in table {
        if let Some(i) = project(k, v) {
            index.entry(i).or_default().insert(k.clone());
        }
    }

    index
}

/// Parses type information from an `object::File`.
pub fn parse_file(object: &object::File<'_>) -> Result<DebugInfoImage, ImageError> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let mut sections: HashMap<gimli::SectionId, Cow<'_, [u8]>> = HashMap::new();
    for id in [
        gimli::SectionId::DebugInfo,
        gimli::SectionId::DebugAbbrev,
        gimli::SectionId::DebugStr,
        gimli::SectionId::DebugStrOffsets,
        gimli::SectionId::DebugLineStr,
    ] {
        if let Some(section) = object.section_by_name(id.name()) {
            sections.insert(id, section.uncompressed_data()?);
        }
    }

    DebugInfoImage::from_sections(endian, object.is_64(), |id| {
        sections.get(&id).map(|c| &**c).unwrap_or(&[])
    })
}


#[cfg(test)]
mod test {
    use super::test_dwarf::*;
    use super::*;

    #[test]
    fn find_types_by_either_spelling() {
        let img = sample_image();
        assert_eq!(img.find_type("v8::internal::Map").unwrap().byte_size, Some(80));
        assert_eq!(img.find_type("v8.internal.Map").unwrap().byte_size, Some(80));
        assert!(img.find_type("v8::internal::Nope").is_err());
        assert_eq!(img.type_size("v8::internal::Pair").unwrap(), 4);
    }

    #[test]
    fn read_const_paths() {
        let img = sample_image();
        assert_eq!(img.read_const("v8::internal::kTaggedSize"), Ok(8));
        assert_eq!(img.read_const("kTaggedSize"), Ok(8));
        assert_eq!(
            img.read_const("'v8::internal::Map'::kInstanceTypeOffset"),
            Ok(12),
        );
        assert_eq!(img.read_const("v8::internal::Map::kInstanceTypeOffset"), Ok(12));
        assert!(img.read_const("'v8::internal::Map'::kBogus").is_err());
        // Plain data members answer with their offset.
        assert_eq!(img.read_const("'v8::internal::TwoFields'::b"), Ok(2));
    }

    #[test]
    fn resolution_is_idempotent() {
        let img = sample_image();
        let a = img.read_const("'v8::internal::FixedArray'::kLengthOffset");
        let b = img.read_const("'v8::internal::FixedArray'::kLengthOffset");
        assert_eq!(a, Ok(8));
        assert_eq!(a, b);
        let missing_a = img.read_const("'v8::internal::FixedArray'::kNope");
        let missing_b = img.read_const("'v8::internal::FixedArray'::kNope");
        assert_eq!(missing_a, missing_b);
    }

    #[test]
    fn const_fact_carries_end() {
        let img = sample_image();
        let f = img
            .read_const_fact("'v8::internal::Map'::kInstanceTypeOffset")
            .unwrap();
        assert_eq!(f.name, "kInstanceTypeOffset");
        assert_eq!(f.value, 12);
        assert_eq!(f.end, Some(13));
        assert_eq!(f.span(), Some(2));
    }

    #[test]
    fn inherited_consts_follow_related_bases_only() {
        let img = sample_image();
        let own = img.read_all_consts("v8::internal::FixedArray", false).unwrap();
        assert_eq!(own.len(), 1);

        let all = img.read_all_consts("v8::internal::FixedArray", true).unwrap();
        assert_eq!(all.get("kLengthOffset"), Some(&8));
        // Nearest definition wins.
        assert_eq!(all.get("kHeaderSize"), Some(&16));
        assert_eq!(all.get("kMapOffset"), Some(&0));
        assert_eq!(all.get("kUnrelated"), None);

        let nd = img.read_all_consts("v8::internal::NameDictionary", true).unwrap();
        assert_eq!(nd.get("kCapacityIndex"), Some(&2));
        assert_eq!(nd.get("kLengthOffset"), Some(&8));
    }

    #[test]
    fn enum_members_in_order() {
        let img = sample_image();
        let members = img.enum_members("v8::internal::InstanceType").unwrap();
        assert_eq!(members[0], ("INTERNALIZED_TWO_BYTE_STRING_TYPE".to_string(), 0));
        assert!(members.contains(&("MAP_TYPE".to_string(), 140)));
        assert!(img.enum_members("v8::internal::Map").is_err());
        // Scoped enumerators don't leak into the namespace.
        assert!(img.read_const("v8::internal::MAP_TYPE").is_err());
    }

    #[test]
    fn anonymous_enum_constants_land_on_class() {
        let img = sample_image();
        assert_eq!(img.read_const("'v8::internal::Oddball'::kKindOffset"), Ok(40));
        // And inherited ones are visible through the class too.
        assert_eq!(img.read_const("'v8::internal::Oddball'::kMapOffset"), Ok(0));
    }

    #[test]
    fn missing_sections_are_reported() {
        let r = DebugInfoImage::from_sections(
            gimli::RunTimeEndian::Little,
            true,
            |_| &[],
        );
        assert!(matches!(r, Err(ImageError::MissingSection(".debug_info"))));
    }

    #[test]
    fn parse_from_elf_container() {
        use object::write::Object as ObjectWriter;

        let sections = Fixture::new_with_sample_class().sections();
        let mut obj = ObjectWriter::new(
            object::BinaryFormat::Elf,
            object::Architecture::X86_64,
            object::Endianness::Little,
        );
        for (id, data) in &sections {
            let s = obj.add_section(
                vec![],
                id.name().as_bytes().to_vec(),
                object::SectionKind::Debug,
            );
            obj.append_section_data(s, data, 1);
        }
        let bytes = obj.write().unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let img = parse_file(&file).unwrap();
        assert_eq!(img.pointer_size(), 8);
        assert_eq!(img.read_const("'demo::Thing'::kSize"), Ok(24));
    }

    impl Fixture {
        fn new_with_sample_class() -> Self {
            let mut f = Fixture::new();
            let root = f.root();
            let ns = f.named(root, gimli::DW_TAG_namespace, "demo");
            let c = f.class(ns, "Thing", 24);
            f.static_const(c, "kSize", 24);
            f
        }
    }
}
