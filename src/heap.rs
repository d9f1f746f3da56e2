//! The object model: binding addresses to kinds and decoding them.
//!
//! Every heap object starts with a tagged reference to its descriptor (a
//! `Map`), and the descriptor carries a 16-bit instance type. Binding reads
//! that, looks the instance type up in a range table built once from the
//! catalogue, and hands back an `ObjectHandle`. Everything else here takes a
//! handle and reads through the kind's compiled layout.

use crate::catalog::{BoundKind, Catalog, Shape};
use crate::config::SessionConfig;
use crate::graph::{EdgeName, EdgeType};
use crate::layout::{Instance, LayoutResolver, ResolvedLayout, ScalarType};
use crate::load::{displace, Memory};
use crate::value::{TagScheme, TaggedValue};
use crate::{DebugInfoImage, LayoutError, ObjectError};
use gimli::Endianity;
use rangemap::RangeInclusiveMap;
use std::collections::HashMap;
use std::rc::Rc;

/// Parts of a cons string visited before giving up on it.
const MAX_STRING_PARTS: usize = 4096;

/// What a descriptor says about the objects that point at it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub address: u64,
    pub instance_type: u16,
    /// Size in bytes, or `None` when each instance carries its own length.
    pub instance_size: Option<u64>,
}

/// An address bound to a kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectHandle {
    pub address: u64,
    pub kind: BoundKind,
    pub descriptor: Descriptor,
    /// Index into the model's entries; `None` for opaque objects.
    entry: Option<usize>,
}

/// One outgoing slot of an object.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub edge_type: EdgeType,
    pub name: EdgeName,
    pub value: TaggedValue,
}

impl Reference {
    fn new(edge_type: EdgeType, name: EdgeName, value: TaggedValue) -> Self {
        // Weakness is a property of the slot's contents, not of the field.
        let edge_type = if value.is_weak() {
            EdgeType::Weak
        } else {
            edge_type
        };
        Self {
            edge_type,
            name,
            value,
        }
    }
}

/// Result of a dictionary search.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DictionarySearch {
    pub value: Option<TaggedValue>,
    /// Entries examined.
    pub scanned: u64,
}

struct BoundEntry {
    kind: BoundKind,
    layout: Rc<ResolvedLayout>,
    shape: Shape,
}

/// Sanity bounds on decoded lengths and sizes.
#[derive(Copy, Clone, Debug)]
pub struct Limits {
    pub max_array_length: u64,
    pub max_object_size: u64,
}

pub struct ObjectModel<'a> {
    resolver: LayoutResolver<'a>,
    memory: &'a dyn Memory,
    scheme: TagScheme,
    limits: Limits,
    entries: Vec<BoundEntry>,
    dispatch: RangeInclusiveMap<u16, usize>,
    map_layout: Rc<ResolvedLayout>,
    /// Offset of the descriptor reference in every object.
    map_offset: u64,
}

impl<'a> ObjectModel<'a> {
    /// Compiles every layout in `catalog` and builds the dispatch table.
    ///
    /// Instance-type numbers come from the image's `InstanceType`
    /// enumeration where it has them, and from the catalogue's fallbacks
    /// where it doesn't.
    pub fn new(
        image: &'a DebugInfoImage,
        memory: &'a dyn Memory,
        catalog: &Catalog,
        config: &SessionConfig,
    ) -> Result<Self, LayoutError> {
        let resolver = LayoutResolver::new(image, config.missing_debug_info);
        let scheme = config
            .tag_scheme(image.pointer_size())
            .map_err(|e| LayoutError::Config(e.to_string()))?;

        let enum_name = catalog.instance_type_enum();
        let values: HashMap<String, i64> = match image.enum_members(&enum_name) {
            Ok(members) => members.into_iter().collect(),
            Err(e) => {
                tracing::warn!(%e, "no instance type enumeration; using built-in numbers");
                HashMap::new()
            }
        };
        let number = |name: &str, fallback: u16| -> u16 {
            match values.get(name).map(|&v| u16::try_from(v)) {
                Some(Ok(v)) => v,
                Some(Err(_)) => {
                    tracing::warn!(name, "instance type out of range; using built-in number");
                    fallback
                }
                None => {
                    tracing::debug!(name, fallback, "instance type not in debug info");
                    fallback
                }
            }
        };

        let mut entries = Vec::with_capacity(catalog.kinds.len());
        let mut dispatch = RangeInclusiveMap::new();
        for (i, k) in catalog.kinds.iter().enumerate() {
            let layout = resolver.compile(&k.type_name, &k.fields)?;
            for r in &k.instance_types {
                let first = number(&r.first, r.first_fallback);
                let last = number(&r.last, r.last_fallback);
                if first > last {
                    tracing::warn!(
                        kind = k.kind.name(),
                        first,
                        last,
                        "empty instance type range; ignored",
                    );
                    continue;
                }
                dispatch.insert(first..=last, i);
            }
            entries.push(BoundEntry {
                kind: k.kind,
                layout,
                shape: k.shape.clone(),
            });
        }

        let map_layout = entries
            .iter()
            .find(|e| e.kind == BoundKind::Map)
            .map(|e| e.layout.clone())
            .ok_or_else(|| LayoutError::UnknownField {
                layout: "catalog".to_string(),
                field: BoundKind::Map.name().to_string(),
            })?;
        let map_offset = map_layout.static_offset("map").unwrap_or(0);

        tracing::debug!(
            kinds = entries.len(),
            ranges = dispatch.iter().count(),
            "object model ready",
        );
        Ok(Self {
            resolver,
            memory,
            scheme,
            limits: Limits {
                max_array_length: config.max_array_length,
                max_object_size: config.max_object_size,
            },
            entries,
            dispatch,
            map_layout,
            map_offset,
        })
    }

    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    pub fn memory(&self) -> &'a dyn Memory {
        self.memory
    }

    pub fn resolver(&self) -> &LayoutResolver<'a> {
        &self.resolver
    }

    /// The compiled layout for a kind, if the catalogue has it.
    pub fn layout(&self, kind: BoundKind) -> Option<&ResolvedLayout> {
        self.entries
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| &*e.layout)
    }

    pub fn classify(&self, word: u64) -> TaggedValue {
        self.scheme.classify(word)
    }

    /// The kind an instance type dispatches to.
    pub fn kind_for(&self, instance_type: u16) -> BoundKind {
        self.dispatch
            .get(&instance_type)
            .map(|&i| self.entries[i].kind)
            .unwrap_or(BoundKind::Opaque)
    }

    fn instance(&self, base: u64) -> Instance<'a> {
        Instance::new(self.memory, base, self.scheme)
    }

    fn read_tagged_word(&self, addr: u64) -> Result<TaggedValue, ObjectError> {
        let word = self.memory.read_word(addr, self.scheme.word_size, false)?;
        Ok(self.scheme.classify(word))
    }

    /// Reads the descriptor at `addr`.
    pub fn descriptor(&self, addr: u64) -> Result<Descriptor, ObjectError> {
        let inst = self.instance(addr);
        let l = &self.map_layout;
        let instance_type = l.read_int("instance_type", inst).map_err(|e| e.at(addr))?;
        let words = l
            .read_int("instance_size_in_words", inst)
            .map_err(|e| e.at(addr))?;
        let instance_type = u16::try_from(instance_type).map_err(|_| ObjectError::CorruptObject {
            addr,
            reason: format!("instance type {} out of range", instance_type),
        })?;
        let instance_size = match words {
            0 => None,
            w => Some(w as u64 * self.scheme.word_size),
        };
        Ok(Descriptor {
            address: addr,
            instance_type,
            instance_size,
        })
    }

    /// Binds the object at `addr` to a kind.
    ///
    /// Instance types the catalogue doesn't claim bind as `Opaque`; that is
    /// not an error.
    pub fn bind(&self, addr: u64) -> Result<ObjectHandle, ObjectError> {
        let map = match self.read_tagged_word(displace(addr, self.map_offset)?)? {
            TaggedValue::StrongRef(a) => a,
            other => {
                return Err(ObjectError::CorruptObject {
                    addr,
                    reason: format!("descriptor slot holds {:?}", other),
                })
            }
        };
        let descriptor = self.descriptor(map)?;
        let entry = self.dispatch.get(&descriptor.instance_type).copied();
        let kind = entry.map_or(BoundKind::Opaque, |i| self.entries[i].kind);
        tracing::trace!(
            addr,
            instance_type = descriptor.instance_type,
            kind = kind.name(),
            "bound",
        );
        Ok(ObjectHandle {
            address: addr,
            kind,
            descriptor,
            entry,
        })
    }

    fn entry_for(&self, h: &ObjectHandle, kind: BoundKind) -> Result<&BoundEntry, ObjectError> {
        match h.entry {
            Some(i) if self.entries[i].kind == kind => Ok(&self.entries[i]),
            _ => Err(ObjectError::CorruptObject {
                addr: h.address,
                reason: format!("expected {}, bound as {}", kind.name(), h.kind.name()),
            }),
        }
    }

    fn check_length(&self, addr: u64, length: u64) -> Result<u64, ObjectError> {
        if length > self.limits.max_array_length {
            return Err(ObjectError::CorruptObject {
                addr,
                reason: format!("implausible length {}", length),
            });
        }
        Ok(length)
    }

    /// Size of the object in bytes.
    pub fn size(&self, h: &ObjectHandle) -> Result<u64, ObjectError> {
        let size = match (h.descriptor.instance_size, h.entry) {
            (Some(s), _) => s,
            (None, None) => {
                return Err(ObjectError::UnknownInstanceType {
                    addr: h.address,
                    instance_type: h.descriptor.instance_type,
                })
            }
            (None, Some(i)) => {
                let e = &self.entries[i];
                let Shape::Sequence { length, .. } = &e.shape else {
                    return Err(ObjectError::CorruptObject {
                        addr: h.address,
                        reason: format!("{} with a variable-size descriptor", e.kind.name()),
                    });
                };
                let n = e
                    .layout
                    .read_int(length, self.instance(h.address))
                    .map_err(|err| err.at(h.address))?;
                let n = u64::try_from(n).map_err(|_| ObjectError::CorruptObject {
                    addr: h.address,
                    reason: format!("negative length {}", n),
                })?;
                let n = self.check_length(h.address, n)?;
                self.entry_size_for(e, n).ok_or_else(|| ObjectError::CorruptObject {
                    addr: h.address,
                    reason: format!("size overflows for length {}", n),
                })?
            }
        };
        if size > self.limits.max_object_size {
            return Err(ObjectError::CorruptObject {
                addr: h.address,
                reason: format!("implausible size {}", size),
            });
        }
        Ok(size)
    }

    /// Size of a `kind` object with `length` elements, for sequence kinds.
    pub fn size_for(&self, kind: BoundKind, length: u64) -> Option<u64> {
        let e = self.entries.iter().find(|e| e.kind == kind)?;
        self.entry_size_for(e, length)
    }

    fn entry_size_for(&self, e: &BoundEntry, length: u64) -> Option<u64> {
        let Shape::Sequence {
            elements,
            element,
            align,
            ..
        } = &e.shape
        else {
            return None;
        };
        let header = e.layout.static_offset(elements)?;
        let raw = length
            .checked_mul(element.size(self.scheme.word_size))?
            .checked_add(header)?;
        if *align {
            let w = self.scheme.word_size;
            raw.checked_add(w - 1).map(|n| n / w * w)
        } else {
            Some(raw)
        }
    }

    /// Up to `max` raw bytes from the start of the object.
    pub fn raw_bytes(&self, h: &ObjectHandle, max: u64) -> Result<Vec<u8>, ObjectError> {
        let len = self
            .size(h)
            .unwrap_or(self.scheme.word_size)
            .min(max);
        self.memory.read_vec(h.address, len)
    }

    /// Every slot of the object that holds a heap reference.
    ///
    /// Immediates and cleared weak references are left out.
    pub fn references(&self, h: &ObjectHandle) -> Result<Vec<Reference>, ObjectError> {
        let Some(i) = h.entry else {
            let map = self.read_tagged_word(displace(h.address, self.map_offset)?)?;
            return Ok(vec![Reference::new(
                EdgeType::Internal,
                EdgeName::Name("map".to_string()),
                map,
            )]);
        };
        let e = &self.entries[i];
        let inst = self.instance(h.address);
        let at = |err: LayoutError| err.at(h.address);

        let mut out = vec![];
        for f in e.layout.fields().filter(|f| f.is_tagged()) {
            if !f.is_array() {
                let v = e.layout.read_tagged(&f.name, inst).map_err(at)?;
                out.push(Reference::new(
                    EdgeType::Internal,
                    EdgeName::Name(f.name.clone()),
                    v,
                ));
            } else if e.kind == BoundKind::NameDictionary {
                self.dictionary_references(h, e, &mut out)?;
            } else {
                let n = e.layout.array_length(&f.name, inst).map_err(at)?;
                self.check_length(h.address, n)?;
                for idx in 0..n {
                    let v = e
                        .layout
                        .read_tagged_element(&f.name, idx, inst)
                        .map_err(at)?;
                    out.push(Reference::new(EdgeType::Element, EdgeName::Index(idx), v));
                }
            }
        }

        if e.kind == BoundKind::JsObject {
            // In-object properties fill the space between the header and the
            // instance size.
            let header = e.layout.end(inst).map_err(at)?;
            let size = h.descriptor.instance_size.unwrap_or(header);
            let w = self.scheme.word_size;
            let mut off = header;
            let mut slot = 0;
            while off + w <= size {
                let v = self.read_tagged_word(displace(h.address, off)?)?;
                out.push(Reference::new(EdgeType::Hidden, EdgeName::Index(slot), v));
                off += w;
                slot += 1;
            }
        }

        out.retain(|r| r.value.address().is_some());
        Ok(out)
    }

    /// Start index, entry size and capacity of a dictionary, checked against
    /// its backing store.
    fn dictionary_geometry(&self, h: &ObjectHandle, e: &BoundEntry) -> Result<(u64, u64, u64), ObjectError> {
        let inst = self.instance(h.address);
        let at = |err: LayoutError| err.at(h.address);
        let corrupt = |reason: String| ObjectError::CorruptObject {
            addr: h.address,
            reason,
        };

        let start = e.layout.const_value("elements_start_index").map_err(at)?;
        let entry_size = e.layout.const_value("entry_size").map_err(at)?;
        let capacity = e.layout.read_int("capacity", inst).map_err(at)?;
        let (Ok(start), Ok(entry_size), Ok(capacity)) = (
            u64::try_from(start),
            u64::try_from(entry_size),
            u64::try_from(capacity),
        ) else {
            return Err(corrupt(format!(
                "bad geometry: start {}, entry size {}, capacity {}",
                start, entry_size, capacity
            )));
        };
        if entry_size < 2 {
            return Err(corrupt(format!("entry size {}", entry_size)));
        }
        let capacity = self.check_length(h.address, capacity)?;

        let length = e.layout.array_length("objects", inst).map_err(at)?;
        let needed = capacity
            .checked_mul(entry_size)
            .and_then(|n| n.checked_add(start));
        if needed.map_or(true, |n| n > length) {
            return Err(corrupt(format!(
                "capacity {} exceeds backing store of {}",
                capacity, length
            )));
        }
        Ok((start, entry_size, capacity))
    }

    fn dictionary_references(
        &self,
        h: &ObjectHandle,
        e: &BoundEntry,
        out: &mut Vec<Reference>,
    ) -> Result<(), ObjectError> {
        let (start, entry_size, capacity) = self.dictionary_geometry(h, e)?;
        let inst = self.instance(h.address);
        let at = |err: LayoutError| err.at(h.address);
        for i in 0..capacity {
            let slot = start + i * entry_size;
            let key = e.layout.read_tagged_element("objects", slot, inst).map_err(at)?;
            let value = e
                .layout
                .read_tagged_element("objects", slot + 1, inst)
                .map_err(at)?;
            let name = match self.key_string(key, usize::MAX) {
                Some(s) => EdgeName::Name(s),
                None => EdgeName::Index(slot + 1),
            };
            let edge_type = match name {
                EdgeName::Name(_) => EdgeType::Property,
                EdgeName::Index(_) => EdgeType::Element,
            };
            out.push(Reference::new(EdgeType::Hidden, EdgeName::Index(slot), key));
            out.push(Reference::new(edge_type, name, value));
        }
        Ok(())
    }

    /// The contents of a dictionary key, if it is a readable string.
    fn key_string(&self, key: TaggedValue, limit: usize) -> Option<String> {
        let TaggedValue::StrongRef(a) = key else {
            return None;
        };
        let h = self.bind(a).ok()?;
        if !h.kind.is_string() {
            return None;
        }
        match self.string_value(&h, limit) {
            Ok(s) => Some(s),
            Err(err) => {
                tracing::debug!(%err, "unreadable dictionary key");
                None
            }
        }
    }

    /// Looks `key` up in a name dictionary by scanning every entry.
    ///
    /// Reaching the end of the table without a match is a normal "not found".
    pub fn dictionary_search(
        &self,
        h: &ObjectHandle,
        key: &str,
    ) -> Result<DictionarySearch, ObjectError> {
        let e = self.entry_for(h, BoundKind::NameDictionary)?;
        let (start, entry_size, capacity) = self.dictionary_geometry(h, e)?;
        let inst = self.instance(h.address);
        let at = |err: LayoutError| err.at(h.address);

        for i in 0..capacity {
            let slot = start + i * entry_size;
            let k = e.layout.read_tagged_element("objects", slot, inst).map_err(at)?;
            // One extra character tells a prefix from an exact match.
            if self.key_string(k, key.len() + 1).as_deref() == Some(key) {
                let value = e
                    .layout
                    .read_tagged_element("objects", slot + 1, inst)
                    .map_err(at)?;
                return Ok(DictionarySearch {
                    value: Some(value),
                    scanned: i + 1,
                });
            }
        }
        tracing::debug!(addr = h.address, key, capacity, "key not in dictionary");
        Ok(DictionarySearch {
            value: None,
            scanned: capacity,
        })
    }

    /// Decodes a string, flattening cons strings, up to `limit` bytes of
    /// output.
    pub fn string_value(&self, h: &ObjectHandle, limit: usize) -> Result<String, ObjectError> {
        let mut out = String::new();
        let mut pending = vec![*h];
        let mut parts = 0;

        while let Some(s) = pending.pop() {
            if out.len() >= limit {
                break;
            }
            parts += 1;
            if parts > MAX_STRING_PARTS {
                return Err(ObjectError::CorruptObject {
                    addr: h.address,
                    reason: "cons string too deep".to_string(),
                });
            }

            let inst = self.instance(s.address);
            let at = |err: LayoutError| err.at(s.address);
            match s.kind {
                BoundKind::SeqOneByteString | BoundKind::SeqTwoByteString => {
                    let e = self.entry_for(&s, s.kind)?;
                    let len = e.layout.array_length("chars", inst).map_err(at)?;
                    let len = self.check_length(s.address, len)?;
                    let room = (limit - out.len()) as u64;
                    let off = e.layout.offset_of("chars", inst).map_err(at)?;
                    if s.kind == BoundKind::SeqOneByteString {
                        let bytes = self.memory.read_vec(displace(s.address, off)?, len.min(room))?;
                        out.extend(bytes.iter().map(|&b| char::from(b)));
                    } else {
                        let bytes = self.memory.read_vec(displace(s.address, off)?, len.min(room) * 2)?;
                        let endian = self.memory.endian();
                        let units = bytes.chunks_exact(2).map(|c| endian.read_u16(c));
                        out.extend(
                            char::decode_utf16(units)
                                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)),
                        );
                    }
                }
                BoundKind::ConsString => {
                    let e = self.entry_for(&s, BoundKind::ConsString)?;
                    let part = |name: &str| -> Result<ObjectHandle, ObjectError> {
                        let v = e.layout.read_tagged(name, inst).map_err(at)?;
                        let addr = match v {
                            TaggedValue::StrongRef(a) => a,
                            other => {
                                return Err(ObjectError::CorruptObject {
                                    addr: s.address,
                                    reason: format!("{} of cons string is {:?}", name, other),
                                })
                            }
                        };
                        self.bind(addr)
                    };
                    let first = part("first")?;
                    let second = part("second")?;
                    pending.push(second);
                    pending.push(first);
                }
                other => {
                    return Err(ObjectError::CorruptObject {
                        addr: s.address,
                        reason: format!("{} is not a string", other.name()),
                    })
                }
            }
        }

        if out.len() > limit {
            let mut cut = limit;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
        }
        Ok(out)
    }

    pub fn heap_number_value(&self, h: &ObjectHandle) -> Result<f64, ObjectError> {
        let e = self.entry_for(h, BoundKind::HeapNumber)?;
        e.layout
            .read_f64("value", self.instance(h.address))
            .map_err(|err| err.at(h.address))
    }

    /// Element size of a sequence kind, for display.
    pub fn element_type(&self, kind: BoundKind) -> Option<ScalarType> {
        self.entries.iter().find(|e| e.kind == kind).and_then(|e| match e.shape {
            Shape::Sequence { element, .. } => Some(element),
            Shape::Fixed => None,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_heap {
    //! A hand-built heap over the sample debug info.

    use crate::load::FlatImage;
    use crate::value::{TagScheme, TaggedValue};

    pub const META_MAP: u64 = 0x1_0000;
    pub const FIXED_ARRAY_MAP: u64 = 0x1_0100;
    pub const ONE_BYTE_MAP: u64 = 0x1_0200;
    pub const TWO_BYTE_MAP: u64 = 0x1_0300;
    pub const CONS_MAP: u64 = 0x1_0400;
    pub const HEAP_NUMBER_MAP: u64 = 0x1_0500;
    pub const ODDBALL_MAP: u64 = 0x1_0600;
    pub const JS_OBJECT_MAP: u64 = 0x1_0700;
    pub const DICTIONARY_MAP: u64 = 0x1_0800;
    pub const BYTE_ARRAY_MAP: u64 = 0x1_0900;
    pub const OPAQUE_MAP: u64 = 0x1_0a00;
    pub const OPAQUE_VAR_MAP: u64 = 0x1_0b00;

    pub fn smi(v: i64) -> u64 {
        TagScheme::for_word_size(8).encode(TaggedValue::Immediate(v))
    }

    pub fn strong(a: u64) -> u64 {
        a | 1
    }

    pub fn weak(a: u64) -> u64 {
        a | 3
    }

    pub struct TestHeap {
        pub mem: FlatImage,
    }

    impl TestHeap {
        /// A heap holding the descriptors above and nothing else.
        pub fn new() -> Self {
            let mut h = Self {
                mem: FlatImage::new(gimli::RunTimeEndian::Little),
            };
            for (addr, instance_type, words) in [
                (META_MAP, 140u16, 10u8),
                (FIXED_ARRAY_MAP, 160, 0),
                (ONE_BYTE_MAP, 40, 0),
                (TWO_BYTE_MAP, 32, 0),
                (CONS_MAP, 41, 4),
                (HEAP_NUMBER_MAP, 130, 2),
                (ODDBALL_MAP, 131, 6),
                (JS_OBJECT_MAP, 1057, 5),
                (DICTIONARY_MAP, 165, 0),
                (BYTE_ARRAY_MAP, 150, 0),
                (OPAQUE_MAP, 999, 3),
                (OPAQUE_VAR_MAP, 998, 0),
            ] {
                h.map(addr, instance_type, words);
            }
            h
        }

        pub fn map(&mut self, addr: u64, instance_type: u16, size_in_words: u8) {
            let mut b = vec![0u8; 80];
            b[..8].copy_from_slice(&strong(META_MAP).to_le_bytes());
            b[8] = size_in_words;
            b[12..14].copy_from_slice(&instance_type.to_le_bytes());
            self.mem.add_region(addr, b);
        }

        pub fn words(&mut self, addr: u64, words: &[u64]) {
            self.mem
                .add_region(addr, words.iter().flat_map(|w| w.to_le_bytes()).collect());
        }

        pub fn fixed_array(&mut self, addr: u64, elements: &[u64]) {
            let mut w = vec![strong(FIXED_ARRAY_MAP), smi(elements.len() as i64)];
            w.extend_from_slice(elements);
            self.words(addr, &w);
        }

        pub fn one_byte_string(&mut self, addr: u64, text: &str) {
            let mut b = vec![];
            b.extend_from_slice(&strong(ONE_BYTE_MAP).to_le_bytes());
            b.extend_from_slice(&0u32.to_le_bytes());
            b.extend_from_slice(&(text.len() as i32).to_le_bytes());
            b.extend(text.bytes());
            while b.len() % 8 != 0 {
                b.push(0);
            }
            self.mem.add_region(addr, b);
        }

        pub fn two_byte_string(&mut self, addr: u64, text: &str) {
            let units: Vec<u16> = text.encode_utf16().collect();
            let mut b = vec![];
            b.extend_from_slice(&strong(TWO_BYTE_MAP).to_le_bytes());
            b.extend_from_slice(&0u32.to_le_bytes());
            b.extend_from_slice(&(units.len() as i32).to_le_bytes());
            b.extend(units.iter().flat_map(|u| u.to_le_bytes()));
            while b.len() % 8 != 0 {
                b.push(0);
            }
            self.mem.add_region(addr, b);
        }

        pub fn cons_string(&mut self, addr: u64, length: i32, first: u64, second: u64) {
            let mut b = vec![];
            b.extend_from_slice(&strong(CONS_MAP).to_le_bytes());
            b.extend_from_slice(&0u32.to_le_bytes());
            b.extend_from_slice(&length.to_le_bytes());
            b.extend_from_slice(&strong(first).to_le_bytes());
            b.extend_from_slice(&strong(second).to_le_bytes());
            self.mem.add_region(addr, b);
        }

        pub fn heap_number(&mut self, addr: u64, v: f64) {
            self.words(addr, &[strong(HEAP_NUMBER_MAP), v.to_bits()]);
        }

        pub fn oddball(&mut self, addr: u64, to_string: u64) {
            self.words(
                addr,
                &[strong(ODDBALL_MAP), 0, strong(to_string), smi(0), smi(0), smi(5)],
            );
        }

        /// A name dictionary with `capacity` entries; `entries` fills slots
        /// from the front as (key word, value word).
        pub fn dictionary(&mut self, addr: u64, capacity: u64, filler: u64, entries: &[(u64, u64)]) {
            let slots = 5 + capacity as usize * 3;
            let mut elements = vec![smi(0); slots];
            elements[0] = smi(entries.len() as i64);
            elements[2] = smi(capacity as i64);
            for i in 0..capacity as usize {
                let (k, v) = entries.get(i).copied().unwrap_or((filler, filler));
                elements[5 + i * 3] = k;
                elements[5 + i * 3 + 1] = v;
                elements[5 + i * 3 + 2] = smi(0);
            }
            let mut w = vec![strong(DICTIONARY_MAP), smi(slots as i64)];
            w.extend(elements);
            self.words(addr, &w);
        }
    }
}
