//! Linear parser for DWARF info (i.e. the part missing from Gimli).
//!
//! This walks each unit's entries front to back with an explicit stack of open
//! scopes instead of recursing, so nesting depth in the input costs heap, not
//! call stack. A null entry closes the innermost scope. The walk is bounded by
//! the unit's declared length.

use crate::{
    BaseRef, Enumerator, ImageBuilder, ImageError, Member, RtSlice, TypeEntry,
    TypeId, TypeKind,
};
use fallible_iterator::FallibleIterator;
use gimli::Reader;

use gimli::constants as gim_con;

/// Something that can contain other entries, as seen from inside it.
#[derive(Debug)]
enum Scope {
    Unit,
    Namespace(String),
    Type { id: TypeId, component: String },
    Enum { id: TypeId, scoped: bool },
    /// Functions, lexical blocks, and anything else whose children we only
    /// want to get past.
    Other,
}

/// The attributes we care about, from any entry.
#[derive(Debug, Default)]
struct DieAttrs {
    name: Option<String>,
    byte_size: Option<u64>,
    declaration: bool,
    enum_class: bool,
    type_ref: Option<TypeId>,
    specification: Option<TypeId>,
    const_value: Option<i64>,
    location: Option<u64>,
    bit_size: Option<u64>,
    data_bit_offset: Option<u64>,
    /// DWARF 2/3 style bit offset, counted from the most significant bit of
    /// the storage unit.
    legacy_bit_offset: Option<u64>,
}

/// Parses every unit in `.debug_info` into `builder`.
pub fn parse_dwarf(
    dwarf: &gimli::Dwarf<RtSlice<'_>>,
    builder: &mut ImageBuilder,
) -> Result<(), ImageError> {
    let headers: Vec<_> = dwarf.units().collect()?;
    tracing::debug!(units = headers.len(), "parsing debug info");
    for header in headers {
        let unit = dwarf.unit(header)?;
        parse_unit(dwarf, &unit, builder)?;
    }
    Ok(())
}

/// Parses one unit's entries into `builder`.
pub fn parse_unit(
    dwarf: &gimli::Dwarf<RtSlice<'_>>,
    unit: &gimli::Unit<RtSlice<'_>>,
    builder: &mut ImageBuilder,
) -> Result<(), ImageError> {
    let mut entries = unit.entries_raw(None)?;
    let mut stack: Vec<Scope> = vec![];
    let mut count = 0usize;

    while !entries.is_empty() {
        let offset = entries.next_offset();
        let Some(abbrev) = entries.read_abbreviation()? else {
            // Trailing padding can produce nulls with nothing open.
            stack.pop();
            continue;
        };
        count += 1;

        let tag = abbrev.tag();
        let scope = if is_interesting(tag) {
            let attrs = read_attrs(dwarf, unit, &mut entries, abbrev.attributes())?;
            let id = offset
                .to_debug_info_offset(&unit.header)
                .map(TypeId)
                .ok_or_else(|| {
                    ImageError::Inconsistent(format!(
                        "entry offset {:#x} outside .debug_info",
                        offset.0
                    ))
                })?;
            handle_entry(tag, id, attrs, &stack, builder)
        } else {
            entries.skip_attributes(abbrev.attributes())?;
            if tag == gim_con::DW_TAG_compile_unit {
                Scope::Unit
            } else {
                Scope::Other
            }
        };

        if abbrev.has_children() {
            stack.push(scope);
        }
    }

    if !stack.is_empty() {
        tracing::warn!(
            open_scopes = stack.len(),
            "unit ended with unterminated scopes",
        );
    }
    tracing::trace!(entries = count, "unit parsed");
    Ok(())
}

fn is_interesting(tag: gimli::DwTag) -> bool {
    matches!(
        tag,
        gim_con::DW_TAG_namespace
            | gim_con::DW_TAG_structure_type
            | gim_con::DW_TAG_class_type
            | gim_con::DW_TAG_union_type
            | gim_con::DW_TAG_enumeration_type
            | gim_con::DW_TAG_enumerator
            | gim_con::DW_TAG_member
            | gim_con::DW_TAG_variable
            | gim_con::DW_TAG_inheritance
            | gim_con::DW_TAG_base_type
            | gim_con::DW_TAG_pointer_type
            | gim_con::DW_TAG_reference_type
            | gim_con::DW_TAG_rvalue_reference_type
            | gim_con::DW_TAG_typedef
            | gim_con::DW_TAG_const_type
            | gim_con::DW_TAG_volatile_type
    )
}

/// Records whatever `tag` describes and returns the scope its children (if
/// any) will live in.
fn handle_entry(
    tag: gimli::DwTag,
    id: TypeId,
    attrs: DieAttrs,
    stack: &[Scope],
    builder: &mut ImageBuilder,
) -> Scope {
    match tag {
        gim_con::DW_TAG_namespace => Scope::Namespace(
            attrs
                .name
                .unwrap_or_else(|| "(anonymous namespace)".to_string()),
        ),

        gim_con::DW_TAG_structure_type
        | gim_con::DW_TAG_class_type
        | gim_con::DW_TAG_union_type => {
            let kind = match tag {
                gim_con::DW_TAG_structure_type => TypeKind::Struct,
                gim_con::DW_TAG_class_type => TypeKind::Class,
                _ => TypeKind::Union,
            };
            let (name, component) = match attrs.name {
                Some(n) => (qualify(stack, &n), n),
                None => (String::new(), "(anonymous)".to_string()),
            };
            let mut t = TypeEntry::new(name, kind, id);
            t.byte_size = attrs.byte_size;
            t.declaration = attrs.declaration;
            builder.record_type(t);
            Scope::Type { id, component }
        }

        gim_con::DW_TAG_enumeration_type => {
            let name = attrs
                .name
                .map(|n| qualify(stack, &n))
                .unwrap_or_default();
            let mut t = TypeEntry::new(name, TypeKind::Enum, id);
            t.byte_size = attrs.byte_size;
            t.declaration = attrs.declaration;
            t.enum_class = attrs.enum_class;
            builder.record_type(t);
            Scope::Enum {
                id,
                scoped: attrs.enum_class,
            }
        }

        gim_con::DW_TAG_enumerator => {
            if let (Some(name), Some(value)) = (attrs.name, attrs.const_value) {
                record_enumerator(stack, builder, name, value);
            }
            Scope::Other
        }

        gim_con::DW_TAG_member | gim_con::DW_TAG_variable => {
            record_member_or_variable(tag, id, attrs, stack, builder);
            Scope::Other
        }

        gim_con::DW_TAG_inheritance => {
            if let (Some(Scope::Type { id: owner, .. }), Some(base)) =
                (stack.last(), attrs.type_ref)
            {
                if let Some(t) = builder.type_mut(*owner) {
                    t.bases.push(BaseRef {
                        type_id: base,
                        location: attrs.location.unwrap_or(0),
                    });
                }
            }
            Scope::Other
        }

        gim_con::DW_TAG_base_type => {
            let mut t = TypeEntry::new(
                attrs.name.unwrap_or_default(),
                TypeKind::Base,
                id,
            );
            t.byte_size = attrs.byte_size;
            builder.record_type(t);
            Scope::Other
        }

        gim_con::DW_TAG_pointer_type
        | gim_con::DW_TAG_reference_type
        | gim_con::DW_TAG_rvalue_reference_type => {
            let mut t = TypeEntry::new(String::new(), TypeKind::Pointer, id);
            t.byte_size = Some(attrs.byte_size.unwrap_or(builder.pointer_size()));
            builder.record_type(t);
            Scope::Other
        }

        gim_con::DW_TAG_typedef
        | gim_con::DW_TAG_const_type
        | gim_con::DW_TAG_volatile_type => {
            if let Some(target) = attrs.type_ref {
                let name = if tag == gim_con::DW_TAG_typedef {
                    attrs.name.map(|n| qualify(stack, &n))
                } else {
                    None
                };
                builder.record_alias(id, target, name);
            }
            Scope::Other
        }

        _ => Scope::Other,
    }
}

fn record_enumerator(
    stack: &[Scope],
    builder: &mut ImageBuilder,
    name: String,
    value: i64,
) {
    let Some((Scope::Enum { id, scoped }, outer)) = stack.split_last() else {
        tracing::trace!(%name, "enumerator outside enumeration");
        return;
    };
    let (id, scoped) = (*id, *scoped);

    if !scoped {
        // Unscoped enumerators are also visible in the enclosing scope.
        match outer.last() {
            Some(Scope::Type { id: owner, .. }) => {
                if let Some(t) = builder.type_mut(*owner) {
                    t.constants.entry(name.clone()).or_insert(value);
                }
            }
            Some(Scope::Namespace(_)) | Some(Scope::Unit) => {
                builder.record_global(qualify(outer, &name), value);
            }
            _ => (),
        }
    }

    if let Some(t) = builder.type_mut(id) {
        t.enumerators.push(Enumerator { name, value });
    }
}

fn record_member_or_variable(
    tag: gimli::DwTag,
    id: TypeId,
    attrs: DieAttrs,
    stack: &[Scope],
    builder: &mut ImageBuilder,
) {
    let little = builder.endian() == gimli::RunTimeEndian::Little;
    match stack.last() {
        Some(Scope::Type { id: owner, .. }) => {
            let owner = *owner;
            let Some(name) = attrs.name else {
                // Anonymous union members and the like.
                return;
            };
            let is_static = attrs.declaration
                || attrs.const_value.is_some()
                || tag == gim_con::DW_TAG_variable;
            if is_static {
                builder.record_member_decl(id, owner, name.clone());
                if let Some(v) = attrs.const_value {
                    if let Some(t) = builder.type_mut(owner) {
                        t.constants.entry(name).or_insert(v);
                    }
                }
                return;
            }

            let bit_offset = attrs.data_bit_offset.or_else(|| {
                // Legacy offsets count from the top of the storage unit; this
                // only translates cleanly on little-endian targets.
                let (bo, bs, size) =
                    (attrs.legacy_bit_offset?, attrs.bit_size?, attrs.byte_size?);
                let base = attrs.location.unwrap_or(0) * 8;
                if little {
                    (base + size * 8).checked_sub(bo + bs)
                } else {
                    None
                }
            });
            let m = Member {
                name: name.clone(),
                type_id: attrs.type_ref,
                location: attrs.location,
                bit_size: attrs.bit_size,
                bit_offset,
            };
            if let Some(t) = builder.type_mut(owner) {
                if t.members.insert(name, m).is_some() {
                    tracing::debug!(ty = %t.name, "duplicate member name");
                }
            }
        }
        Some(Scope::Namespace(_)) | Some(Scope::Unit)
            if tag == gim_con::DW_TAG_variable =>
        {
            let Some(v) = attrs.const_value else {
                return;
            };
            if let Some(decl) = attrs.specification {
                builder.record_specification(decl, v);
            } else if let Some(name) = attrs.name {
                builder.record_global(qualify(stack, &name), v);
            }
        }
        _ => (),
    }
}

/// Joins the names of the enclosing namespaces and types with `name`.
fn qualify(stack: &[Scope], name: &str) -> String {
    let mut q = String::new();
    for s in stack {
        match s {
            Scope::Namespace(n) | Scope::Type { component: n, .. } => {
                q.push_str(n);
                q.push_str("::");
            }
            _ => (),
        }
    }
    q.push_str(name);
    q
}

fn read_attrs(
    dwarf: &gimli::Dwarf<RtSlice<'_>>,
    unit: &gimli::Unit<RtSlice<'_>>,
    entries: &mut gimli::EntriesRaw<'_, '_, RtSlice<'_>>,
    specs: &[gimli::AttributeSpecification],
) -> Result<DieAttrs, ImageError> {
    let mut a = DieAttrs::default();
    for &spec in specs {
        let attr = entries.read_attribute(spec)?;
        match attr.name() {
            gim_con::DW_AT_name => {
                a.name = Some(get_attr_string(dwarf, unit, attr.value())?);
            }
            gim_con::DW_AT_byte_size => {
                a.byte_size = attr.udata_value();
            }
            gim_con::DW_AT_declaration => {
                a.declaration = attr.value() == gimli::AttributeValue::Flag(true);
            }
            gim_con::DW_AT_enum_class => {
                a.enum_class = attr.value() == gimli::AttributeValue::Flag(true);
            }
            gim_con::DW_AT_type => {
                a.type_ref = get_type_ref(unit, attr.value());
            }
            gim_con::DW_AT_specification => {
                a.specification = get_type_ref(unit, attr.value());
            }
            gim_con::DW_AT_const_value => {
                a.const_value = get_const_value(attr.value());
            }
            gim_con::DW_AT_data_member_location => {
                a.location = get_member_location(attr.value());
            }
            gim_con::DW_AT_bit_size => {
                a.bit_size = attr.udata_value();
            }
            gim_con::DW_AT_data_bit_offset => {
                a.data_bit_offset = attr.udata_value();
            }
            gim_con::DW_AT_bit_offset => {
                a.legacy_bit_offset = attr.udata_value();
            }
            _ => (),
        }
    }
    Ok(a)
}

fn get_attr_string(
    dwarf: &gimli::Dwarf<RtSlice<'_>>,
    unit: &gimli::Unit<RtSlice<'_>>,
    attrval: gimli::AttributeValue<RtSlice<'_>>,
) -> Result<String, ImageError> {
    let s = dwarf.attr_string(unit, attrval)?;
    Ok(s.to_string_lossy().into_owned())
}

fn get_type_ref(
    unit: &gimli::Unit<RtSlice<'_>>,
    attrval: gimli::AttributeValue<RtSlice<'_>>,
) -> Option<TypeId> {
    match attrval {
        gimli::AttributeValue::UnitRef(o) => {
            o.to_debug_info_offset(&unit.header).map(TypeId)
        }
        gimli::AttributeValue::DebugInfoRef(o) => Some(TypeId(o)),
        _ => None,
    }
}

/// Fixed-size data forms are taken as unsigned; compilers use `sdata` for
/// negative values.
fn get_const_value(attrval: gimli::AttributeValue<RtSlice<'_>>) -> Option<i64> {
    match attrval {
        gimli::AttributeValue::Sdata(x) => Some(x),
        gimli::AttributeValue::Udata(x) => Some(x as i64),
        gimli::AttributeValue::Data1(x) => Some(i64::from(x)),
        gimli::AttributeValue::Data2(x) => Some(i64::from(x)),
        gimli::AttributeValue::Data4(x) => Some(i64::from(x)),
        gimli::AttributeValue::Data8(x) => Some(x as i64),
        _ => None,
    }
}

/// Member locations are usually plain constants, but older producers emit a
/// one-op expression instead.
fn get_member_location(attrval: gimli::AttributeValue<RtSlice<'_>>) -> Option<u64> {
    match attrval {
        gimli::AttributeValue::Exprloc(expr) => {
            let mut r = expr.0;
            let op = r.read_u8().ok()?;
            if op == gim_con::DW_OP_plus_uconst.0 || op == gim_con::DW_OP_constu.0 {
                r.read_uleb128().ok()
            } else {
                None
            }
        }
        v => v.udata_value(),
    }
}
