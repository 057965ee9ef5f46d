//! Canonical ABI memory layout and flat type computation.
//!
//! Alignment and element size follow the Canonical ABI: primitives at their
//! natural size, strings and lists as `(ptr, len)` pairs, records packed at
//! natural field alignment, variants as a discriminant followed by a padded
//! payload area sized for the largest case.

use crate::prelude::*;
use crate::types::{FuncType, ValType, VariantType};

/// Flat parameter limit; above it parameters travel through memory
pub const MAX_FLAT_PARAMS: usize = 16;
/// Flat result limit; above it results travel through memory
pub const MAX_FLAT_RESULTS: usize = 1;

/// Size and alignment of a type in linear memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Size in bytes
    pub size: u32,
    /// Alignment requirement in bytes
    pub alignment: u32,
}

impl MemoryLayout {
    /// Create a layout
    pub const fn new(size: u32, alignment: u32) -> Self {
        Self { size, alignment }
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two)
pub const fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Discriminant byte width for a case count
pub const fn discriminant_size(cases: usize) -> u32 {
    if cases <= 256 {
        1
    } else if cases <= 65_536 {
        2
    } else {
        4
    }
}

fn flags_size(labels: usize) -> u32 {
    if labels <= 8 {
        1
    } else if labels <= 16 {
        2
    } else {
        4
    }
}

fn variant_payload_alignment(cases: &[(String, Option<ValType>)]) -> u32 {
    cases
        .iter()
        .filter_map(|(_, t)| t.as_ref().map(ValType::alignment))
        .max()
        .unwrap_or(1)
}

fn variant_payload_size(cases: &[(String, Option<ValType>)]) -> u32 {
    cases
        .iter()
        .filter_map(|(_, t)| t.as_ref().map(ValType::elem_size))
        .max()
        .unwrap_or(0)
}

fn fields_layout<'a>(types: impl Iterator<Item = &'a ValType>) -> MemoryLayout {
    let mut offset = 0;
    let mut alignment = 1;
    for ty in types {
        let layout = ty.layout();
        offset = align_to(offset, layout.alignment) + layout.size;
        alignment = alignment.max(layout.alignment);
    }
    MemoryLayout::new(align_to(offset, alignment), alignment)
}

fn discriminated_layout(disc: u32, payload_size: u32, payload_align: u32) -> MemoryLayout {
    let alignment = disc.max(payload_align);
    let payload_offset = align_to(disc, payload_align);
    MemoryLayout::new(align_to(payload_offset + payload_size, alignment), alignment)
}

impl ValType {
    /// Alignment requirement in linear memory
    pub fn alignment(&self) -> u32 {
        match self {
            ValType::Bool | ValType::S8 | ValType::U8 => 1,
            ValType::S16 | ValType::U16 => 2,
            ValType::S32 | ValType::U32 | ValType::F32 | ValType::Char => 4,
            ValType::S64 | ValType::U64 | ValType::F64 => 8,
            ValType::String | ValType::List(_) | ValType::ByteArray => 4,
            ValType::Record(r) => fields_layout(r.fields.iter().map(|(_, t)| t)).alignment,
            ValType::Tuple(t) => fields_layout(t.types.iter()).alignment,
            ValType::Variant(v) => {
                discriminant_size(v.cases.len()).max(variant_payload_alignment(&v.cases))
            }
            ValType::Enum(e) => discriminant_size(e.cases.len()),
            ValType::Option(inner) => inner.alignment().max(1),
            ValType::Result(r) => {
                let payload = r
                    .ok
                    .as_ref()
                    .map(ValType::alignment)
                    .max(r.err.as_ref().map(ValType::alignment))
                    .unwrap_or(1);
                payload.max(1)
            }
            ValType::Flags(f) => flags_size(f.labels.len()),
            ValType::Own(_) | ValType::Borrow(_) => 4,
        }
    }

    /// Byte footprint in linear memory
    pub fn elem_size(&self) -> u32 {
        match self {
            ValType::Bool | ValType::S8 | ValType::U8 => 1,
            ValType::S16 | ValType::U16 => 2,
            ValType::S32 | ValType::U32 | ValType::F32 | ValType::Char => 4,
            ValType::S64 | ValType::U64 | ValType::F64 => 8,
            ValType::String | ValType::List(_) | ValType::ByteArray => 8,
            ValType::Record(r) => fields_layout(r.fields.iter().map(|(_, t)| t)).size,
            ValType::Tuple(t) => fields_layout(t.types.iter()).size,
            ValType::Variant(v) => discriminated_layout(
                discriminant_size(v.cases.len()),
                variant_payload_size(&v.cases),
                variant_payload_alignment(&v.cases),
            )
            .size,
            ValType::Enum(e) => discriminant_size(e.cases.len()),
            ValType::Option(inner) => {
                discriminated_layout(1, inner.elem_size(), inner.alignment()).size
            }
            ValType::Result(r) => {
                let payload_align = r
                    .ok
                    .as_ref()
                    .map(ValType::alignment)
                    .max(r.err.as_ref().map(ValType::alignment))
                    .unwrap_or(1);
                let payload_size = r
                    .ok
                    .as_ref()
                    .map(ValType::elem_size)
                    .max(r.err.as_ref().map(ValType::elem_size))
                    .unwrap_or(0);
                discriminated_layout(1, payload_size, payload_align).size
            }
            ValType::Flags(f) => flags_size(f.labels.len()),
            ValType::Own(_) | ValType::Borrow(_) => 4,
        }
    }

    /// Combined size and alignment
    pub fn layout(&self) -> MemoryLayout {
        MemoryLayout::new(self.elem_size(), self.alignment())
    }

    /// The flat core-wasm encoding of this type
    pub fn flat_types(&self) -> Vec<CoreValType> {
        match self {
            ValType::Bool
            | ValType::S8
            | ValType::U8
            | ValType::S16
            | ValType::U16
            | ValType::S32
            | ValType::U32
            | ValType::Char => vec![CoreValType::I32],
            ValType::S64 | ValType::U64 => vec![CoreValType::I64],
            ValType::F32 => vec![CoreValType::F32],
            ValType::F64 => vec![CoreValType::F64],
            ValType::String | ValType::List(_) | ValType::ByteArray => {
                vec![CoreValType::I32, CoreValType::I32]
            }
            ValType::Record(r) => r
                .fields
                .iter()
                .flat_map(|(_, t)| t.flat_types())
                .collect(),
            ValType::Tuple(t) => t.types.iter().flat_map(ValType::flat_types).collect(),
            ValType::Variant(v) => variant_flat_types(&v.cases),
            ValType::Enum(_) => vec![CoreValType::I32],
            ValType::Option(inner) => {
                let mut flats = vec![CoreValType::I32];
                flats.extend(inner.flat_types());
                flats
            }
            ValType::Result(r) => {
                let ok: Vec<CoreValType> =
                    r.ok.as_ref().map(ValType::flat_types).unwrap_or_default();
                let err: Vec<CoreValType> =
                    r.err.as_ref().map(ValType::flat_types).unwrap_or_default();
                let mut flats = vec![CoreValType::I32];
                flats.extend(join_flat_lists(&ok, &err));
                flats
            }
            ValType::Flags(_) => vec![CoreValType::I32],
            ValType::Own(_) | ValType::Borrow(_) => vec![CoreValType::I32],
        }
    }

    /// Byte offsets of record or tuple members, in declaration order
    pub fn field_offsets(types: &[ValType]) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(types.len());
        let mut offset = 0;
        for ty in types {
            offset = align_to(offset, ty.alignment());
            offsets.push(offset);
            offset += ty.elem_size();
        }
        offsets
    }
}

/// Join of two flat types occupying the same padded slot
pub fn join_flat(a: CoreValType, b: CoreValType) -> CoreValType {
    if a == b {
        return a;
    }
    match (a, b) {
        (CoreValType::I32, CoreValType::F32) | (CoreValType::F32, CoreValType::I32) => {
            CoreValType::I32
        }
        _ => CoreValType::I64,
    }
}

fn join_flat_lists(a: &[CoreValType], b: &[CoreValType]) -> Vec<CoreValType> {
    let len = a.len().max(b.len());
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(match (a.get(i), b.get(i)) {
            (Some(&x), Some(&y)) => join_flat(x, y),
            (Some(&x), None) | (None, Some(&x)) => x,
            (None, None) => CoreValType::I32,
        });
    }
    out
}

/// Flat types of a variant: `i32` discriminant followed by the join of the
/// case encodings, padded to the longest case
pub fn variant_flat_types(cases: &[(String, Option<ValType>)]) -> Vec<CoreValType> {
    let mut joined: Vec<CoreValType> = Vec::new();
    for (_, payload) in cases {
        if let Some(ty) = payload {
            joined = join_flat_lists(&joined, &ty.flat_types());
        }
    }
    let mut flats = vec![CoreValType::I32];
    flats.extend(joined);
    flats
}

/// The offset of a variant's payload area
pub fn variant_payload_offset(variant: &VariantType) -> u32 {
    align_to(
        discriminant_size(variant.cases.len()),
        variant_payload_alignment(&variant.cases),
    )
}

/// The layout of a sequence of types stored contiguously (a parameter or
/// result tuple)
pub fn values_layout(types: &[ValType]) -> MemoryLayout {
    fields_layout(types.iter())
}

/// The flat core signature of a component function after applying the
/// flat-arity thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSignature {
    /// Core parameter types
    pub params: Vec<CoreValType>,
    /// Core result types
    pub results: Vec<CoreValType>,
    /// Whether parameters travel inline rather than via pointer
    pub params_flat: bool,
    /// Whether results travel inline rather than via return pointer
    pub results_flat: bool,
}

impl FlatSignature {
    /// The core function signature
    pub fn core_type(&self) -> CoreFuncType {
        CoreFuncType { params: self.params.clone(), results: self.results.clone() }
    }
}

/// Compute the flat signature of a component function type.
///
/// Parameters beyond [`MAX_FLAT_PARAMS`] flat words collapse into one `i32`
/// pointer; results beyond [`MAX_FLAT_RESULTS`] append an `i32` return
/// pointer parameter and clear the results.
pub fn flatten_signature(ty: &FuncType) -> FlatSignature {
    let mut params: Vec<CoreValType> = ty
        .params
        .iter()
        .flat_map(|(_, t)| t.flat_types())
        .collect();
    let mut results: Vec<CoreValType> = ty.results.iter().flat_map(ValType::flat_types).collect();
    let mut params_flat = true;
    let mut results_flat = true;
    if params.len() > MAX_FLAT_PARAMS {
        params = vec![CoreValType::I32];
        params_flat = false;
    }
    if results.len() > MAX_FLAT_RESULTS {
        params.push(CoreValType::I32);
        results = Vec::new();
        results_flat = false;
    }
    FlatSignature { params, results, params_flat, results_flat }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlagsType, RecordType, ResultType, TupleType};

    #[test]
    fn primitive_layouts() {
        assert_eq!(ValType::Bool.layout(), MemoryLayout::new(1, 1));
        assert_eq!(ValType::U16.layout(), MemoryLayout::new(2, 2));
        assert_eq!(ValType::Char.layout(), MemoryLayout::new(4, 4));
        assert_eq!(ValType::U64.layout(), MemoryLayout::new(8, 8));
        assert_eq!(ValType::String.layout(), MemoryLayout::new(8, 4));
    }

    #[test]
    fn record_layout_packs_with_padding() {
        let record = RecordType::new(vec![
            ("a".to_string(), ValType::U8),
            ("b".to_string(), ValType::U32),
            ("c".to_string(), ValType::U16),
        ])
        .unwrap();
        let ty = ValType::Record(record);
        // u8 at 0, pad to 4, u32 at 4, u16 at 8, padded to 12
        assert_eq!(ty.layout(), MemoryLayout::new(12, 4));
    }

    #[test]
    fn variant_layout_matches_reference_case() {
        let variant = VariantType::new(vec![
            ("a".to_string(), None),
            ("b".to_string(), Some(ValType::U32)),
            ("c".to_string(), None),
        ])
        .unwrap();
        let ty = ValType::Variant(variant.clone());
        assert_eq!(discriminant_size(variant.cases.len()), 1);
        assert_eq!(variant_payload_offset(&variant), 4);
        assert_eq!(ty.layout(), MemoryLayout::new(8, 4));
    }

    #[test]
    fn discriminant_widths() {
        assert_eq!(discriminant_size(2), 1);
        assert_eq!(discriminant_size(256), 1);
        assert_eq!(discriminant_size(257), 2);
        assert_eq!(discriminant_size(65_536), 2);
        assert_eq!(discriminant_size(65_537), 4);
    }

    #[test]
    fn variant_flats_are_joined_and_padded() {
        let variant = VariantType::new(vec![
            ("a".to_string(), Some(ValType::F32)),
            ("b".to_string(), Some(ValType::U64)),
            ("c".to_string(), None),
        ])
        .unwrap();
        assert_eq!(
            ValType::Variant(variant).flat_types(),
            vec![CoreValType::I32, CoreValType::I64]
        );
        let same_f32 = VariantType::new(vec![
            ("a".to_string(), Some(ValType::F32)),
            ("b".to_string(), Some(ValType::F32)),
        ])
        .unwrap();
        assert_eq!(
            ValType::Variant(same_f32).flat_types(),
            vec![CoreValType::I32, CoreValType::F32]
        );
    }

    #[test]
    fn result_flats_join_i32_and_f32_to_i32() {
        let ty = ValType::Result(
            ResultType::new(Some(ValType::U32), Some(ValType::F32)).unwrap(),
        );
        assert_eq!(ty.flat_types(), vec![CoreValType::I32, CoreValType::I32]);
    }

    #[test]
    fn flags_fit_one_word() {
        let ty = ValType::Flags(
            FlagsType::new((0..20).map(|i| format!("f{i}")).collect()).unwrap(),
        );
        assert_eq!(ty.flat_types(), vec![CoreValType::I32]);
        assert_eq!(ty.layout(), MemoryLayout::new(4, 4));
    }

    #[test]
    fn signature_thresholds() {
        let many: Vec<(String, ValType)> =
            (0..17).map(|i| (format!("p{i}"), ValType::U32)).collect();
        let ty = crate::types::FuncType::new(many, vec![ValType::U32]).unwrap();
        let sig = flatten_signature(&ty);
        assert_eq!(sig.params, vec![CoreValType::I32]);
        assert!(!sig.params_flat);
        assert!(sig.results_flat);

        let ty = crate::types::FuncType::new(
            vec![("p".to_string(), ValType::U32)],
            vec![ValType::String],
        )
        .unwrap();
        let sig = flatten_signature(&ty);
        assert_eq!(sig.params, vec![CoreValType::I32, CoreValType::I32]);
        assert!(sig.results.is_empty());
        assert!(!sig.results_flat);
    }

    #[test]
    fn tuple_offsets() {
        let types = vec![ValType::U8, ValType::U64, ValType::U16];
        assert_eq!(ValType::field_offsets(&types), vec![0, 8, 16]);
        let tuple = TupleType::new(types).unwrap();
        assert_eq!(ValType::Tuple(tuple).layout(), MemoryLayout::new(24, 8));
    }
}
