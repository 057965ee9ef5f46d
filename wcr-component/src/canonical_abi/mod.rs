//! The Canonical ABI bridge.
//!
//! Lift and lower translate between component values and the flat core-wasm
//! ABI. Every value type supports four operations: `lift_flat`/`lower_flat`
//! over core value words and `load`/`store` over linear memory. Payload
//! memory for strings and lists is obtained through the `realloc` option;
//! handles move through the per-instance lowered-handle tables with the
//! own/borrow discipline of [`crate::resources`].

pub mod layout;
pub mod options;
pub mod string_encoding;

pub use layout::{
    align_to, discriminant_size, flatten_signature, variant_flat_types, FlatSignature,
    MemoryLayout, MAX_FLAT_PARAMS, MAX_FLAT_RESULTS,
};
pub use options::{AdapterDirection, CanonOpts, REALLOC_SENTINEL};
pub use string_encoding::{StringEncoding, UTF16_TAG};

use crate::engine::{CoreFunc, CoreMemory};
use crate::instance::Instance;
use crate::prelude::*;
use crate::resources::{Handle, HandleRep, OwnedHandle};
use crate::types::{RepKind, ResourceType, ValType};
use crate::values::Value;

/// Safety cap on string payloads (4 MiB)
pub const MAX_STRING_BYTES: u32 = 4 * 1024 * 1024;
/// Safety cap on list element counts
pub const MAX_LIST_ELEMENTS: u32 = 1024 * 1024;

/// Reader over the flat words of a call boundary
pub struct FlatReader<'a> {
    words: &'a [CoreValue],
    pos: usize,
}

impl<'a> FlatReader<'a> {
    /// Read from a word slice
    pub fn new(words: &'a [CoreValue]) -> Self {
        Self { words, pos: 0 }
    }

    /// Consume the next word
    pub fn next(&mut self) -> Result<CoreValue> {
        let word = self.words.get(self.pos).copied().ok_or_else(|| {
            Error::validation_error("flat value sequence ended prematurely")
        })?;
        self.pos += 1;
        Ok(word)
    }

    /// Words not yet consumed
    pub fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }
}

/// Context of a single lift/lower pass.
///
/// Carries the option set and the instance whose lowered-handle table is
/// authoritative for this boundary, and records the borrows lent during the
/// pass so they are released exactly once when the pass completes.
pub struct LiftLowerCx<'a> {
    opts: &'a CanonOpts,
    instance: Rc<Instance>,
    lent: Vec<Rc<crate::resources::BorrowedHandle>>,
}

impl<'a> LiftLowerCx<'a> {
    /// Create a context over an option set and boundary instance
    pub fn new(opts: &'a CanonOpts, instance: Rc<Instance>) -> Self {
        Self { opts, instance, lent: Vec::new() }
    }

    /// The boundary instance
    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    /// The option set
    pub fn opts(&self) -> &CanonOpts {
        self.opts
    }

    fn memory(&self) -> Result<Rc<dyn CoreMemory>> {
        Ok(self.opts.memory()?.clone())
    }

    /// Allocate `size` bytes aligned to `align` through the realloc option
    pub fn alloc(&self, size: u32, align: u32) -> Result<u32> {
        let realloc = self.opts.realloc()?;
        let words = realloc.call(&[
            CoreValue::I32(0),
            CoreValue::I32(0),
            CoreValue::I32(align as i32),
            CoreValue::I32(size as i32),
        ])?;
        let ptr = words
            .first()
            .ok_or_else(|| Error::realloc_failed("realloc returned no value"))?
            .as_u32()?;
        if ptr == REALLOC_SENTINEL {
            return Err(Error::realloc_failed(format!(
                "realloc failed to provide {size} bytes"
            )));
        }
        if align > 0 && ptr % align != 0 {
            return Err(Error::alignment_violation(format!(
                "realloc returned pointer {ptr:#x} unaligned for {align}"
            )));
        }
        let end = (ptr as u64) + (size as u64);
        if end > u64::from(self.memory()?.size()) {
            return Err(Error::realloc_failed(format!(
                "realloc returned pointer {ptr:#x} beyond the end of memory"
            )));
        }
        Ok(ptr)
    }

    /// Record a borrow lent during this pass
    pub fn record_lend(&mut self, borrow: Rc<crate::resources::BorrowedHandle>) {
        self.lent.push(borrow);
    }

    /// Release every recorded lend, exactly once
    pub fn release_lent(&mut self) -> Result<()> {
        for borrow in mem::take(&mut self.lent) {
            borrow.drop_handle()?;
        }
        Ok(())
    }
}

impl Drop for LiftLowerCx<'_> {
    fn drop(&mut self) {
        // Backstop for error paths; release_lent drained on success
        for borrow in mem::take(&mut self.lent) {
            let _ = borrow.drop_handle();
        }
    }
}

/// Validate a Unicode scalar value
pub fn check_char(code: u32) -> Result<char> {
    if code >= 0x11_0000 || (0xD800..=0xDFFF).contains(&code) {
        return Err(Error::invalid_char(format!(
            "{code:#x} is not a Unicode scalar value"
        )));
    }
    char::from_u32(code)
        .ok_or_else(|| Error::invalid_char(format!("{code:#x} is not a Unicode scalar value")))
}

fn coerce_flat(value: CoreValue, to: CoreValType) -> Result<CoreValue> {
    if value.core_type() == to {
        return Ok(value);
    }
    match (value, to) {
        (CoreValue::I32(x), CoreValType::I64) => Ok(CoreValue::I64(i64::from(x as u32))),
        (CoreValue::I64(x), CoreValType::I32) => Ok(CoreValue::I32(x as i32)),
        (CoreValue::F32(f), CoreValType::I32) => Ok(CoreValue::I32(f.to_bits() as i32)),
        (CoreValue::I32(x), CoreValType::F32) => Ok(CoreValue::F32(f32::from_bits(x as u32))),
        (CoreValue::F32(f), CoreValType::I64) => Ok(CoreValue::I64(i64::from(f.to_bits()))),
        (CoreValue::I64(x), CoreValType::F32) => Ok(CoreValue::F32(f32::from_bits(x as u32))),
        (CoreValue::F64(f), CoreValType::I64) => Ok(CoreValue::I64(f.to_bits() as i64)),
        (CoreValue::I64(x), CoreValType::F64) => Ok(CoreValue::F64(f64::from_bits(x as u64))),
        (value, to) => Err(Error::type_mismatch(format!(
            "cannot reinterpret {:?} as {to:?}",
            value.core_type()
        ))),
    }
}

fn lift_payload_from_padded(
    cx: &mut LiftLowerCx<'_>,
    buffer: &[CoreValue],
    payload: Option<&ValType>,
) -> Result<Option<Value>> {
    let Some(ty) = payload else {
        return Ok(None);
    };
    let flats = ty.flat_types();
    let mut converted = Vec::with_capacity(flats.len());
    for (i, want) in flats.iter().enumerate() {
        let word = buffer.get(i).copied().ok_or_else(|| {
            Error::validation_error("variant payload words ended prematurely")
        })?;
        converted.push(coerce_flat(word, *want)?);
    }
    let mut reader = FlatReader::new(&converted);
    Ok(Some(ty.lift_flat(cx, &mut reader)?))
}

fn lower_payload_padded(
    cx: &mut LiftLowerCx<'_>,
    payload_ty: Option<&ValType>,
    payload: Option<&Value>,
    joined: &[CoreValType],
    out: &mut Vec<CoreValue>,
) -> Result<()> {
    let mut produced = Vec::new();
    match (payload_ty, payload) {
        (Some(ty), Some(value)) => ty.lower_flat(cx, value, &mut produced)?,
        (None, None) => {}
        _ => {
            return Err(Error::type_mismatch(
                "variant payload does not match its case",
            ));
        }
    }
    for (i, slot) in joined.iter().enumerate() {
        let word = match produced.get(i) {
            Some(word) => coerce_flat(*word, *slot)?,
            None => CoreValue::zero(*slot)?,
        };
        out.push(word);
    }
    Ok(())
}

fn lift_own(cx: &mut LiftLowerCx<'_>, res: &Rc<ResourceType>, idx: u32) -> Result<Value> {
    let handle = cx.instance().read_handle(idx, res)?;
    let Handle::Own(own) = handle else {
        return Err(Error::handle_misuse(format!(
            "handle {idx} is a borrow where an own was expected"
        )));
    };
    own.assert_transferable()?;
    cx.instance().take_handle(idx, res)?;
    Ok(Value::Own(own))
}

fn lower_own(cx: &mut LiftLowerCx<'_>, res: &Rc<ResourceType>, value: &Value) -> Result<u32> {
    let Value::Own(own) = value else {
        return Err(Error::type_mismatch(format!(
            "expected an own handle, got {}",
            value.kind()
        )));
    };
    if !ResourceType::same_identity(own.ty(), res) {
        return Err(Error::handle_misuse(
            "own handle has a different resource type",
        ));
    }
    own.assert_transferable()?;
    cx.instance().lower_handle(Handle::Own(own.clone()))
}

fn borrow_short_circuits(cx: &LiftLowerCx<'_>, res: &Rc<ResourceType>) -> bool {
    res.rep() == RepKind::U32
        && res
            .owner()
            .is_some_and(|owner| Rc::ptr_eq(&owner, cx.instance()))
}

fn lift_borrow(cx: &mut LiftLowerCx<'_>, res: &Rc<ResourceType>, word: u32) -> Result<Value> {
    if borrow_short_circuits(cx, res) {
        // Inside the owning instance the word is the representation itself
        let own = OwnedHandle::new(res.clone(), HandleRep::U32(word))?;
        let borrow = own.lend()?;
        cx.record_lend(borrow.clone());
        return Ok(Value::Borrow(borrow));
    }
    let handle = cx.instance().read_handle(word, res)?;
    let borrow = match handle {
        Handle::Own(own) => own.lend()?,
        Handle::Borrow(parent) => parent.lend()?,
    };
    cx.record_lend(borrow.clone());
    Ok(Value::Borrow(borrow))
}

fn lower_borrow(cx: &mut LiftLowerCx<'_>, res: &Rc<ResourceType>, value: &Value) -> Result<u32> {
    let handle_ty = value.handle_type().ok_or_else(|| {
        Error::type_mismatch(format!("expected a handle, got {}", value.kind()))
    })?;
    if !ResourceType::same_identity(handle_ty, res) {
        return Err(Error::handle_misuse(
            "handle has a different resource type",
        ));
    }
    if borrow_short_circuits(cx, res) {
        return match value {
            Value::Own(own) => own.rep_u32(),
            Value::Borrow(borrow) => borrow.rep_u32(),
            _ => Err(Error::type_mismatch("expected a handle")),
        };
    }
    let handle = match value {
        Value::Borrow(borrow) => Handle::Borrow(borrow.clone()),
        Value::Own(own) => {
            let borrow = own.lend()?;
            cx.record_lend(borrow.clone());
            Handle::Borrow(borrow)
        }
        _ => return Err(Error::type_mismatch("expected a handle")),
    };
    cx.instance().lower_handle(handle)
}

fn lift_string(cx: &mut LiftLowerCx<'_>, ptr: u32, len_field: u32) -> Result<Value> {
    let encoding = cx.opts().encoding;
    if ptr % encoding.ptr_alignment() != 0 {
        return Err(Error::alignment_violation(format!(
            "string pointer {ptr:#x} unaligned for {encoding:?}"
        )));
    }
    let byte_len = string_encoding::encoded_byte_length(encoding, len_field)?;
    if byte_len > MAX_STRING_BYTES {
        return Err(Error::new(
            ErrorCategory::Capacity,
            codes::STRING_TOO_LONG,
            format!("string payload of {byte_len} bytes exceeds the safety cap"),
        ));
    }
    let bytes = cx.memory()?.read(ptr, byte_len)?;
    let text = string_encoding::decode_string(&bytes, encoding, len_field)?;
    Ok(Value::String(text))
}

fn lower_string(cx: &mut LiftLowerCx<'_>, text: &str) -> Result<(u32, u32)> {
    let encoding = cx.opts().encoding;
    let (bytes, len_field) = string_encoding::encode_string(text, encoding)?;
    let ptr = cx.alloc(bytes.len() as u32, encoding.ptr_alignment())?;
    cx.memory()?.write(ptr, &bytes)?;
    Ok((ptr, len_field))
}

fn lift_list(
    cx: &mut LiftLowerCx<'_>,
    ty: &ValType,
    ptr: u32,
    len: u32,
) -> Result<Value> {
    if len > MAX_LIST_ELEMENTS {
        return Err(Error::new(
            ErrorCategory::Capacity,
            codes::LIST_TOO_LONG,
            format!("list of {len} elements exceeds the safety cap"),
        ));
    }
    if let ValType::ByteArray = ty {
        let bytes = cx.memory()?.read(ptr, len)?;
        return Ok(Value::Bytes(bytes));
    }
    let ValType::List(elem) = ty else {
        return Err(Error::type_mismatch("expected a list type"));
    };
    let align = elem.alignment();
    if align > 0 && ptr % align != 0 {
        return Err(Error::alignment_violation(format!(
            "list pointer {ptr:#x} unaligned for {align}"
        )));
    }
    let size = elem.elem_size();
    if u64::from(len) * u64::from(size) > u64::from(u32::MAX) {
        return Err(Error::memory_out_of_bounds("list byte length overflows"));
    }
    let mut items = Vec::with_capacity(len as usize);
    for i in 0..len {
        items.push(elem.load(cx, ptr + i * size)?);
    }
    Ok(Value::List(items))
}

fn lower_list(cx: &mut LiftLowerCx<'_>, ty: &ValType, value: &Value) -> Result<(u32, u32)> {
    match (ty, value) {
        (ValType::ByteArray, Value::Bytes(bytes)) => {
            let ptr = cx.alloc(bytes.len() as u32, 1)?;
            cx.memory()?.write(ptr, bytes)?;
            Ok((ptr, bytes.len() as u32))
        }
        (ValType::List(elem), Value::List(items)) => {
            let size = elem.elem_size();
            let total = u64::from(items.len() as u32) * u64::from(size);
            if total > u64::from(u32::MAX) {
                return Err(Error::memory_out_of_bounds("list byte length overflows"));
            }
            let ptr = cx.alloc(total as u32, elem.alignment())?;
            for (i, item) in items.iter().enumerate() {
                elem.store(cx, ptr + i as u32 * size, item)?;
            }
            Ok((ptr, items.len() as u32))
        }
        // The byte-array fast path also accepts a plain list of u8
        (ValType::ByteArray, Value::List(items)) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::U8(b) => bytes.push(*b),
                    other => {
                        return Err(Error::type_mismatch(format!(
                            "byte-array element is {}",
                            other.kind()
                        )));
                    }
                }
            }
            let ptr = cx.alloc(bytes.len() as u32, 1)?;
            cx.memory()?.write(ptr, &bytes)?;
            Ok((ptr, bytes.len() as u32))
        }
        (ValType::List(elem), Value::Bytes(bytes)) if matches!(**elem, ValType::U8) => {
            let ptr = cx.alloc(bytes.len() as u32, 1)?;
            cx.memory()?.write(ptr, bytes)?;
            Ok((ptr, bytes.len() as u32))
        }
        (_, value) => Err(Error::type_mismatch(format!(
            "expected a list value, got {}",
            value.kind()
        ))),
    }
}

fn read_discriminant(memory: &Rc<dyn CoreMemory>, ptr: u32, width: u32) -> Result<u32> {
    match width {
        1 => Ok(u32::from(memory.read_u8(ptr)?)),
        2 => Ok(u32::from(memory.read_u16_le(ptr)?)),
        _ => memory.read_u32_le(ptr),
    }
}

fn write_discriminant(
    memory: &Rc<dyn CoreMemory>,
    ptr: u32,
    width: u32,
    value: u32,
) -> Result<()> {
    match width {
        1 => memory.write_u8(ptr, value as u8),
        2 => memory.write_u16_le(ptr, value as u16),
        _ => memory.write_u32_le(ptr, value),
    }
}

impl ValType {
    /// Lift a value from the next flat word(s)
    pub fn lift_flat(&self, cx: &mut LiftLowerCx<'_>, words: &mut FlatReader<'_>) -> Result<Value> {
        match self {
            ValType::Bool => Ok(Value::Bool(words.next()?.as_i32()? != 0)),
            ValType::S8 => Ok(Value::S8(words.next()?.as_i32()? as i8)),
            ValType::U8 => Ok(Value::U8(words.next()?.as_i32()? as u8)),
            ValType::S16 => Ok(Value::S16(words.next()?.as_i32()? as i16)),
            ValType::U16 => Ok(Value::U16(words.next()?.as_i32()? as u16)),
            ValType::S32 => Ok(Value::S32(words.next()?.as_i32()?)),
            ValType::U32 => Ok(Value::U32(words.next()?.as_u32()?)),
            ValType::S64 => Ok(Value::S64(words.next()?.as_i64()?)),
            ValType::U64 => Ok(Value::U64(words.next()?.as_i64()? as u64)),
            ValType::F32 => Ok(Value::F32(words.next()?.as_f32()?)),
            ValType::F64 => Ok(Value::F64(words.next()?.as_f64()?)),
            ValType::Char => Ok(Value::Char(check_char(words.next()?.as_u32()?)?)),
            ValType::String => {
                let ptr = words.next()?.as_u32()?;
                let len = words.next()?.as_u32()?;
                lift_string(cx, ptr, len)
            }
            ValType::ByteArray | ValType::List(_) => {
                let ptr = words.next()?.as_u32()?;
                let len = words.next()?.as_u32()?;
                lift_list(cx, self, ptr, len)
            }
            ValType::Record(r) => {
                let mut fields = Vec::with_capacity(r.fields.len());
                for (_, ty) in &r.fields {
                    fields.push(ty.lift_flat(cx, words)?);
                }
                Ok(Value::Record(fields))
            }
            ValType::Tuple(t) => {
                let mut items = Vec::with_capacity(t.types.len());
                for ty in &t.types {
                    items.push(ty.lift_flat(cx, words)?);
                }
                Ok(Value::Tuple(items))
            }
            ValType::Variant(v) => {
                let flats = self.flat_types();
                let discriminant = words.next()?.as_u32()?;
                let mut buffer = Vec::with_capacity(flats.len() - 1);
                for _ in 1..flats.len() {
                    buffer.push(words.next()?);
                }
                let (_, payload_ty) =
                    v.cases.get(discriminant as usize).ok_or_else(|| {
                        Error::type_mismatch(format!(
                            "variant discriminant {discriminant} out of range"
                        ))
                    })?;
                let payload = lift_payload_from_padded(cx, &buffer, payload_ty.as_ref())?;
                Ok(Value::Variant { discriminant, payload: payload.map(Box::new) })
            }
            ValType::Enum(e) => {
                let discriminant = words.next()?.as_u32()?;
                if discriminant as usize >= e.cases.len() {
                    return Err(Error::type_mismatch(format!(
                        "enum discriminant {discriminant} out of range"
                    )));
                }
                Ok(Value::Enum(discriminant))
            }
            ValType::Option(inner) => {
                let discriminant = words.next()?.as_u32()?;
                let flats = inner.flat_types();
                let mut buffer = Vec::with_capacity(flats.len());
                for _ in 0..flats.len() {
                    buffer.push(words.next()?);
                }
                match discriminant {
                    0 => Ok(Value::Option(None)),
                    1 => {
                        let payload = lift_payload_from_padded(cx, &buffer, Some(inner))?;
                        Ok(Value::Option(payload.map(Box::new)))
                    }
                    other => Err(Error::type_mismatch(format!(
                        "option discriminant {other} out of range"
                    ))),
                }
            }
            ValType::Result(r) => {
                let flats = self.flat_types();
                let discriminant = words.next()?.as_u32()?;
                let mut buffer = Vec::with_capacity(flats.len() - 1);
                for _ in 1..flats.len() {
                    buffer.push(words.next()?);
                }
                match discriminant {
                    0 => {
                        let payload = lift_payload_from_padded(cx, &buffer, r.ok.as_ref())?;
                        Ok(Value::Result(Ok(payload.map(Box::new))))
                    }
                    1 => {
                        let payload = lift_payload_from_padded(cx, &buffer, r.err.as_ref())?;
                        Ok(Value::Result(Err(payload.map(Box::new))))
                    }
                    other => Err(Error::type_mismatch(format!(
                        "result discriminant {other} out of range"
                    ))),
                }
            }
            ValType::Flags(f) => {
                let bits = words.next()?.as_u32()?;
                let mask = if f.labels.len() == 32 {
                    u32::MAX
                } else {
                    (1u32 << f.labels.len()) - 1
                };
                Ok(Value::Flags(bits & mask))
            }
            ValType::Own(res) => {
                let idx = words.next()?.as_u32()?;
                lift_own(cx, res, idx)
            }
            ValType::Borrow(res) => {
                let word = words.next()?.as_u32()?;
                lift_borrow(cx, res, word)
            }
        }
    }

    /// Lower a value into flat word(s)
    pub fn lower_flat(
        &self,
        cx: &mut LiftLowerCx<'_>,
        value: &Value,
        out: &mut Vec<CoreValue>,
    ) -> Result<()> {
        match (self, value) {
            (ValType::Bool, Value::Bool(v)) => {
                out.push(CoreValue::I32(i32::from(*v)));
                Ok(())
            }
            (ValType::S8, Value::S8(v)) => {
                out.push(CoreValue::I32(i32::from(*v)));
                Ok(())
            }
            (ValType::U8, Value::U8(v)) => {
                out.push(CoreValue::I32(i32::from(*v)));
                Ok(())
            }
            (ValType::S16, Value::S16(v)) => {
                out.push(CoreValue::I32(i32::from(*v)));
                Ok(())
            }
            (ValType::U16, Value::U16(v)) => {
                out.push(CoreValue::I32(i32::from(*v)));
                Ok(())
            }
            (ValType::S32, Value::S32(v)) => {
                out.push(CoreValue::I32(*v));
                Ok(())
            }
            (ValType::U32, Value::U32(v)) => {
                out.push(CoreValue::I32(*v as i32));
                Ok(())
            }
            (ValType::S64, Value::S64(v)) => {
                out.push(CoreValue::I64(*v));
                Ok(())
            }
            (ValType::U64, Value::U64(v)) => {
                out.push(CoreValue::I64(*v as i64));
                Ok(())
            }
            (ValType::F32, Value::F32(v)) => {
                out.push(CoreValue::F32(*v));
                Ok(())
            }
            (ValType::F64, Value::F64(v)) => {
                out.push(CoreValue::F64(*v));
                Ok(())
            }
            (ValType::Char, Value::Char(c)) => {
                out.push(CoreValue::I32(*c as i32));
                Ok(())
            }
            (ValType::String, Value::String(s)) => {
                let (ptr, len) = lower_string(cx, s)?;
                out.push(CoreValue::I32(ptr as i32));
                out.push(CoreValue::I32(len as i32));
                Ok(())
            }
            (ValType::ByteArray | ValType::List(_), _) => {
                let (ptr, len) = lower_list(cx, self, value)?;
                out.push(CoreValue::I32(ptr as i32));
                out.push(CoreValue::I32(len as i32));
                Ok(())
            }
            (ValType::Record(r), Value::Record(fields)) => {
                if fields.len() != r.fields.len() {
                    return Err(Error::type_mismatch("record arity mismatch"));
                }
                for ((_, ty), field) in r.fields.iter().zip(fields.iter()) {
                    ty.lower_flat(cx, field, out)?;
                }
                Ok(())
            }
            (ValType::Tuple(t), Value::Tuple(items)) => {
                if items.len() != t.types.len() {
                    return Err(Error::type_mismatch("tuple arity mismatch"));
                }
                for (ty, item) in t.types.iter().zip(items.iter()) {
                    ty.lower_flat(cx, item, out)?;
                }
                Ok(())
            }
            (ValType::Variant(v), Value::Variant { discriminant, payload }) => {
                let (_, payload_ty) =
                    v.cases.get(*discriminant as usize).ok_or_else(|| {
                        Error::type_mismatch(format!(
                            "variant discriminant {discriminant} out of range"
                        ))
                    })?;
                let flats = self.flat_types();
                out.push(CoreValue::I32(*discriminant as i32));
                lower_payload_padded(
                    cx,
                    payload_ty.as_ref(),
                    payload.as_deref(),
                    &flats[1..],
                    out,
                )
            }
            (ValType::Enum(e), Value::Enum(discriminant)) => {
                if *discriminant as usize >= e.cases.len() {
                    return Err(Error::type_mismatch(format!(
                        "enum discriminant {discriminant} out of range"
                    )));
                }
                out.push(CoreValue::I32(*discriminant as i32));
                Ok(())
            }
            (ValType::Option(inner), Value::Option(payload)) => {
                let flats = inner.flat_types();
                out.push(CoreValue::I32(i32::from(payload.is_some())));
                lower_payload_padded(
                    cx,
                    payload.as_ref().map(|_| &**inner),
                    payload.as_deref(),
                    &flats,
                    out,
                )
            }
            (ValType::Result(r), Value::Result(result)) => {
                let flats = self.flat_types();
                match result {
                    Ok(payload) => {
                        out.push(CoreValue::I32(0));
                        lower_payload_padded(
                            cx,
                            r.ok.as_ref(),
                            payload.as_deref(),
                            &flats[1..],
                            out,
                        )
                    }
                    Err(payload) => {
                        out.push(CoreValue::I32(1));
                        lower_payload_padded(
                            cx,
                            r.err.as_ref(),
                            payload.as_deref(),
                            &flats[1..],
                            out,
                        )
                    }
                }
            }
            (ValType::Flags(f), Value::Flags(bits)) => {
                let mask = if f.labels.len() == 32 {
                    u32::MAX
                } else {
                    (1u32 << f.labels.len()) - 1
                };
                if bits & !mask != 0 {
                    return Err(Error::type_mismatch("flags value has unknown bits set"));
                }
                out.push(CoreValue::I32(*bits as i32));
                Ok(())
            }
            (ValType::Own(res), _) => {
                let idx = lower_own(cx, res, value)?;
                out.push(CoreValue::I32(idx as i32));
                Ok(())
            }
            (ValType::Borrow(res), _) => {
                let word = lower_borrow(cx, res, value)?;
                out.push(CoreValue::I32(word as i32));
                Ok(())
            }
            (ty, value) => Err(Error::type_mismatch(format!(
                "cannot lower {} as {}",
                value.kind(),
                ty.type_name()
            ))),
        }
    }

    /// Load a value of this type from linear memory at `ptr`
    pub fn load(&self, cx: &mut LiftLowerCx<'_>, ptr: u32) -> Result<Value> {
        let memory = cx.memory()?;
        match self {
            ValType::Bool => Ok(Value::Bool(memory.read_u8(ptr)? != 0)),
            ValType::S8 => Ok(Value::S8(memory.read_u8(ptr)? as i8)),
            ValType::U8 => Ok(Value::U8(memory.read_u8(ptr)?)),
            ValType::S16 => Ok(Value::S16(memory.read_u16_le(ptr)? as i16)),
            ValType::U16 => Ok(Value::U16(memory.read_u16_le(ptr)?)),
            ValType::S32 => Ok(Value::S32(memory.read_u32_le(ptr)? as i32)),
            ValType::U32 => Ok(Value::U32(memory.read_u32_le(ptr)?)),
            ValType::S64 => Ok(Value::S64(memory.read_u64_le(ptr)? as i64)),
            ValType::U64 => Ok(Value::U64(memory.read_u64_le(ptr)?)),
            ValType::F32 => Ok(Value::F32(f32::from_bits(memory.read_u32_le(ptr)?))),
            ValType::F64 => Ok(Value::F64(f64::from_bits(memory.read_u64_le(ptr)?))),
            ValType::Char => Ok(Value::Char(check_char(memory.read_u32_le(ptr)?)?)),
            ValType::String => {
                let data = memory.read_u32_le(ptr)?;
                let len = memory.read_u32_le(ptr + 4)?;
                lift_string(cx, data, len)
            }
            ValType::ByteArray | ValType::List(_) => {
                let data = memory.read_u32_le(ptr)?;
                let len = memory.read_u32_le(ptr + 4)?;
                lift_list(cx, self, data, len)
            }
            ValType::Record(r) => {
                let types: Vec<ValType> =
                    r.fields.iter().map(|(_, t)| t.clone()).collect();
                let offsets = ValType::field_offsets(&types);
                let mut fields = Vec::with_capacity(types.len());
                for (ty, offset) in types.iter().zip(offsets.iter()) {
                    fields.push(ty.load(cx, ptr + offset)?);
                }
                Ok(Value::Record(fields))
            }
            ValType::Tuple(t) => {
                let offsets = ValType::field_offsets(&t.types);
                let mut items = Vec::with_capacity(t.types.len());
                for (ty, offset) in t.types.iter().zip(offsets.iter()) {
                    items.push(ty.load(cx, ptr + offset)?);
                }
                Ok(Value::Tuple(items))
            }
            ValType::Variant(v) => {
                let width = discriminant_size(v.cases.len());
                let discriminant = read_discriminant(&memory, ptr, width)?;
                let (_, payload_ty) =
                    v.cases.get(discriminant as usize).ok_or_else(|| {
                        Error::type_mismatch(format!(
                            "variant discriminant {discriminant} out of range"
                        ))
                    })?;
                let payload = match payload_ty {
                    Some(ty) => {
                        let offset = layout::variant_payload_offset(v);
                        Some(Box::new(ty.load(cx, ptr + offset)?))
                    }
                    None => None,
                };
                Ok(Value::Variant { discriminant, payload })
            }
            ValType::Enum(e) => {
                let width = discriminant_size(e.cases.len());
                let discriminant = read_discriminant(&memory, ptr, width)?;
                if discriminant as usize >= e.cases.len() {
                    return Err(Error::type_mismatch(format!(
                        "enum discriminant {discriminant} out of range"
                    )));
                }
                Ok(Value::Enum(discriminant))
            }
            ValType::Option(inner) => {
                let discriminant = memory.read_u8(ptr)?;
                match discriminant {
                    0 => Ok(Value::Option(None)),
                    1 => {
                        let offset = align_to(1, inner.alignment());
                        Ok(Value::Option(Some(Box::new(inner.load(cx, ptr + offset)?))))
                    }
                    other => Err(Error::type_mismatch(format!(
                        "option discriminant {other} out of range"
                    ))),
                }
            }
            ValType::Result(r) => {
                let payload_align = r
                    .ok
                    .as_ref()
                    .map(ValType::alignment)
                    .max(r.err.as_ref().map(ValType::alignment))
                    .unwrap_or(1);
                let offset = align_to(1, payload_align);
                let discriminant = memory.read_u8(ptr)?;
                match discriminant {
                    0 => {
                        let payload = match &r.ok {
                            Some(ty) => Some(Box::new(ty.load(cx, ptr + offset)?)),
                            None => None,
                        };
                        Ok(Value::Result(Ok(payload)))
                    }
                    1 => {
                        let payload = match &r.err {
                            Some(ty) => Some(Box::new(ty.load(cx, ptr + offset)?)),
                            None => None,
                        };
                        Ok(Value::Result(Err(payload)))
                    }
                    other => Err(Error::type_mismatch(format!(
                        "result discriminant {other} out of range"
                    ))),
                }
            }
            ValType::Flags(f) => {
                let bits = match self.elem_size() {
                    1 => u32::from(memory.read_u8(ptr)?),
                    2 => u32::from(memory.read_u16_le(ptr)?),
                    _ => memory.read_u32_le(ptr)?,
                };
                let mask = if f.labels.len() == 32 {
                    u32::MAX
                } else {
                    (1u32 << f.labels.len()) - 1
                };
                Ok(Value::Flags(bits & mask))
            }
            ValType::Own(res) => {
                let idx = memory.read_u32_le(ptr)?;
                lift_own(cx, res, idx)
            }
            ValType::Borrow(res) => {
                let word = memory.read_u32_le(ptr)?;
                lift_borrow(cx, res, word)
            }
        }
    }

    /// Store a value of this type into linear memory at `ptr`
    pub fn store(&self, cx: &mut LiftLowerCx<'_>, ptr: u32, value: &Value) -> Result<()> {
        let memory = cx.memory()?;
        match (self, value) {
            (ValType::Bool, Value::Bool(v)) => memory.write_u8(ptr, u8::from(*v)),
            (ValType::S8, Value::S8(v)) => memory.write_u8(ptr, *v as u8),
            (ValType::U8, Value::U8(v)) => memory.write_u8(ptr, *v),
            (ValType::S16, Value::S16(v)) => memory.write_u16_le(ptr, *v as u16),
            (ValType::U16, Value::U16(v)) => memory.write_u16_le(ptr, *v),
            (ValType::S32, Value::S32(v)) => memory.write_u32_le(ptr, *v as u32),
            (ValType::U32, Value::U32(v)) => memory.write_u32_le(ptr, *v),
            (ValType::S64, Value::S64(v)) => memory.write_u64_le(ptr, *v as u64),
            (ValType::U64, Value::U64(v)) => memory.write_u64_le(ptr, *v),
            (ValType::F32, Value::F32(v)) => memory.write_u32_le(ptr, v.to_bits()),
            (ValType::F64, Value::F64(v)) => memory.write_u64_le(ptr, v.to_bits()),
            (ValType::Char, Value::Char(c)) => memory.write_u32_le(ptr, *c as u32),
            (ValType::String, Value::String(s)) => {
                let (data, len) = lower_string(cx, s)?;
                let memory = cx.memory()?;
                memory.write_u32_le(ptr, data)?;
                memory.write_u32_le(ptr + 4, len)
            }
            (ValType::ByteArray | ValType::List(_), _) => {
                let (data, len) = lower_list(cx, self, value)?;
                let memory = cx.memory()?;
                memory.write_u32_le(ptr, data)?;
                memory.write_u32_le(ptr + 4, len)
            }
            (ValType::Record(r), Value::Record(fields)) => {
                if fields.len() != r.fields.len() {
                    return Err(Error::type_mismatch("record arity mismatch"));
                }
                let types: Vec<ValType> =
                    r.fields.iter().map(|(_, t)| t.clone()).collect();
                let offsets = ValType::field_offsets(&types);
                for ((ty, offset), field) in
                    types.iter().zip(offsets.iter()).zip(fields.iter())
                {
                    ty.store(cx, ptr + offset, field)?;
                }
                Ok(())
            }
            (ValType::Tuple(t), Value::Tuple(items)) => {
                if items.len() != t.types.len() {
                    return Err(Error::type_mismatch("tuple arity mismatch"));
                }
                let offsets = ValType::field_offsets(&t.types);
                for ((ty, offset), item) in
                    t.types.iter().zip(offsets.iter()).zip(items.iter())
                {
                    ty.store(cx, ptr + offset, item)?;
                }
                Ok(())
            }
            (ValType::Variant(v), Value::Variant { discriminant, payload }) => {
                let (_, payload_ty) =
                    v.cases.get(*discriminant as usize).ok_or_else(|| {
                        Error::type_mismatch(format!(
                            "variant discriminant {discriminant} out of range"
                        ))
                    })?;
                // Zero the whole element so padding bytes are deterministic
                memory.write(ptr, &vec![0u8; self.elem_size() as usize])?;
                let width = discriminant_size(v.cases.len());
                write_discriminant(&memory, ptr, width, *discriminant)?;
                match (payload_ty, payload) {
                    (Some(ty), Some(value)) => {
                        let offset = layout::variant_payload_offset(v);
                        ty.store(cx, ptr + offset, value)
                    }
                    (None, None) => Ok(()),
                    _ => Err(Error::type_mismatch(
                        "variant payload does not match its case",
                    )),
                }
            }
            (ValType::Enum(e), Value::Enum(discriminant)) => {
                if *discriminant as usize >= e.cases.len() {
                    return Err(Error::type_mismatch(format!(
                        "enum discriminant {discriminant} out of range"
                    )));
                }
                let width = discriminant_size(e.cases.len());
                write_discriminant(&memory, ptr, width, *discriminant)
            }
            (ValType::Option(inner), Value::Option(payload)) => {
                memory.write(ptr, &vec![0u8; self.elem_size() as usize])?;
                match payload {
                    None => memory.write_u8(ptr, 0),
                    Some(value) => {
                        memory.write_u8(ptr, 1)?;
                        let offset = align_to(1, inner.alignment());
                        inner.store(cx, ptr + offset, value)
                    }
                }
            }
            (ValType::Result(r), Value::Result(result)) => {
                memory.write(ptr, &vec![0u8; self.elem_size() as usize])?;
                let payload_align = r
                    .ok
                    .as_ref()
                    .map(ValType::alignment)
                    .max(r.err.as_ref().map(ValType::alignment))
                    .unwrap_or(1);
                let offset = align_to(1, payload_align);
                match result {
                    Ok(payload) => {
                        memory.write_u8(ptr, 0)?;
                        match (&r.ok, payload) {
                            (Some(ty), Some(value)) => ty.store(cx, ptr + offset, value),
                            (None, None) => Ok(()),
                            _ => Err(Error::type_mismatch(
                                "result ok payload does not match its type",
                            )),
                        }
                    }
                    Err(payload) => {
                        memory.write_u8(ptr, 1)?;
                        match (&r.err, payload) {
                            (Some(ty), Some(value)) => ty.store(cx, ptr + offset, value),
                            (None, None) => Ok(()),
                            _ => Err(Error::type_mismatch(
                                "result error payload does not match its type",
                            )),
                        }
                    }
                }
            }
            (ValType::Flags(f), Value::Flags(bits)) => {
                let mask = if f.labels.len() == 32 {
                    u32::MAX
                } else {
                    (1u32 << f.labels.len()) - 1
                };
                if bits & !mask != 0 {
                    return Err(Error::type_mismatch("flags value has unknown bits set"));
                }
                match self.elem_size() {
                    1 => memory.write_u8(ptr, *bits as u8),
                    2 => memory.write_u16_le(ptr, *bits as u16),
                    _ => memory.write_u32_le(ptr, *bits),
                }
            }
            (ValType::Own(res), _) => {
                let idx = lower_own(cx, res, value)?;
                cx.memory()?.write_u32_le(ptr, idx)
            }
            (ValType::Borrow(res), _) => {
                let word = lower_borrow(cx, res, value)?;
                cx.memory()?.write_u32_le(ptr, word)
            }
            (ty, value) => Err(Error::type_mismatch(format!(
                "cannot store {} as {}",
                value.kind(),
                ty.type_name()
            ))),
        }
    }
}

/// Load a sequence of values stored contiguously (a parameter or result
/// tuple) starting at `ptr`
pub fn load_values(
    cx: &mut LiftLowerCx<'_>,
    types: &[ValType],
    ptr: u32,
) -> Result<Vec<Value>> {
    let alignment = layout::values_layout(types).alignment;
    if alignment > 0 && ptr % alignment != 0 {
        return Err(Error::alignment_violation(format!(
            "tuple pointer {ptr:#x} unaligned for {alignment}"
        )));
    }
    let offsets = ValType::field_offsets(types);
    let mut values = Vec::with_capacity(types.len());
    for (ty, offset) in types.iter().zip(offsets.iter()) {
        values.push(ty.load(cx, ptr + offset)?);
    }
    Ok(values)
}

/// Store a sequence of values contiguously starting at `ptr`
pub fn store_values(
    cx: &mut LiftLowerCx<'_>,
    types: &[ValType],
    ptr: u32,
    values: &[Value],
) -> Result<()> {
    if types.len() != values.len() {
        return Err(Error::type_mismatch("value tuple arity mismatch"));
    }
    let alignment = layout::values_layout(types).alignment;
    if alignment > 0 && ptr % alignment != 0 {
        return Err(Error::alignment_violation(format!(
            "tuple pointer {ptr:#x} unaligned for {alignment}"
        )));
    }
    let offsets = ValType::field_offsets(types);
    for ((ty, offset), value) in types.iter().zip(offsets.iter()).zip(values.iter()) {
        ty.store(cx, ptr + offset, value)?;
    }
    Ok(())
}

/// An in-crate linear memory for tests and host-synthesised instances
#[derive(Debug)]
pub struct SimpleMemory {
    data: RefCell<Vec<u8>>,
}

impl SimpleMemory {
    /// Create a zero-filled memory of `size` bytes
    pub fn new(size: usize) -> Rc<Self> {
        Rc::new(Self { data: RefCell::new(vec![0; size]) })
    }

    /// A copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl CoreMemory for SimpleMemory {
    fn memory_type(&self) -> CoreMemoryType {
        let pages = (self.data.borrow().len() / 65_536) as u32;
        CoreMemoryType { limits: Limits { min: pages, max: Some(pages) }, shared: false }
    }

    fn read(&self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let data = self.data.borrow();
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or_else(|| Error::memory_out_of_bounds("memory read overflows"))?;
        if end > data.len() {
            return Err(Error::memory_out_of_bounds(format!(
                "read of {len} bytes at {offset:#x} is out of bounds"
            )));
        }
        Ok(data[start..end].to_vec())
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.borrow_mut();
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| Error::memory_out_of_bounds("memory write overflows"))?;
        if end > data.len() {
            return Err(Error::memory_out_of_bounds(format!(
                "write of {} bytes at {offset:#x} is out of bounds",
                bytes.len()
            )));
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> u32 {
        self.data.borrow().len() as u32
    }
}

/// A bump allocator over a [`SimpleMemory`] usable as the `realloc` option
pub fn bump_realloc(memory: &Rc<SimpleMemory>, heap_base: u32) -> CoreFunc {
    let memory = memory.clone();
    let next = Cell::new(heap_base);
    CoreFunc::new(
        options::realloc_signature(),
        move |args: &[CoreValue]| {
            let align = args[2].as_u32()?.max(1);
            let size = args[3].as_u32()?;
            let ptr = align_to(next.get(), align);
            let end = u64::from(ptr) + u64::from(size);
            if end > u64::from(memory.size()) {
                return Ok(vec![CoreValue::I32(REALLOC_SENTINEL as i32)]);
            }
            next.set(ptr + size);
            Ok(vec![CoreValue::I32(ptr as i32)])
        },
    )
}
