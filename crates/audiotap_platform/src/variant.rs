//! Tagged-union property values (PROPVARIANT)
//!
//! Property stores hand back values as a 16-bit type tag followed by a
//! payload whose interpretation depends on the tag. [`RawVariant`] mirrors
//! that layout bit-for-bit so the Windows backend can move a `PROPVARIANT`
//! into it, and [`VariantCodec`] turns it into an owned [`PropertyValue`].
//!
//! # Memory ownership
//!
//! Strings, blobs and vectors inside a platform variant point at memory the
//! platform allocated. [`VariantCodec::decode_owned`] copies everything it
//! needs and then hands the variant to a [`VariantRelease`] exactly once,
//! whether decoding succeeded or not.
//!
//! ```text
//! ┌────────┬──────────────┬──────────────────────────────┐
//! │ vt u16 │ reserved 3×u16 │ payload (8 bytes / 16 on x64) │
//! └────────┴──────────────┴──────────────────────────────┘
//! ```

use std::mem;
use std::ptr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AudioError, Result};

/// Variant type tags understood by the codec
pub mod vt {
    pub const EMPTY: u16 = 0;
    pub const NULL: u16 = 1;
    pub const I2: u16 = 2;
    pub const I4: u16 = 3;
    pub const R4: u16 = 4;
    pub const R8: u16 = 5;
    pub const BSTR: u16 = 8;
    pub const BOOL: u16 = 11;
    pub const I1: u16 = 16;
    pub const UI1: u16 = 17;
    pub const UI2: u16 = 18;
    pub const UI4: u16 = 19;
    pub const I8: u16 = 20;
    pub const UI8: u16 = 21;
    pub const INT: u16 = 22;
    pub const UINT: u16 = 23;
    pub const LPSTR: u16 = 30;
    pub const LPWSTR: u16 = 31;
    pub const FILETIME: u16 = 64;
    pub const BLOB: u16 = 65;
    pub const CLSID: u16 = 72;
    pub const VECTOR: u16 = 0x1000;
}

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;

/// Counted byte buffer (`BLOB`)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawBlob {
    pub size: u32,
    pub data: *const u8,
}

/// Counted array (`CAUI4`, `CALPWSTR`, ...)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVector {
    pub count: u32,
    pub elements: *const u8,
}

/// Payload union, interpreted according to [`RawVariant::vt`]
#[repr(C)]
#[derive(Clone, Copy)]
pub union VariantPayload {
    pub int8: i8,
    pub uint8: u8,
    pub int16: i16,
    pub uint16: u16,
    pub int32: i32,
    pub uint32: u32,
    pub int64: i64,
    pub uint64: u64,
    pub real32: f32,
    pub real64: f64,
    /// Low and high halves of a FILETIME
    pub filetime: [u32; 2],
    pub ptr: *const u8,
    pub blob: RawBlob,
    pub vector: RawVector,
}

/// Layout-compatible image of a `PROPVARIANT`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVariant {
    pub vt: u16,
    pub reserved: [u16; 3],
    pub payload: VariantPayload,
}

impl RawVariant {
    /// A `VT_EMPTY` variant
    pub fn empty() -> Self {
        // SAFETY: all-zero is VT_EMPTY with a null payload
        unsafe { mem::zeroed() }
    }

    fn with_payload(vt: u16, payload: VariantPayload) -> Self {
        let mut raw = Self::empty();
        raw.vt = vt;
        raw.payload = payload;
        raw
    }
}

impl std::fmt::Debug for RawVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawVariant {{ vt: 0x{:04X} }}", self.vt)
    }
}

/// Decoded, fully owned property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Guid(Uuid),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
    Vector(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Widen any integer variant to `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            PropertyValue::I8(v) => Some(v.into()),
            PropertyValue::U8(v) => Some(v.into()),
            PropertyValue::I16(v) => Some(v.into()),
            PropertyValue::U16(v) => Some(v.into()),
            PropertyValue::I32(v) => Some(v.into()),
            PropertyValue::U32(v) => Some(v.into()),
            PropertyValue::I64(v) => Some(v),
            PropertyValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }
}

/// Releases platform memory held by a variant
///
/// Called exactly once per [`VariantCodec::decode_owned`] call.
pub trait VariantRelease {
    fn release(&self, raw: &mut RawVariant);
}

/// Releaser for variants whose storage is owned elsewhere
pub struct NoRelease;

impl VariantRelease for NoRelease {
    fn release(&self, _raw: &mut RawVariant) {}
}

/// Runs the releaser when dropped, so early returns and errors still release
struct ReleaseGuard<'a, R: VariantRelease + ?Sized> {
    raw: RawVariant,
    releaser: &'a R,
}

impl<R: VariantRelease + ?Sized> Drop for ReleaseGuard<'_, R> {
    fn drop(&mut self) {
        self.releaser.release(&mut self.raw);
    }
}

/// Decoder/encoder for [`RawVariant`]
pub struct VariantCodec;

impl VariantCodec {
    /// Decode a platform-owned variant and release it
    ///
    /// Returns `Ok(None)` for `VT_EMPTY`/`VT_NULL` and for a zero FILETIME.
    ///
    /// # Safety
    ///
    /// Every pointer in `raw` must be valid for the type its tag declares.
    pub unsafe fn decode_owned<R: VariantRelease + ?Sized>(
        raw: RawVariant,
        releaser: &R,
    ) -> Result<Option<PropertyValue>> {
        let guard = ReleaseGuard { raw, releaser };
        Self::decode(&guard.raw)
    }

    /// Decode without releasing anything
    ///
    /// # Safety
    ///
    /// Every pointer in `raw` must be valid for the type its tag declares.
    pub unsafe fn decode(raw: &RawVariant) -> Result<Option<PropertyValue>> {
        let tag = raw.vt;
        if tag & vt::VECTOR != 0 {
            let base = tag & !vt::VECTOR;
            return decode_vector(base, raw.payload.vector)
                .map(|items| Some(PropertyValue::Vector(items)))
                .map_err(|_| AudioError::UnsupportedVariantType(tag));
        }

        match tag {
            vt::EMPTY | vt::NULL => Ok(None),
            vt::FILETIME if filetime_ticks(raw.payload.filetime) == 0 => Ok(None),
            _ => decode_scalar(tag, &raw.payload).map(Some),
        }
    }

    /// Build a variant of type `tag` holding `value`
    ///
    /// The returned [`OwnedVariant`] owns every buffer its payload points to.
    pub fn encode(value: &PropertyValue, tag: u16) -> Result<OwnedVariant> {
        let mismatch = || AudioError::UnsupportedVariantType(tag);

        if tag & vt::VECTOR != 0 {
            let PropertyValue::Vector(items) = value else {
                return Err(mismatch());
            };
            return encode_vector(items, tag);
        }

        let mut payload = RawVariant::empty().payload;
        let storage = match (tag, value) {
            (vt::I1, PropertyValue::I8(v)) => {
                payload.int8 = *v;
                Storage::None
            }
            (vt::UI1, PropertyValue::U8(v)) => {
                payload.uint8 = *v;
                Storage::None
            }
            (vt::I2, PropertyValue::I16(v)) => {
                payload.int16 = *v;
                Storage::None
            }
            (vt::UI2, PropertyValue::U16(v)) => {
                payload.uint16 = *v;
                Storage::None
            }
            (vt::I4 | vt::INT, PropertyValue::I32(v)) => {
                payload.int32 = *v;
                Storage::None
            }
            (vt::UI4 | vt::UINT, PropertyValue::U32(v)) => {
                payload.uint32 = *v;
                Storage::None
            }
            (vt::I8, PropertyValue::I64(v)) => {
                payload.int64 = *v;
                Storage::None
            }
            (vt::UI8, PropertyValue::U64(v)) => {
                payload.uint64 = *v;
                Storage::None
            }
            (vt::R4, PropertyValue::F32(v)) => {
                payload.real32 = *v;
                Storage::None
            }
            (vt::R8, PropertyValue::F64(v)) => {
                payload.real64 = *v;
                Storage::None
            }
            (vt::BOOL, PropertyValue::Bool(v)) => {
                payload.int16 = if *v { -1 } else { 0 };
                Storage::None
            }
            (vt::FILETIME, PropertyValue::Timestamp(ts)) => {
                let ticks = datetime_to_filetime(ts);
                payload.filetime = [ticks as u32, (ticks >> 32) as u32];
                Storage::None
            }
            (vt::LPWSTR, PropertyValue::String(s)) => {
                let wide: Vec<u16> = s.encode_utf16().chain(Some(0)).collect();
                payload.ptr = wide.as_ptr().cast();
                Storage::Wide(wide)
            }
            (vt::LPSTR, PropertyValue::String(s)) => {
                let narrow: Vec<u8> = s.bytes().chain(Some(0)).collect();
                payload.ptr = narrow.as_ptr();
                Storage::Bytes(narrow)
            }
            (vt::BSTR, PropertyValue::String(s)) => {
                let chars: Vec<u16> = s.encode_utf16().collect();
                let byte_len = (chars.len() * 2) as u32;
                let mut bstr = vec![byte_len as u16, (byte_len >> 16) as u16];
                bstr.extend_from_slice(&chars);
                bstr.push(0);
                // BSTR points past the length prefix
                payload.ptr = bstr[2..].as_ptr().cast();
                Storage::Wide(bstr)
            }
            (vt::CLSID, PropertyValue::Guid(g)) => {
                let bytes = Box::new(g.to_bytes_le());
                payload.ptr = bytes.as_ptr();
                Storage::Guid(bytes)
            }
            (vt::BLOB, PropertyValue::Blob(bytes)) => {
                let bytes = bytes.clone();
                payload.blob = RawBlob {
                    size: bytes.len() as u32,
                    data: bytes.as_ptr(),
                };
                Storage::Bytes(bytes)
            }
            _ => return Err(mismatch()),
        };

        Ok(OwnedVariant {
            raw: RawVariant::with_payload(tag, payload),
            _storage: storage,
        })
    }
}

/// A variant whose payload points into buffers it owns
///
/// Moving an `OwnedVariant` does not invalidate its payload pointers since
/// they target heap storage.
pub struct OwnedVariant {
    raw: RawVariant,
    _storage: Storage,
}

#[allow(dead_code)] // buffers are held only to keep payload pointers valid
enum Storage {
    None,
    Bytes(Vec<u8>),
    Wide(Vec<u16>),
    Guid(Box<[u8; 16]>),
    WideList(Vec<Vec<u16>>, Vec<*const u16>),
}

impl OwnedVariant {
    pub fn raw(&self) -> &RawVariant {
        &self.raw
    }

    pub fn vt(&self) -> u16 {
        self.raw.vt
    }

    /// Decode this variant back into a value
    pub fn decode(&self) -> Result<Option<PropertyValue>> {
        // SAFETY: payload pointers target storage owned by self
        unsafe { VariantCodec::decode(&self.raw) }
    }
}

impl std::fmt::Debug for OwnedVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedVariant").field("vt", &self.raw.vt).finish()
    }
}

unsafe fn decode_scalar(tag: u16, payload: &VariantPayload) -> Result<PropertyValue> {
    let value = match tag {
        vt::I1 => PropertyValue::I8(payload.int8),
        vt::UI1 => PropertyValue::U8(payload.uint8),
        vt::I2 => PropertyValue::I16(payload.int16),
        vt::UI2 => PropertyValue::U16(payload.uint16),
        vt::I4 | vt::INT => PropertyValue::I32(payload.int32),
        vt::UI4 | vt::UINT => PropertyValue::U32(payload.uint32),
        vt::I8 => PropertyValue::I64(payload.int64),
        vt::UI8 => PropertyValue::U64(payload.uint64),
        vt::R4 => PropertyValue::F32(payload.real32),
        vt::R8 => PropertyValue::F64(payload.real64),
        vt::BOOL => PropertyValue::Bool(payload.int16 != 0),
        vt::LPWSTR => PropertyValue::String(read_wide(payload.ptr.cast())),
        vt::LPSTR => PropertyValue::String(read_narrow(payload.ptr)),
        vt::BSTR => PropertyValue::String(read_bstr(payload.ptr.cast())),
        vt::CLSID => {
            if payload.ptr.is_null() {
                return Err(AudioError::UnsupportedVariantType(tag));
            }
            let bytes: [u8; 16] = ptr::read_unaligned(payload.ptr.cast());
            PropertyValue::Guid(Uuid::from_bytes_le(bytes))
        }
        vt::FILETIME => {
            let ticks = filetime_ticks(payload.filetime);
            let ts = filetime_to_datetime(ticks).ok_or(AudioError::UnsupportedVariantType(tag))?;
            PropertyValue::Timestamp(ts)
        }
        vt::BLOB => {
            let blob = payload.blob;
            if blob.data.is_null() || blob.size == 0 {
                PropertyValue::Blob(Vec::new())
            } else {
                PropertyValue::Blob(std::slice::from_raw_parts(blob.data, blob.size as usize).to_vec())
            }
        }
        other => return Err(AudioError::UnsupportedVariantType(other)),
    };
    Ok(value)
}

/// In-memory size of one element of a `VT_VECTOR | base` array
fn element_size(base: u16) -> Option<usize> {
    match base {
        vt::I1 | vt::UI1 => Some(1),
        vt::I2 | vt::UI2 | vt::BOOL => Some(2),
        vt::I4 | vt::UI4 | vt::INT | vt::UINT | vt::R4 => Some(4),
        vt::I8 | vt::UI8 | vt::R8 | vt::FILETIME => Some(8),
        vt::LPSTR | vt::LPWSTR | vt::BSTR => Some(mem::size_of::<*const u8>()),
        vt::CLSID => Some(16),
        _ => None,
    }
}

unsafe fn decode_vector(base: u16, vector: RawVector) -> Result<Vec<PropertyValue>> {
    let size = element_size(base).ok_or(AudioError::UnsupportedVariantType(base))?;
    if vector.count == 0 || vector.elements.is_null() {
        return Ok(Vec::new());
    }

    let mut items = Vec::with_capacity(vector.count as usize);
    for i in 0..vector.count as usize {
        let element = vector.elements.add(i * size);
        let mut payload = RawVariant::empty().payload;
        match base {
            // CLSID vectors store GUIDs inline; the scalar form is a pointer
            vt::CLSID => payload.ptr = element,
            vt::LPSTR | vt::LPWSTR | vt::BSTR => {
                payload.ptr = ptr::read_unaligned(element.cast::<*const u8>())
            }
            _ => ptr::copy_nonoverlapping(element, ptr::addr_of_mut!(payload).cast::<u8>(), size),
        }
        items.push(decode_scalar(base, &payload)?);
    }
    Ok(items)
}

fn encode_vector(items: &[PropertyValue], tag: u16) -> Result<OwnedVariant> {
    let base = tag & !vt::VECTOR;
    let mismatch = || AudioError::UnsupportedVariantType(tag);

    if base == vt::LPWSTR {
        let mut strings = Vec::with_capacity(items.len());
        for item in items {
            let s = item.as_str().ok_or_else(mismatch)?;
            strings.push(s.encode_utf16().chain(Some(0)).collect::<Vec<u16>>());
        }
        let pointers: Vec<*const u16> = strings.iter().map(|s| s.as_ptr()).collect();
        let mut payload = RawVariant::empty().payload;
        payload.vector = RawVector {
            count: pointers.len() as u32,
            elements: pointers.as_ptr().cast(),
        };
        return Ok(OwnedVariant {
            raw: RawVariant::with_payload(tag, payload),
            _storage: Storage::WideList(strings, pointers),
        });
    }

    let size = match base {
        vt::LPSTR | vt::BSTR | vt::CLSID => return Err(mismatch()),
        _ => element_size(base).ok_or_else(mismatch)?,
    };

    let mut bytes = Vec::with_capacity(items.len() * size);
    for item in items {
        let element = VariantCodec::encode(item, base)?;
        // SAFETY: scalar numeric payloads are plain bytes, at least `size` long
        let raw = unsafe {
            std::slice::from_raw_parts(ptr::addr_of!(element.raw.payload).cast::<u8>(), size)
        };
        bytes.extend_from_slice(raw);
    }

    let mut payload = RawVariant::empty().payload;
    payload.vector = RawVector {
        count: items.len() as u32,
        elements: bytes.as_ptr(),
    };
    Ok(OwnedVariant {
        raw: RawVariant::with_payload(tag, payload),
        _storage: Storage::Bytes(bytes),
    })
}

fn filetime_ticks(parts: [u32; 2]) -> u64 {
    (u64::from(parts[1]) << 32) | u64::from(parts[0])
}

/// Convert FILETIME ticks (100ns since 1601-01-01 UTC) to a timestamp
pub fn filetime_to_datetime(ticks: u64) -> Option<DateTime<Utc>> {
    let since_unix = i64::try_from(ticks).ok()? - FILETIME_UNIX_OFFSET;
    let secs = since_unix.div_euclid(FILETIME_TICKS_PER_SEC);
    let nanos = (since_unix.rem_euclid(FILETIME_TICKS_PER_SEC) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Inverse of [`filetime_to_datetime`], truncated to 100ns
pub fn datetime_to_filetime(ts: &DateTime<Utc>) -> u64 {
    let ticks = ts.timestamp() * FILETIME_TICKS_PER_SEC
        + i64::from(ts.timestamp_subsec_nanos() / 100)
        + FILETIME_UNIX_OFFSET;
    ticks.max(0) as u64
}

unsafe fn read_wide(p: *const u16) -> String {
    if p.is_null() {
        return String::new();
    }
    let mut len = 0;
    while ptr::read_unaligned(p.add(len)) != 0 {
        len += 1;
    }
    let units: Vec<u16> = (0..len).map(|i| ptr::read_unaligned(p.add(i))).collect();
    String::from_utf16_lossy(&units)
}

unsafe fn read_narrow(p: *const u8) -> String {
    if p.is_null() {
        return String::new();
    }
    std::ffi::CStr::from_ptr(p.cast()).to_string_lossy().into_owned()
}

unsafe fn read_bstr(p: *const u16) -> String {
    if p.is_null() {
        return String::new();
    }
    let byte_len = ptr::read_unaligned(p.cast::<u8>().sub(4).cast::<u32>()) as usize;
    let units: Vec<u16> = (0..byte_len / 2).map(|i| ptr::read_unaligned(p.add(i))).collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counts release calls and empties the variant like PropVariantClear
    #[derive(Default)]
    struct CountingRelease {
        calls: Cell<u32>,
    }

    impl VariantRelease for CountingRelease {
        fn release(&self, raw: &mut RawVariant) {
            self.calls.set(self.calls.get() + 1);
            *raw = RawVariant::empty();
        }
    }

    fn raw_with(tag: u16, fill: impl FnOnce(&mut VariantPayload)) -> RawVariant {
        let mut raw = RawVariant::empty();
        raw.vt = tag;
        fill(&mut raw.payload);
        raw
    }

    #[test]
    fn test_empty_and_null_decode_to_none() {
        let release = CountingRelease::default();
        for tag in [vt::EMPTY, vt::NULL] {
            let value = unsafe { VariantCodec::decode_owned(raw_with(tag, |_| {}), &release) };
            assert_eq!(value.unwrap(), None);
        }
        assert_eq!(release.calls.get(), 2);
    }

    #[test]
    fn test_scalar_integers() {
        let raw = raw_with(vt::I4, |p| p.int32 = -42);
        assert_eq!(
            unsafe { VariantCodec::decode(&raw) }.unwrap(),
            Some(PropertyValue::I32(-42))
        );

        let raw = raw_with(vt::UI8, |p| p.uint64 = u64::MAX);
        assert_eq!(
            unsafe { VariantCodec::decode(&raw) }.unwrap(),
            Some(PropertyValue::U64(u64::MAX))
        );
    }

    #[test]
    fn test_variant_bool() {
        let t = raw_with(vt::BOOL, |p| p.int16 = -1);
        let f = raw_with(vt::BOOL, |p| p.int16 = 0);
        assert_eq!(unsafe { VariantCodec::decode(&t) }.unwrap(), Some(PropertyValue::Bool(true)));
        assert_eq!(unsafe { VariantCodec::decode(&f) }.unwrap(), Some(PropertyValue::Bool(false)));
    }

    #[test]
    fn test_wide_string() {
        let wide: Vec<u16> = "Speakers (Realtek)".encode_utf16().chain(Some(0)).collect();
        let raw = raw_with(vt::LPWSTR, |p| p.ptr = wide.as_ptr().cast());
        let value = unsafe { VariantCodec::decode(&raw) }.unwrap();
        assert_eq!(value, Some(PropertyValue::String("Speakers (Realtek)".into())));
    }

    #[test]
    fn test_bstr_uses_length_prefix() {
        let variant = VariantCodec::encode(&PropertyValue::String("mic".into()), vt::BSTR).unwrap();
        assert_eq!(variant.decode().unwrap(), Some(PropertyValue::String("mic".into())));
    }

    #[test]
    fn test_blob_is_copied() {
        let mut source = vec![1u8, 2, 3, 4];
        let raw = raw_with(vt::BLOB, |p| {
            p.blob = RawBlob {
                size: source.len() as u32,
                data: source.as_ptr(),
            }
        });
        let value = unsafe { VariantCodec::decode(&raw) }.unwrap();
        source.iter_mut().for_each(|b| *b = 0);
        assert_eq!(value, Some(PropertyValue::Blob(vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_filetime_conversion() {
        // 2001-01-01T00:00:00Z
        let ticks: u64 = 126_227_808_000_000_000;
        let raw = raw_with(vt::FILETIME, |p| p.filetime = [ticks as u32, (ticks >> 32) as u32]);
        let value = unsafe { VariantCodec::decode(&raw) }.unwrap();
        match value {
            Some(PropertyValue::Timestamp(ts)) => {
                assert_eq!(ts.to_rfc3339(), "2001-01-01T00:00:00+00:00")
            }
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_filetime_is_none() {
        let raw = raw_with(vt::FILETIME, |p| p.filetime = [0, 0]);
        assert_eq!(unsafe { VariantCodec::decode(&raw) }.unwrap(), None);
    }

    #[test]
    fn test_filetime_epoch_offset() {
        let epoch = filetime_to_datetime(116_444_736_000_000_000).unwrap();
        assert_eq!(epoch.timestamp(), 0);
        assert_eq!(datetime_to_filetime(&epoch), 116_444_736_000_000_000);
    }

    #[test]
    fn test_vector_of_u16() {
        let elements: [u16; 3] = [10, 20, 30];
        let raw = raw_with(vt::VECTOR | vt::UI2, |p| {
            p.vector = RawVector {
                count: 3,
                elements: elements.as_ptr().cast(),
            }
        });
        let value = unsafe { VariantCodec::decode(&raw) }.unwrap();
        assert_eq!(
            value,
            Some(PropertyValue::Vector(vec![
                PropertyValue::U16(10),
                PropertyValue::U16(20),
                PropertyValue::U16(30),
            ]))
        );
    }

    #[test]
    fn test_vector_of_wide_strings() {
        let items = vec![
            PropertyValue::String("left".into()),
            PropertyValue::String("right".into()),
        ];
        let variant =
            VariantCodec::encode(&PropertyValue::Vector(items.clone()), vt::VECTOR | vt::LPWSTR).unwrap();
        assert_eq!(variant.decode().unwrap(), Some(PropertyValue::Vector(items)));
    }

    #[test]
    fn test_unsupported_tag_still_releases_once() {
        let release = CountingRelease::default();
        // VT_DISPATCH
        let result = unsafe { VariantCodec::decode_owned(raw_with(9, |_| {}), &release) };
        assert!(matches!(result, Err(AudioError::UnsupportedVariantType(9))));
        assert_eq!(release.calls.get(), 1);
    }

    #[test]
    fn test_unsupported_vector_base() {
        let raw = raw_with(vt::VECTOR | vt::BLOB, |_| {});
        let result = unsafe { VariantCodec::decode(&raw) };
        assert!(matches!(
            result,
            Err(AudioError::UnsupportedVariantType(t)) if t == vt::VECTOR | vt::BLOB
        ));
    }

    #[test]
    fn test_encode_blob_owns_storage() {
        let variant = {
            let bytes = vec![0xAAu8; 12];
            VariantCodec::encode(&PropertyValue::Blob(bytes), vt::BLOB).unwrap()
        };
        let blob = unsafe { variant.raw().payload.blob };
        assert_eq!(blob.size, 12);
        assert_eq!(variant.decode().unwrap(), Some(PropertyValue::Blob(vec![0xAA; 12])));
    }

    #[test]
    fn test_encode_rejects_mismatched_tag() {
        let result = VariantCodec::encode(&PropertyValue::String("x".into()), vt::I4);
        assert!(matches!(result, Err(AudioError::UnsupportedVariantType(t)) if t == vt::I4));
    }

    #[test]
    fn test_guid_layout() {
        let guid = Uuid::parse_str("a45c254e-df1c-4efd-8020-67d146a850e0").unwrap();
        let variant = VariantCodec::encode(&PropertyValue::Guid(guid), vt::CLSID).unwrap();
        let first = unsafe { ptr::read_unaligned(variant.raw().payload.ptr.cast::<u32>()) };
        assert_eq!(first, 0xa45c254e);
        assert_eq!(variant.decode().unwrap(), Some(PropertyValue::Guid(guid)));
    }
}
