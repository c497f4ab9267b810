use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::MemoryLayout;
use crate::literal::Literal;

// Storage — Typed flat element buffer
//
// One variant per DType. Storage never knows about layouts; it is addressed
// by flat element position only. Values wrap it in an Arc<RwLock<..>> so that
// views (rows, sub-vectors, scalar elements) can alias the same memory.

#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! storage_dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            Storage::Bool($v) => $body,
            Storage::U8($v) => $body,
            Storage::I32($v) => $body,
            Storage::I64($v) => $body,
            Storage::F32($v) => $body,
            Storage::F64($v) => $body,
        }
    };
}

impl Storage {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Bool => Storage::Bool(vec![false; len]),
            DType::U8 => Storage::U8(vec![0; len]),
            DType::I32 => Storage::I32(vec![0; len]),
            DType::I64 => Storage::I64(vec![0; len]),
            DType::F32 => Storage::F32(vec![0.0; len]),
            DType::F64 => Storage::F64(vec![0.0; len]),
        }
    }

    pub fn from_f64(dtype: DType, data: &[f64]) -> Self {
        match dtype {
            DType::Bool => Storage::Bool(data.iter().map(|&v| v != 0.0).collect()),
            DType::U8 => Storage::U8(data.iter().map(|&v| v as u8).collect()),
            DType::I32 => Storage::I32(data.iter().map(|&v| v as i32).collect()),
            DType::I64 => Storage::I64(data.iter().map(|&v| v as i64).collect()),
            DType::F32 => Storage::F32(data.iter().map(|&v| v as f32).collect()),
            DType::F64 => Storage::F64(data.to_vec()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Storage::Bool(_) => DType::Bool,
            Storage::U8(_) => DType::U8,
            Storage::I32(_) => DType::I32,
            Storage::I64(_) => DType::I64,
            Storage::F32(_) => DType::F32,
            Storage::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        storage_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Literal> {
        self.check_index(index)?;
        Ok(match self {
            Storage::Bool(v) => Literal::Bool(v[index]),
            Storage::U8(v) => Literal::U8(v[index]),
            Storage::I32(v) => Literal::I32(v[index]),
            Storage::I64(v) => Literal::I64(v[index]),
            Storage::F32(v) => Literal::F32(v[index]),
            Storage::F64(v) => Literal::F64(v[index]),
        })
    }

    /// Write one element. The literal must have the storage's element type.
    pub fn set(&mut self, index: usize, lit: Literal) -> Result<()> {
        self.check_index(index)?;
        match (self, lit) {
            (Storage::Bool(v), Literal::Bool(x)) => v[index] = x,
            (Storage::U8(v), Literal::U8(x)) => v[index] = x,
            (Storage::I32(v), Literal::I32(x)) => v[index] = x,
            (Storage::I64(v), Literal::I64(x)) => v[index] = x,
            (Storage::F32(v), Literal::F32(x)) => v[index] = x,
            (Storage::F64(v), Literal::F64(x)) => v[index] = x,
            (s, lit) => return Err(Error::dtype_mismatch(s.dtype(), lit.dtype())),
        }
        Ok(())
    }

    /// memmove within one buffer.
    pub fn copy_within(&mut self, src: usize, dst: usize, count: usize) -> Result<()> {
        let len = self.len();
        if src + count > len || dst + count > len {
            return Err(Error::IndexOutOfRange {
                index: src.max(dst) + count,
                len,
            });
        }
        storage_dispatch!(self, v => v.copy_within(src..src + count, dst));
        Ok(())
    }

    /// Copy `count` elements from another buffer of the same type.
    pub fn copy_from(&mut self, dst: usize, other: &Storage, src: usize, count: usize) -> Result<()> {
        if self.dtype() != other.dtype() {
            return Err(Error::dtype_mismatch(self.dtype(), other.dtype()));
        }
        if src + count > other.len() || dst + count > self.len() {
            return Err(Error::IndexOutOfRange {
                index: (src + count).max(dst + count),
                len: self.len().min(other.len()),
            });
        }
        match (self, other) {
            (Storage::Bool(d), Storage::Bool(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            (Storage::U8(d), Storage::U8(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            (Storage::I32(d), Storage::I32(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            (Storage::I64(d), Storage::I64(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            (Storage::F32(d), Storage::F32(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            (Storage::F64(d), Storage::F64(s)) => d[dst..dst + count].copy_from_slice(&s[src..src + count]),
            _ => unreachable!("element types checked above"),
        }
        Ok(())
    }

    pub fn fill_zero(&mut self) {
        let dtype = self.dtype();
        let len = self.len();
        *self = Storage::zeros(dtype, len);
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Storage::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Storage::U8(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::I32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::I64(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::F64(v) => v.clone(),
        }
    }

    /// Little-endian image of the whole buffer.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Storage::Bool(v) => v.iter().map(|&b| b as u8).collect(),
            Storage::U8(v) => v.clone(),
            Storage::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Storage::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        let width = dtype.size_in_bytes();
        if bytes.len() % width != 0 {
            return Err(Error::Execution(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        let mut out = Storage::zeros(dtype, bytes.len() / width);
        for (i, chunk) in bytes.chunks(width).enumerate() {
            out.set(i, Literal::from_le_bytes(dtype, chunk)?)?;
        }
        Ok(out)
    }
}

/// Shared handle to a storage buffer.
#[derive(Debug, Clone)]
pub struct SharedStorage(Arc<RwLock<Storage>>);

impl SharedStorage {
    pub fn new(storage: Storage) -> Self {
        SharedStorage(Arc::new(RwLock::new(storage)))
    }

    /// A poisoned lock still holds valid elements; recover it.
    pub fn read(&self) -> RwLockReadGuard<'_, Storage> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Storage> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &SharedStorage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity of the buffer, used to cache embeddings.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// Handle to memory owned by an emitting context (a pointer register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location(pub u32);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Where the elements of a value live.
#[derive(Debug, Clone)]
pub enum ValueData {
    /// Not bound to any memory yet.
    Empty,
    /// Host memory; `offset` is the element position of the value's base.
    Host { storage: SharedStorage, offset: usize },
    /// Memory of emitted code.
    Emitted(Location),
}

// Value — Typed, layout-aware handle to memory
//
// A Value is what flows between nodes and through every overlay. Three facts
// describe it:
//
//   dtype  — element type, or unset for a placeholder
//   data   — host storage, an emitted location, or nothing
//   layout — how the elements are arranged, or unset ("unconstrained")
//
// Cloning a Value clones the handle: both copies alias the same memory.
// Copying the elements into fresh storage goes through `functions::copy` or
// `Value::duplicate`.
//
// Offsetting a value (`EmitterContext::offset`) produces an unconstrained
// value whose base is the addressed element. The caller attaches whatever
// layout describes the view it is building.

#[derive(Debug, Clone)]
pub struct Value {
    dtype: Option<DType>,
    layout: Option<MemoryLayout>,
    data: ValueData,
}

impl Value {
    /// Undefined placeholder.
    pub fn empty() -> Self {
        Value {
            dtype: None,
            layout: None,
            data: ValueData::Empty,
        }
    }

    /// Fresh, zero-filled host storage covering `layout.memory_size()`.
    pub fn allocate(dtype: DType, layout: MemoryLayout) -> Self {
        let storage = Storage::zeros(dtype, layout.memory_size());
        Value {
            dtype: Some(dtype),
            layout: Some(layout),
            data: ValueData::Host {
                storage: SharedStorage::new(storage),
                offset: 0,
            },
        }
    }

    /// Bind caller data without copying it.
    pub fn wrap<T: WithDType>(data: Vec<T>, layout: MemoryLayout) -> Result<Self>
    where
        Vec<T>: Into<Storage>,
    {
        Value::from_storage(data.into(), layout)
    }

    pub fn from_storage(storage: Storage, layout: MemoryLayout) -> Result<Self> {
        Value::from_shared(SharedStorage::new(storage), 0, layout)
    }

    /// View over existing shared storage.
    pub fn from_shared(storage: SharedStorage, offset: usize, layout: MemoryLayout) -> Result<Self> {
        let (dtype, len) = {
            let s = storage.read();
            (s.dtype(), s.len())
        };
        check_fits(&layout, offset, len)?;
        Ok(Value {
            dtype: Some(dtype),
            layout: Some(layout),
            data: ValueData::Host { storage, offset },
        })
    }

    /// Compact rank-1 value copied from a slice.
    pub fn from_slice<T: WithDType>(data: &[T]) -> Self
    where
        Vec<T>: Into<Storage>,
    {
        let layout = MemoryLayout::new(&[data.len()]);
        let storage: Storage = data.to_vec().into();
        Value {
            dtype: Some(T::DTYPE),
            layout: Some(layout),
            data: ValueData::Host {
                storage: SharedStorage::new(storage),
                offset: 0,
            },
        }
    }

    /// Compact value of any shape from f64 data (converted to `dtype`).
    pub fn from_f64(dtype: DType, data: &[f64], layout: MemoryLayout) -> Result<Self> {
        Value::from_storage(Storage::from_f64(dtype, data), layout)
    }

    /// Rank-0 host value holding one literal.
    pub fn from_literal(lit: Literal) -> Self {
        let mut storage = Storage::zeros(lit.dtype(), 1);
        // a one-element buffer of the literal's own type always accepts it
        let _ = storage.set(0, lit);
        Value {
            dtype: Some(lit.dtype()),
            layout: Some(MemoryLayout::scalar()),
            data: ValueData::Host {
                storage: SharedStorage::new(storage),
                offset: 0,
            },
        }
    }

    /// Value bound to emitted memory.
    pub fn emitted(dtype: DType, location: Location, layout: Option<MemoryLayout>) -> Self {
        Value {
            dtype: Some(dtype),
            layout,
            data: ValueData::Emitted(location),
        }
    }

    pub fn base_type(&self) -> Option<DType> {
        self.dtype
    }

    /// Element type; invalid-argument for an undefined value.
    pub fn dtype(&self) -> Result<DType> {
        self.dtype
            .ok_or_else(|| Error::invalid_argument("value has no element type"))
    }

    /// Layout; invalid-argument for an unconstrained value.
    pub fn layout(&self) -> Result<&MemoryLayout> {
        self.layout
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("value has no layout"))
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn is_defined(&self) -> bool {
        self.dtype.is_some() && !matches!(self.data, ValueData::Empty)
    }

    pub fn is_constrained(&self) -> bool {
        self.layout.is_some()
    }

    pub fn is_host(&self) -> bool {
        matches!(self.data, ValueData::Host { .. })
    }

    pub fn location(&self) -> Option<Location> {
        match self.data {
            ValueData::Emitted(loc) => Some(loc),
            _ => None,
        }
    }

    /// Storage and base offset of a host value.
    pub fn host(&self) -> Option<(&SharedStorage, usize)> {
        match &self.data {
            ValueData::Host { storage, offset } => Some((storage, *offset)),
            _ => None,
        }
    }

    fn host_or_err(&self) -> Result<(&SharedStorage, usize)> {
        self.host()
            .ok_or_else(|| Error::invalid_argument("value is not bound to host memory"))
    }

    /// Ensure the value is usable by shape-sensitive operations.
    pub fn check_ready(&self) -> Result<&MemoryLayout> {
        if !self.is_defined() {
            return Err(Error::invalid_argument("value is undefined"));
        }
        self.layout()
    }

    /// Attach a layout. For host values the layout must fit the storage that
    /// remains from the base offset.
    pub fn set_layout(&mut self, layout: MemoryLayout) -> Result<()> {
        if let ValueData::Host { storage, offset } = &self.data {
            check_fits(&layout, *offset, storage.read().len())?;
        }
        self.layout = Some(layout);
        Ok(())
    }

    pub fn with_layout(mut self, layout: MemoryLayout) -> Result<Self> {
        self.set_layout(layout)?;
        Ok(self)
    }

    pub fn clear_layout(&mut self) {
        self.layout = None;
    }

    /// Host value whose base is moved forward by `elements`; unconstrained.
    pub fn advanced(&self, elements: usize) -> Result<Value> {
        let (storage, offset) = self.host_or_err()?;
        let len = storage.read().len();
        if offset + elements > len {
            return Err(Error::IndexOutOfRange {
                index: offset + elements,
                len,
            });
        }
        Ok(Value {
            dtype: self.dtype,
            layout: None,
            data: ValueData::Host {
                storage: storage.clone(),
                offset: offset + elements,
            },
        })
    }

    /// Element at flat position `index` relative to the base.
    pub fn get_flat(&self, index: usize) -> Result<Literal> {
        let (storage, offset) = self.host_or_err()?;
        let guard = storage.read();
        guard.get(offset + index)
    }

    pub fn set_flat(&self, index: usize, lit: Literal) -> Result<()> {
        let (storage, offset) = self.host_or_err()?;
        let mut guard = storage.write();
        guard.set(offset + index, lit)
    }

    /// Element at logical coordinates.
    pub fn get(&self, coords: &[usize]) -> Result<Literal> {
        let pos = self.layout()?.flat_offset(coords)?;
        self.get_flat(pos)
    }

    pub fn set(&self, coords: &[usize], lit: Literal) -> Result<()> {
        let pos = self.layout()?.flat_offset(coords)?;
        self.set_flat(pos, lit)
    }

    /// The rank-0 element of a scalar host value.
    pub fn literal(&self) -> Result<Literal> {
        self.get_flat(self.layout()?.flat_offset(&[])?)
    }

    /// Active elements in logical row-major order, as f64.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let layout = self.check_ready()?;
        let (storage, offset) = self.host_or_err()?;
        let guard = storage.read();
        layout
            .flat_offsets()
            .map(|pos| guard.get(offset + pos).map(|lit| lit.to_f64()))
            .collect()
    }

    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        let layout = self.check_ready()?;
        let (storage, offset) = self.host_or_err()?;
        let guard = storage.read();
        layout
            .flat_offsets()
            .map(|pos| guard.get(offset + pos).map(T::from_literal))
            .collect()
    }

    /// Active elements in logical row-major order, in their own type.
    pub fn to_storage(&self) -> Result<Storage> {
        let layout = self.check_ready()?;
        let (storage, offset) = self.host_or_err()?;
        let guard = storage.read();
        let mut out = Storage::zeros(guard.dtype(), layout.num_elements());
        for (i, pos) in layout.flat_offsets().enumerate() {
            out.set(i, guard.get(offset + pos)?)?;
        }
        Ok(out)
    }

    /// Overwrite the active elements from a buffer of the same type.
    pub fn copy_from_storage(&self, data: &Storage) -> Result<()> {
        let layout = self.check_ready()?;
        let dtype = self.dtype()?;
        if data.dtype() != dtype {
            return Err(Error::dtype_mismatch(dtype, data.dtype()));
        }
        if data.len() != layout.num_elements() {
            return Err(Error::SizeMismatch {
                expected: layout.logical_sizes(),
                got: vec![data.len()],
            });
        }
        let (storage, offset) = self.host_or_err()?;
        let mut guard = storage.write();
        for (i, pos) in layout.flat_offsets().enumerate() {
            guard.set(offset + pos, data.get(i)?)?;
        }
        Ok(())
    }

    /// Overwrite the active elements with f64 data (converted).
    pub fn copy_from_f64(&self, data: &[f64]) -> Result<()> {
        let layout = self.check_ready()?;
        if data.len() != layout.num_elements() {
            return Err(Error::SizeMismatch {
                expected: layout.logical_sizes(),
                got: vec![data.len()],
            });
        }
        let dtype = self.dtype()?;
        let (storage, offset) = self.host_or_err()?;
        let mut guard = storage.write();
        for (pos, &v) in layout.flat_offsets().zip(data) {
            guard.set(offset + pos, Literal::from_f64(dtype, v))?;
        }
        Ok(())
    }

    /// Zero the whole underlying host buffer.
    pub fn fill_zero(&self) -> Result<()> {
        let (storage, _) = self.host_or_err()?;
        storage.write().fill_zero();
        Ok(())
    }

    /// Deep copy: independent storage, same dtype, offset, and layout.
    pub fn duplicate(&self) -> Value {
        let data = match &self.data {
            ValueData::Host { storage, offset } => ValueData::Host {
                storage: SharedStorage::new(storage.read().clone()),
                offset: *offset,
            },
            other => other.clone(),
        };
        Value {
            dtype: self.dtype,
            layout: self.layout.clone(),
            data,
        }
    }

    /// True when both values alias the same host buffer.
    pub fn same_storage(&self, other: &Value) -> bool {
        match (self.host(), other.host()) {
            (Some((a, _)), Some((b, _))) => a.ptr_eq(b),
            _ => false,
        }
    }
}

fn check_fits(layout: &MemoryLayout, offset: usize, len: usize) -> Result<()> {
    let needed = offset + layout.span();
    if needed > len {
        return Err(Error::InvalidArgument(format!(
            "layout spans {} elements from offset {}, storage holds {}",
            layout.span(),
            offset,
            len
        )));
    }
    Ok(())
}

macro_rules! impl_storage_from {
    ($ty:ty, $variant:ident) => {
        impl From<Vec<$ty>> for Storage {
            fn from(v: Vec<$ty>) -> Self {
                Storage::$variant(v)
            }
        }
    };
}

impl_storage_from!(bool, Bool);
impl_storage_from!(u8, U8);
impl_storage_from!(i32, I32);
impl_storage_from!(i64, I64);
impl_storage_from!(f32, F32);
impl_storage_from!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zero_filled() {
        let v = Value::allocate(DType::F32, MemoryLayout::new(&[2, 3]));
        assert!(v.is_defined());
        assert!(v.is_constrained());
        assert_eq!(v.to_f64_vec().unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_wrap_shares_handle() {
        let v = Value::wrap(vec![1.0f32, 2.0, 3.0], MemoryLayout::new(&[3])).unwrap();
        let alias = v.clone();
        alias.set(&[1], Literal::F32(9.0)).unwrap();
        assert_eq!(v.to_vec::<f32>().unwrap(), vec![1.0, 9.0, 3.0]);
        assert!(v.same_storage(&alias));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let v = Value::from_slice(&[1i32, 2, 3]);
        let copy = v.duplicate();
        copy.set(&[0], Literal::I32(7)).unwrap();
        assert_eq!(v.to_vec::<i32>().unwrap(), vec![1, 2, 3]);
        assert!(!v.same_storage(&copy));
    }

    #[test]
    fn test_wrap_too_small() {
        let r = Value::wrap(vec![1.0f64, 2.0], MemoryLayout::new(&[3]));
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_set_layout_checks_remaining_storage() {
        let v = Value::from_slice(&[0.0f32; 6]);
        let mut tail = v.advanced(4).unwrap();
        assert!(!tail.is_constrained());
        assert!(tail.set_layout(MemoryLayout::new(&[3])).is_err());
        tail.set_layout(MemoryLayout::new(&[2])).unwrap();
        tail.set(&[1], Literal::F32(5.0)).unwrap();
        assert_eq!(v.get(&[5]).unwrap(), Literal::F32(5.0));
    }

    #[test]
    fn test_type_checked_store() {
        let v = Value::from_slice(&[1u8, 2]);
        let r = v.set(&[0], Literal::F32(1.0));
        assert!(matches!(r, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_undefined_rejected() {
        let v = Value::empty();
        assert!(!v.is_defined());
        assert!(matches!(v.check_ready(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_storage_le_bytes() {
        let s = Storage::I32(vec![1, -2, 3]);
        let bytes = s.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Storage::from_le_bytes(DType::I32, &bytes).unwrap(), s);

        let flags = Storage::Bool(vec![true, false, true]);
        assert_eq!(flags.to_le_bytes(), vec![1, 0, 1]);
        assert_eq!(Storage::from_le_bytes(DType::Bool, &flags.to_le_bytes()).unwrap(), flags);
    }

    #[test]
    fn test_typed_storage_copy_is_exact() {
        let big = (1i64 << 53) + 1;
        let v = Value::from_slice(&[big, -big]);
        let image = v.to_storage().unwrap();
        assert_eq!(image, Storage::I64(vec![big, -big]));

        let w = Value::allocate(DType::I64, MemoryLayout::new(&[2]));
        w.copy_from_storage(&image).unwrap();
        assert_eq!(w.to_vec::<i64>().unwrap(), vec![big, -big]);
        assert!(matches!(
            w.copy_from_storage(&Storage::F64(vec![0.0, 0.0])),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            w.copy_from_storage(&Storage::I64(vec![1])),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
