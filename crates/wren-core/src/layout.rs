use crate::error::{Error, Result};

// MemoryLayout — Padded, strided, permutable placement of a tensor in memory
//
// A layout describes where every *active* element of a tensor lives inside a
// flat buffer. Per physical dimension it records:
//
//   size      — number of active elements
//   extent    — number of allocated elements (size plus padding)
//   offset    — padding before the active region
//   increment — distance in elements between neighbours along that dimension
//
// All four vectors are stored in PHYSICAL order, outermost first. The
// `order` vector maps physical → logical: `order[p]` is the logical dimension
// stored at physical position `p`. A row-major matrix has order [0, 1]; the
// same matrix stored column-major has order [1, 0], with the column index
// outermost in memory.
//
// Coordinates handed to `flat_offset` are LOGICAL. The flat position is
//
//     Σ_p (coord[order[p]] + offset[p]) × increment[p]
//
// so padding is skipped automatically: coordinate 0 addresses the first
// active element, not the first allocated one.
//
// Layouts are immutable values. Slicing or resizing returns a new layout and
// leaves the original untouched.
//
// INVARIANTS (checked at construction, violations are invalid-argument):
//   - offset[p] + size[p] ≤ extent[p]
//   - order is a permutation of 0..D

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryLayout {
    size: Vec<usize>,
    extent: Vec<usize>,
    offset: Vec<usize>,
    increment: Vec<usize>,
    order: Vec<usize>,
}

impl MemoryLayout {
    /// Compact row-major layout with the given active sizes.
    pub fn new(sizes: &[usize]) -> Self {
        let rank = sizes.len();
        MemoryLayout {
            size: sizes.to_vec(),
            extent: sizes.to_vec(),
            offset: vec![0; rank],
            increment: increments_for(sizes),
            order: (0..rank).collect(),
        }
    }

    /// The rank-0 layout of a single element.
    pub fn scalar() -> Self {
        MemoryLayout::new(&[])
    }

    /// Layout with padding. All three slices are in physical (= logical)
    /// order and must have the same length.
    pub fn with_padding(sizes: &[usize], extents: &[usize], offsets: &[usize]) -> Result<Self> {
        let rank = sizes.len();
        MemoryLayout::with_order(sizes, extents, offsets, &(0..rank).collect::<Vec<_>>())
    }

    /// Fully general constructor. `sizes`, `extents`, `offsets` are in
    /// physical order; `order[p]` names the logical dimension at position p.
    pub fn with_order(
        sizes: &[usize],
        extents: &[usize],
        offsets: &[usize],
        order: &[usize],
    ) -> Result<Self> {
        let increments = increments_for(extents);
        MemoryLayout::from_parts(sizes, extents, offsets, &increments, order)
    }

    /// Column-major matrix: logical [rows, cols], with columns outermost.
    pub fn column_major(rows: usize, cols: usize) -> Self {
        MemoryLayout {
            size: vec![cols, rows],
            extent: vec![cols, rows],
            offset: vec![0, 0],
            increment: vec![rows, 1],
            order: vec![1, 0],
        }
    }

    fn from_parts(
        sizes: &[usize],
        extents: &[usize],
        offsets: &[usize],
        increments: &[usize],
        order: &[usize],
    ) -> Result<Self> {
        let rank = sizes.len();
        if extents.len() != rank
            || offsets.len() != rank
            || increments.len() != rank
            || order.len() != rank
        {
            return Err(Error::invalid_argument(format!(
                "layout component lengths differ: size {}, extent {}, offset {}, order {}",
                rank,
                extents.len(),
                offsets.len(),
                order.len()
            )));
        }
        for p in 0..rank {
            if offsets[p] + sizes[p] > extents[p] {
                return Err(Error::invalid_argument(format!(
                    "dimension {}: offset {} + size {} exceeds extent {}",
                    p, offsets[p], sizes[p], extents[p]
                )));
            }
        }
        let mut seen = vec![false; rank];
        for &l in order {
            if l >= rank || seen[l] {
                return Err(Error::invalid_argument(format!(
                    "dimension order {:?} is not a permutation of 0..{}",
                    order, rank
                )));
            }
            seen[l] = true;
        }
        Ok(MemoryLayout {
            size: sizes.to_vec(),
            extent: extents.to_vec(),
            offset: offsets.to_vec(),
            increment: increments.to_vec(),
            order: order.to_vec(),
        })
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.size.len()
    }

    /// Active sizes in physical order.
    pub fn sizes(&self) -> &[usize] {
        &self.size
    }

    pub fn extents(&self) -> &[usize] {
        &self.extent
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offset
    }

    pub fn increments(&self) -> &[usize] {
        &self.increment
    }

    /// `order[physical] = logical`.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    fn check_dim(&self, dim: usize) -> Result<()> {
        if dim >= self.rank() {
            return Err(Error::invalid_argument(format!(
                "dimension {} out of range for layout of rank {}",
                dim,
                self.rank()
            )));
        }
        Ok(())
    }

    pub fn active_size(&self, physical_dim: usize) -> Result<usize> {
        self.check_dim(physical_dim)?;
        Ok(self.size[physical_dim])
    }

    pub fn logical_active_size(&self, logical_dim: usize) -> Result<usize> {
        let p = self.physical_dimension(logical_dim)?;
        Ok(self.size[p])
    }

    /// Increment (stride) of a logical dimension.
    pub fn logical_increment(&self, logical_dim: usize) -> Result<usize> {
        let p = self.physical_dimension(logical_dim)?;
        Ok(self.increment[p])
    }

    /// Active sizes in logical order.
    pub fn logical_sizes(&self) -> Vec<usize> {
        let mut out = vec![0; self.rank()];
        for (p, &l) in self.order.iter().enumerate() {
            out[l] = self.size[p];
        }
        out
    }

    /// Physical position of a logical dimension (inverse of `order`).
    pub fn physical_dimension(&self, logical_dim: usize) -> Result<usize> {
        self.check_dim(logical_dim)?;
        self.order
            .iter()
            .position(|&l| l == logical_dim)
            .ok_or_else(|| Error::invalid_argument("corrupt dimension order"))
    }

    pub fn logical_dimension(&self, physical_dim: usize) -> Result<usize> {
        self.check_dim(physical_dim)?;
        Ok(self.order[physical_dim])
    }

    /// Product of the active sizes (1 for rank 0).
    pub fn num_elements(&self) -> usize {
        self.size.iter().product()
    }

    /// Number of elements spanned by the extents, padding included.
    pub fn memory_size(&self) -> usize {
        if self.rank() == 0 {
            return 1;
        }
        if self.extent.iter().any(|&e| e == 0) {
            return 0;
        }
        self.extent
            .iter()
            .zip(&self.increment)
            .map(|(&e, &inc)| (e - 1) * inc)
            .sum::<usize>()
            + 1
    }

    /// Number of elements from the start of the buffer up to and including
    /// the last active element. 0 for an empty layout.
    pub fn span(&self) -> usize {
        if self.num_elements() == 0 {
            return 0;
        }
        (0..self.rank())
            .map(|p| (self.offset[p] + self.size[p] - 1) * self.increment[p])
            .sum::<usize>()
            + 1
    }

    /// Flat element position of the given logical coordinates.
    pub fn flat_offset(&self, logical: &[usize]) -> Result<usize> {
        if logical.len() != self.rank() {
            return Err(Error::invalid_argument(format!(
                "expected {} coordinates, got {}",
                self.rank(),
                logical.len()
            )));
        }
        Ok((0..self.rank())
            .map(|p| (logical[self.order[p]] + self.offset[p]) * self.increment[p])
            .sum())
    }

    /// Drop one physical dimension, keeping the increments of the others.
    ///
    /// The result addresses the remaining dimensions relative to a base that
    /// the caller has already advanced to the selected entry (offsets
    /// included), so its own offsets are zero. Logical dimensions above the
    /// removed one are renumbered down by one.
    pub fn slice_layout(&self, physical_dim: usize) -> Result<MemoryLayout> {
        self.check_dim(physical_dim)?;
        let removed = self.order[physical_dim];
        let keep = |v: &[usize]| -> Vec<usize> {
            v.iter()
                .enumerate()
                .filter(|(p, _)| *p != physical_dim)
                .map(|(_, &x)| x)
                .collect()
        };
        let sizes = keep(&self.size);
        let extents = keep(&self.extent);
        let increments = keep(&self.increment);
        let order: Vec<usize> = keep(&self.order)
            .into_iter()
            .map(|l| if l > removed { l - 1 } else { l })
            .collect();
        let offsets = vec![0; sizes.len()];
        MemoryLayout::from_parts(&sizes, &extents, &offsets, &increments, &order)
    }

    /// Same placement with new active sizes (logical order) and zero offsets.
    /// Used for sub-views whose base already points at the first element.
    pub fn sub_layout(&self, logical_sizes: &[usize]) -> Result<MemoryLayout> {
        if logical_sizes.len() != self.rank() {
            return Err(Error::invalid_argument(format!(
                "expected {} sizes, got {}",
                self.rank(),
                logical_sizes.len()
            )));
        }
        let sizes: Vec<usize> = self.order.iter().map(|&l| logical_sizes[l]).collect();
        let offsets = vec![0; sizes.len()];
        MemoryLayout::from_parts(&sizes, &self.extent, &offsets, &self.increment, &self.order)
    }

    /// Compact row-major layout with the same logical sizes.
    pub fn compact(&self) -> MemoryLayout {
        MemoryLayout::new(&self.logical_sizes())
    }

    /// True when the layout is the compact row-major layout of its sizes.
    pub fn is_contiguous(&self) -> bool {
        *self == MemoryLayout::new(&self.logical_sizes())
    }

    /// Iterator over the flat positions of all active elements, in logical
    /// row-major order.
    pub fn flat_offsets(&self) -> FlatOffsets {
        FlatOffsets::new(self)
    }
}

/// Row-major increments over `extents`.
fn increments_for(extents: &[usize]) -> Vec<usize> {
    let mut inc = vec![1; extents.len()];
    for p in (0..extents.len().saturating_sub(1)).rev() {
        inc[p] = inc[p + 1] * extents[p + 1];
    }
    inc
}

// FlatOffsets — Walks the active region of a layout
//
// Logical coordinates advance rightmost-first; each one is converted through
// `order`, `offset`, and `increment` in the same way as `flat_offset`.

pub struct FlatOffsets {
    current: Vec<usize>,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    base: usize,
    remaining: usize,
    started: bool,
}

impl FlatOffsets {
    fn new(layout: &MemoryLayout) -> Self {
        let rank = layout.rank();
        let mut strides = vec![0; rank];
        let mut base = 0;
        for p in 0..rank {
            strides[layout.order[p]] = layout.increment[p];
            base += layout.offset[p] * layout.increment[p];
        }
        FlatOffsets {
            current: vec![0; rank],
            sizes: layout.logical_sizes(),
            strides,
            base,
            remaining: layout.num_elements(),
            started: false,
        }
    }

    fn advance(&mut self) {
        for i in (0..self.sizes.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.sizes[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for FlatOffsets {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(
            self.base
                + self
                    .current
                    .iter()
                    .zip(&self.strides)
                    .map(|(c, s)| c * s)
                    .sum::<usize>(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for FlatOffsets {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_layout() {
        let l = MemoryLayout::new(&[2, 3, 4]);
        assert_eq!(l.increments(), &[12, 4, 1]);
        assert_eq!(l.num_elements(), 24);
        assert_eq!(l.memory_size(), 24);
        assert!(l.is_contiguous());
        assert_eq!(l.flat_offset(&[1, 2, 3]).unwrap(), 23);
    }

    #[test]
    fn test_scalar_layout() {
        let l = MemoryLayout::scalar();
        assert_eq!(l.num_elements(), 1);
        assert_eq!(l.memory_size(), 1);
        assert_eq!(l.flat_offset(&[]).unwrap(), 0);
    }

    #[test]
    fn test_padding_skipped() {
        // 2x2 active inside 4x4 with one element of padding on each side
        let l = MemoryLayout::with_padding(&[2, 2], &[4, 4], &[1, 1]).unwrap();
        assert_eq!(l.memory_size(), 16);
        assert_eq!(l.flat_offset(&[0, 0]).unwrap(), 5);
        assert_eq!(l.flat_offset(&[1, 1]).unwrap(), 10);
        assert_eq!(l.flat_offsets().collect::<Vec<_>>(), vec![5, 6, 9, 10]);
        assert!(!l.is_contiguous());
    }

    #[test]
    fn test_padding_overflow_rejected() {
        let r = MemoryLayout::with_padding(&[3], &[4], &[2]);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_order_must_be_permutation() {
        let r = MemoryLayout::with_order(&[2, 2], &[2, 2], &[0, 0], &[0, 0]);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
        let r = MemoryLayout::with_order(&[2, 2], &[2, 2], &[0, 0], &[0, 2]);
        assert!(r.is_err());
    }

    #[test]
    fn test_dimension_out_of_range() {
        let l = MemoryLayout::new(&[2, 3]);
        assert!(matches!(l.active_size(2), Err(Error::InvalidArgument(_))));
        assert!(l.physical_dimension(5).is_err());
    }

    #[test]
    fn test_inverse_permutation() {
        let l = MemoryLayout::with_order(&[4, 3, 2], &[4, 3, 2], &[0, 0, 0], &[2, 0, 1]).unwrap();
        for p in 0..3 {
            let logical = l.logical_dimension(p).unwrap();
            assert_eq!(l.physical_dimension(logical).unwrap(), p);
        }
        assert_eq!(l.logical_sizes(), vec![3, 2, 4]);
        assert_eq!(l.num_elements(), 24);
    }

    #[test]
    fn test_column_major() {
        let l = MemoryLayout::column_major(2, 3);
        assert_eq!(l.logical_sizes(), vec![2, 3]);
        // element (r, c) lives at c * rows + r
        assert_eq!(l.flat_offset(&[1, 0]).unwrap(), 1);
        assert_eq!(l.flat_offset(&[0, 2]).unwrap(), 4);
        assert_eq!(l.flat_offsets().collect::<Vec<_>>(), vec![0, 2, 4, 1, 3, 5]);
    }

    #[test]
    fn test_slice_keeps_increments() {
        let l = MemoryLayout::new(&[3, 4]);
        // drop rows → a row vector with stride 1
        let row = l.slice_layout(0).unwrap();
        assert_eq!(row.sizes(), &[4]);
        assert_eq!(row.increments(), &[1]);
        // drop columns → a column vector with stride 4
        let col = l.slice_layout(1).unwrap();
        assert_eq!(col.sizes(), &[3]);
        assert_eq!(col.increments(), &[4]);
        assert_eq!(col.flat_offset(&[2]).unwrap(), 8);
        // the original is unchanged
        assert_eq!(l.rank(), 2);
    }

    #[test]
    fn test_slice_renumbers_order() {
        let l = MemoryLayout::column_major(2, 3);
        // physical 0 holds logical 1 (columns); dropping it leaves rows
        let col = l.slice_layout(0).unwrap();
        assert_eq!(col.order(), &[0]);
        assert_eq!(col.increments(), &[1]);
    }

    #[test]
    fn test_sub_layout_span() {
        let l = MemoryLayout::new(&[4, 4]);
        let sub = l.sub_layout(&[2, 2]).unwrap();
        assert_eq!(sub.num_elements(), 4);
        assert_eq!(sub.span(), 6);
        assert_eq!(sub.flat_offsets().collect::<Vec<_>>(), vec![0, 1, 4, 5]);
        let empty = l.sub_layout(&[0, 4]).unwrap();
        assert_eq!(empty.span(), 0);
    }
}
