//! Datatype layouts and the extent queries the staging protocol relies on.
//!
//! A layout is a list of `(offset, len)` byte blocks relative to the start of
//! one element, plus a lower and upper bound. The distance between the bounds
//! is the *extent*: the stride between consecutive elements. The *true* bounds
//! cover only the bytes actually touched, and may lie inside or outside the
//! nominal bounds once a type has been resized.

use crate::error::{Result, StageError};
use crate::types::DataType;
use std::sync::Arc;

/// Introspection a datatype engine must provide for staging.
pub trait TypeLayout: std::fmt::Debug + Send + Sync {
    /// Bytes of real data in one element.
    fn size(&self) -> usize;

    /// Nominal lower bound of one element.
    fn lb(&self) -> isize;

    /// Stride between consecutive elements.
    fn extent(&self) -> isize;

    /// Lowest byte offset touched by one element.
    fn true_lb(&self) -> isize;

    /// One past the highest byte offset touched by one element.
    fn true_ub(&self) -> isize;

    /// Whether `count` elements form one dense run of bytes.
    fn is_contiguous(&self) -> bool;

    /// Everything the staging protocol needs to know about `count` elements.
    fn extent_info(&self, count: usize) -> ExtentInfo {
        ExtentInfo {
            count,
            is_contiguous: self.is_contiguous(),
            packed_size: self.size().saturating_mul(count),
            extent: self.extent(),
            true_lb: self.true_lb(),
            true_ub: self.true_ub(),
        }
    }
}

/// Shared handle to a datatype layout.
pub type DatatypeHandle = Arc<dyn TypeLayout>;

/// Result of an extent query for `count` elements of a datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentInfo {
    pub count: usize,
    pub is_contiguous: bool,
    pub packed_size: usize,
    pub extent: isize,
    pub true_lb: isize,
    pub true_ub: isize,
}

impl ExtentInfo {
    /// Number of bytes a staging buffer must hold for this transfer.
    ///
    /// Contiguous data needs `extent * count`. Anything else needs
    /// `count - 1` full strides plus the true span of the last element:
    /// `extent * (count - 1) + (true_ub - true_lb)`.
    pub fn span(&self) -> Result<usize> {
        if self.count == 0 {
            return Ok(0);
        }
        let invalid = || StageError::InvalidSpan {
            count: self.count,
            extent: self.extent,
            true_lb: self.true_lb,
            true_ub: self.true_ub,
        };
        let count = isize::try_from(self.count).map_err(|_| invalid())?;
        let span = if self.is_contiguous {
            self.extent.checked_mul(count)
        } else {
            self.extent
                .checked_mul(count - 1)
                .and_then(|strides| strides.checked_add(self.true_ub - self.true_lb))
        };
        span.and_then(|s| usize::try_from(s).ok())
            .ok_or_else(invalid)
    }
}

/// A run of `len` data bytes at `offset` from the element origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: isize,
    pub len: usize,
}

impl Block {
    fn end(&self) -> isize {
        self.offset + self.len as isize
    }
}

/// A flattened datatype layout built from primitive elements.
///
/// Constructors follow the usual derived-type rules: `vector` strides in
/// units of the inner extent, `hvector`/`hindexed` in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datatype {
    blocks: Vec<Block>,
    lb: isize,
    ub: isize,
}

impl Datatype {
    /// One element of a primitive type.
    pub fn primitive(dtype: DataType) -> Self {
        Self::bytes(dtype.size_in_bytes())
    }

    /// An opaque run of `len` bytes.
    pub fn bytes(len: usize) -> Self {
        let blocks = if len > 0 {
            vec![Block { offset: 0, len }]
        } else {
            Vec::new()
        };
        Self {
            blocks,
            lb: 0,
            ub: len as isize,
        }
    }

    /// `count` copies of `inner`, back to back.
    pub fn contiguous(count: usize, inner: &Datatype) -> Self {
        Self::hvector(count, 1, inner.extent(), inner)
    }

    /// `count` blocks of `blocklen` elements, block starts `stride` elements apart.
    pub fn vector(count: usize, blocklen: usize, stride: isize, inner: &Datatype) -> Self {
        Self::hvector(count, blocklen, stride * inner.extent(), inner)
    }

    /// Like [`Datatype::vector`] with the stride given in bytes.
    pub fn hvector(count: usize, blocklen: usize, stride_bytes: isize, inner: &Datatype) -> Self {
        Self::from_displacements(
            (0..count).map(|i| (i as isize * stride_bytes, blocklen)),
            inner,
        )
    }

    /// Blocks of `blocklens[i]` elements at `displs[i]` inner extents.
    ///
    /// Extra entries in the longer of the two slices are ignored.
    pub fn indexed(blocklens: &[usize], displs: &[isize], inner: &Datatype) -> Self {
        debug_assert_eq!(blocklens.len(), displs.len());
        let extent = inner.extent();
        Self::from_displacements(
            blocklens
                .iter()
                .zip(displs)
                .map(|(&len, &d)| (d * extent, len)),
            inner,
        )
    }

    /// Like [`Datatype::indexed`] with displacements given in bytes.
    pub fn hindexed(blocklens: &[usize], byte_displs: &[isize], inner: &Datatype) -> Self {
        debug_assert_eq!(blocklens.len(), byte_displs.len());
        Self::from_displacements(
            blocklens
                .iter()
                .zip(byte_displs)
                .map(|(&len, &d)| (d, len)),
            inner,
        )
    }

    /// Same data blocks with new nominal bounds `[lb, lb + extent)`.
    pub fn resized(&self, lb: isize, extent: isize) -> Self {
        Self {
            blocks: self.blocks.clone(),
            lb,
            ub: lb + extent,
        }
    }

    /// Wrap into a shared handle for the staging protocol.
    pub fn into_handle(self) -> DatatypeHandle {
        Arc::new(self)
    }

    /// Data blocks of a single element, in type-map order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Data blocks of `count` consecutive elements.
    pub fn type_map(&self, count: usize) -> impl Iterator<Item = Block> + '_ {
        let extent = self.extent();
        (0..count).flat_map(move |i| {
            self.blocks.iter().map(move |b| Block {
                offset: b.offset + i as isize * extent,
                len: b.len,
            })
        })
    }

    fn from_displacements(
        displs: impl Iterator<Item = (isize, usize)>,
        inner: &Datatype,
    ) -> Self {
        let extent = inner.extent();
        let mut blocks: Vec<Block> = Vec::new();
        let mut bounds: Option<(isize, isize)> = None;

        for (disp, blocklen) in displs {
            for j in 0..blocklen {
                let base = disp + j as isize * extent;
                for b in &inner.blocks {
                    push_block(
                        &mut blocks,
                        Block {
                            offset: base + b.offset,
                            len: b.len,
                        },
                    );
                }
                let (lo, hi) = (base + inner.lb, base + inner.ub);
                bounds = Some(match bounds {
                    Some((l, u)) => (l.min(lo), u.max(hi)),
                    None => (lo, hi),
                });
            }
        }

        let (lb, ub) = bounds.unwrap_or((0, 0));
        Self { blocks, lb, ub }
    }

    /// True when the blocks cover `[true_lb, true_ub)` exactly once.
    fn is_dense(&self) -> bool {
        let mut sorted = self.blocks.clone();
        sorted.sort_by_key(|b| b.offset);
        sorted.windows(2).all(|w| w[0].end() == w[1].offset)
    }
}

/// Append `block`, merging it into the previous one when they abut.
fn push_block(blocks: &mut Vec<Block>, block: Block) {
    if block.len == 0 {
        return;
    }
    if let Some(last) = blocks.last_mut()
        && last.end() == block.offset
    {
        last.len += block.len;
        return;
    }
    blocks.push(block);
}

impl TypeLayout for Datatype {
    fn size(&self) -> usize {
        self.blocks.iter().map(|b| b.len).sum()
    }

    fn lb(&self) -> isize {
        self.lb
    }

    fn extent(&self) -> isize {
        self.ub - self.lb
    }

    fn true_lb(&self) -> isize {
        self.blocks.iter().map(|b| b.offset).min().unwrap_or(0)
    }

    fn true_ub(&self) -> isize {
        self.blocks.iter().map(Block::end).max().unwrap_or(0)
    }

    fn is_contiguous(&self) -> bool {
        self.size() as isize == self.extent() && self.true_lb() == self.lb && self.is_dense()
    }
}

impl From<DataType> for Datatype {
    fn from(dtype: DataType) -> Self {
        Self::primitive(dtype)
    }
}
