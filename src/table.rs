//! Chunked columnar storage for one archetype.
//!
//! A [`Table`] owns a list of [`Chunk`]s; each chunk is one aligned
//! allocation holding up to `capacity` rows of every column in
//! struct-of-arrays layout. Row positions are allocated through a two-phase
//! reserve/commit protocol so that many worker threads can reserve rows
//! concurrently while the actual `size` only ever changes at a single-
//! threaded commit point.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::type_registry::TypeIndex;
use crate::utils::align_to;

/// Default chunk size hint in bytes; the real chunk size is rounded up from
/// here so that at least one row fits (see [`TableLayout::new`]).
pub const DEFAULT_CHUNK_BYTES_HINT: usize = 16 * 1024;

/// One column's placement within a [`Table`].
#[derive(Debug, Clone, Copy)]
pub struct ColumnMeta {
    pub type_id: TypeIndex,
    pub size: u32,
    pub align: u32,
    /// Byte offset of this column's region within a chunk.
    pub chunk_offset: usize,
}

/// Computed row/chunk geometry for a fixed set of columns.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub columns: Vec<ColumnMeta>,
    pub row_stride: usize,
    pub max_align: usize,
    pub chunk_bytes: usize,
    pub chunk_capacity: usize,
}

impl TableLayout {
    /// Columns are placed in the order given (spec: "registration-list
    /// order"). `row_stride` is computed by packing them AoS-style purely to
    /// derive a stride value; the actual in-chunk placement is SoA (each
    /// column gets its own `capacity * size` region, itself aligned to the
    /// column's alignment), which is the concrete realization of "struct of
    /// arrays" chosen here (see DESIGN.md).
    pub fn new(mut columns: Vec<(TypeIndex, u32, u32)>, chunk_bytes_hint: usize) -> Self {
        if columns.is_empty() {
            return Self {
                columns: Vec::new(),
                row_stride: 0,
                max_align: 1,
                chunk_bytes: 0,
                chunk_capacity: usize::MAX / 2,
            };
        }
        columns.sort_by_key(|&(type_id, _, _)| type_id);

        let mut running = 0usize;
        let mut max_align = 1usize;
        for &(_, size, align) in &columns {
            let align = align.max(1) as usize;
            max_align = max_align.max(align);
            running = align_to(running, align) + size as usize;
        }
        let row_stride = align_to(running, max_align).max(1);

        let mut chunk_bytes = chunk_bytes_hint.next_power_of_two();
        while chunk_bytes / row_stride < 1 {
            chunk_bytes *= 2;
        }
        let chunk_capacity = chunk_bytes / row_stride;

        let mut metas = Vec::with_capacity(columns.len());
        let mut offset = 0usize;
        for &(type_id, size, align) in &columns {
            let align = align.max(1) as usize;
            offset = align_to(offset, align);
            metas.push(ColumnMeta {
                type_id,
                size,
                align: align as u32,
                chunk_offset: offset,
            });
            offset += chunk_capacity * size as usize;
        }

        Self {
            columns: metas,
            row_stride,
            max_align,
            chunk_bytes: offset.max(chunk_bytes),
            chunk_capacity,
        }
    }

    pub fn column_index(&self, type_id: TypeIndex) -> Option<usize> {
        self.columns.iter().position(|c| c.type_id == type_id)
    }
}

/// One aligned allocation holding up to `capacity` rows across all columns.
pub struct Chunk {
    ptr: Option<NonNull<u8>>,
    layout: Option<Layout>,
    capacity: usize,
    size: usize,
    reservation: AtomicUsize,
}

unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    fn new(table_layout: &TableLayout) -> Self {
        if table_layout.chunk_bytes == 0 {
            return Self {
                ptr: None,
                layout: None,
                capacity: table_layout.chunk_capacity,
                size: 0,
                reservation: AtomicUsize::new(0),
            };
        }
        let layout =
            Layout::from_size_align(table_layout.chunk_bytes, table_layout.max_align.max(1))
                .expect("chunk layout must be valid");
        let ptr = unsafe { alloc(layout) };
        let ptr = NonNull::new(ptr).expect("chunk allocation failed");
        Self {
            ptr: Some(ptr),
            layout: Some(layout),
            capacity: table_layout.chunk_capacity,
            size: 0,
            reservation: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn reservation(&self) -> usize {
        self.reservation.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.size + self.reservation() >= self.capacity
    }

    /// Lock-free attempt to bump the reservation counter by one row. Returns
    /// the row index the reservation will occupy once committed.
    fn try_reserve(&self) -> Option<usize> {
        let mut current = self.reservation.load(Ordering::Relaxed);
        loop {
            if self.size + current >= self.capacity {
                return None;
            }
            match self.reservation.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(self.size + current),
                Err(actual) => current = actual,
            }
        }
    }

    fn commit_reserved(&mut self) {
        self.size += self.reservation.swap(0, Ordering::AcqRel);
    }

    fn column_ptr(&self, col: &ColumnMeta) -> *mut u8 {
        let base = self.ptr.map(|p| p.as_ptr()).unwrap_or(std::ptr::null_mut());
        if base.is_null() {
            return base;
        }
        unsafe { base.add(col.chunk_offset) }
    }

    /// Raw pointer to row `row` of column `col`; valid as long as the chunk
    /// is not reallocated (chunks never grow or move once allocated).
    pub fn row_ptr(&self, col: &ColumnMeta, row: usize) -> *mut u8 {
        if col.size == 0 {
            return self.column_ptr(col);
        }
        unsafe { self.column_ptr(col).add(row * col.size as usize) }
    }

    fn swap_row(&self, col: &ColumnMeta, a: usize, b: usize) {
        if col.size == 0 || a == b {
            return;
        }
        unsafe {
            let pa = self.row_ptr(col, a);
            let pb = self.row_ptr(col, b);
            std::ptr::swap_nonoverlapping(pa, pb, col.size as usize);
        }
    }

    fn copy_row_from(
        &self,
        src: &Chunk,
        src_col: &ColumnMeta,
        dst_col: &ColumnMeta,
        src_row: usize,
        dst_row: usize,
    ) {
        debug_assert_eq!(src_col.size, dst_col.size);
        if dst_col.size == 0 {
            return;
        }
        unsafe {
            let from = src.row_ptr(src_col, src_row);
            let to = self.row_ptr(dst_col, dst_row);
            std::ptr::copy_nonoverlapping(from, to, dst_col.size as usize);
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if let (Some(ptr), Some(layout)) = (self.ptr, self.layout) {
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Chunked column storage for one archetype.
pub struct Table {
    layout: TableLayout,
    chunks: RwLock<Vec<Chunk>>,
}

/// The absolute position a reserved row will occupy once committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPos {
    pub chunk_index: usize,
    pub row_index: usize,
}

impl Table {
    pub fn new(columns: Vec<(TypeIndex, u32, u32)>) -> Self {
        Self::with_chunk_hint(columns, DEFAULT_CHUNK_BYTES_HINT)
    }

    pub fn with_chunk_hint(columns: Vec<(TypeIndex, u32, u32)>, chunk_bytes_hint: usize) -> Self {
        let layout = TableLayout::new(columns, chunk_bytes_hint);
        Self {
            layout,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn chunk_capacity(&self) -> usize {
        self.layout.chunk_capacity
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Reserves one row, allocating a new chunk if every existing chunk is
    /// full. The chunk-list scan and any chunk-creation happens under a
    /// read or (briefly, on miss) write lock; the reservation bump itself is
    /// a lock-free atomic fetch-add at the chunk level.
    pub fn reserve(&self) -> RowPos {
        {
            let chunks = self.chunks.read();
            for (i, chunk) in chunks.iter().enumerate() {
                if let Some(row) = chunk.try_reserve() {
                    return RowPos {
                        chunk_index: i,
                        row_index: row,
                    };
                }
            }
        }
        let mut chunks = self.chunks.write();
        // Re-check: another writer may have added a non-full chunk already.
        for (i, chunk) in chunks.iter().enumerate() {
            if let Some(row) = chunk.try_reserve() {
                return RowPos {
                    chunk_index: i,
                    row_index: row,
                };
            }
        }
        let chunk = Chunk::new(&self.layout);
        let row = chunk
            .try_reserve()
            .expect("freshly allocated chunk must accept at least one reservation");
        chunks.push(chunk);
        RowPos {
            chunk_index: chunks.len() - 1,
            row_index: row,
        }
    }

    pub fn commit_reserved(&self) {
        let mut chunks = self.chunks.write();
        for chunk in chunks.iter_mut() {
            chunk.commit_reserved();
        }
    }

    pub fn put(&self, col: usize, pos: RowPos, bytes: &[u8]) {
        let meta = self.layout.columns[col];
        debug_assert_eq!(bytes.len(), meta.size as usize);
        let chunks = self.chunks.read();
        let ptr = chunks[pos.chunk_index].row_ptr(&meta, pos.row_index);
        if meta.size > 0 {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, meta.size as usize) };
        }
    }

    pub fn get(&self, col: usize, pos: RowPos) -> *mut u8 {
        let meta = self.layout.columns[col];
        let chunks = self.chunks.read();
        chunks[pos.chunk_index].row_ptr(&meta, pos.row_index)
    }

    /// Copies the bytes of every column shared between `self` and `other`
    /// (by type id) from `src_pos` in `self` to `dst_pos` in `other`.
    /// Returns the number of columns copied.
    pub fn copy_common_columns_to(&self, src_pos: RowPos, other: &Table, dst_pos: RowPos) -> usize {
        let src_chunks = self.chunks.read();
        let dst_chunks = other.chunks.read();
        let src_chunk = &src_chunks[src_pos.chunk_index];
        let dst_chunk = &dst_chunks[dst_pos.chunk_index];
        let mut copied = 0;
        for src_col in &self.layout.columns {
            if let Some(dst_col) = other
                .layout
                .columns
                .iter()
                .find(|c| c.type_id == src_col.type_id)
            {
                dst_chunk.copy_row_from(
                    src_chunk,
                    src_col,
                    dst_col,
                    src_pos.row_index,
                    dst_pos.row_index,
                );
                copied += 1;
            }
        }
        copied
    }

    /// Number of committed (post-commit) rows in chunk `chunk_index`.
    /// Reserved-but-uncommitted rows are never visible through this call.
    pub fn chunk_len(&self, chunk_index: usize) -> usize {
        self.chunks.read()[chunk_index].size()
    }

    /// Pointer to the start of column `col`'s region within chunk
    /// `chunk_index` — i.e. `chunk_column_ptr[0..chunk_len(chunk_index)]` is
    /// the committed span consumed by `Archetype::iterate_data_among_chunk`.
    pub fn chunk_column_ptr(&self, col: usize, chunk_index: usize) -> *mut u8 {
        let meta = self.layout.columns[col];
        self.chunks.read()[chunk_index].row_ptr(&meta, 0)
    }

    /// Copies one column's bytes for a single row from `self` to `other`,
    /// given already-resolved column indices on both sides (the caller is
    /// expected to have consulted a cached common-column table rather than
    /// re-deriving it by type id on every call).
    pub fn copy_column_row(
        &self,
        col: usize,
        pos: RowPos,
        other: &Table,
        other_col: usize,
        other_pos: RowPos,
    ) {
        let src_chunks = self.chunks.read();
        let dst_chunks = other.chunks.read();
        let src_meta = self.layout.columns[col];
        let dst_meta = other.layout.columns[other_col];
        dst_chunks[other_pos.chunk_index].copy_row_from(
            &src_chunks[pos.chunk_index],
            &src_meta,
            &dst_meta,
            pos.row_index,
            other_pos.row_index,
        );
    }

    /// Moves the last occupied row of `chunk_index` into `hole_row`,
    /// shrinking that chunk's logical size/reservation by one. Used by hole
    /// compaction. Whether the freed slot comes out of `reservation` or
    /// `size` is decided here, based on whether the chunk still has
    /// uncommitted reservations (those always occupy the tail). Returns the
    /// absolute row index that was moved from (`None` if `hole_row` already
    /// was the last row, so nothing needed to move).
    pub fn fill_hole_from_tail(&self, chunk_index: usize, hole_row: usize) -> Option<usize> {
        let mut chunks = self.chunks.write();
        let chunk = &mut chunks[chunk_index];
        let reservation = chunk.reservation.load(Ordering::Relaxed);
        let last = chunk.size + reservation - 1;
        if hole_row != last {
            for col in &self.layout.columns {
                chunk.swap_row(col, hole_row, last);
            }
        }
        if reservation > 0 {
            chunk.reservation.store(reservation - 1, Ordering::Relaxed);
        } else {
            chunk.size -= 1;
        }
        if hole_row != last {
            Some(last)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_layout() -> Vec<(TypeIndex, u32, u32)> {
        vec![(0, 8, 8), (1, 4, 4)]
    }

    #[test]
    fn chunk_capacity_fits_at_least_one_row() {
        let table = Table::new(simple_layout());
        assert!(table.chunk_capacity() >= 1);
    }

    #[test]
    fn reserve_never_hands_out_duplicate_positions() {
        let table = Table::new(simple_layout());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let pos = table.reserve();
            assert!(seen.insert((pos.chunk_index, pos.row_index)));
        }
    }

    #[test]
    fn larger_than_hint_component_still_fits_one_row() {
        let columns = vec![(0, 65536, 8)];
        let table = Table::with_chunk_hint(columns, DEFAULT_CHUNK_BYTES_HINT);
        assert_eq!(table.chunk_capacity(), 1);
    }

    #[test]
    fn put_and_get_round_trip_bytes() {
        let table = Table::new(simple_layout());
        let pos = table.reserve();
        table.commit_reserved();
        let value: u64 = 0xdead_beef_u64;
        table.put(0, pos, &value.to_ne_bytes());
        let ptr = table.get(0, pos) as *const u64;
        let read_back = unsafe { *ptr };
        assert_eq!(read_back, value);
    }
}
