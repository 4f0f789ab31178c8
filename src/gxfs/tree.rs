//! The 512-fanout block-pointer tree used for file and directory data
//! (SPEC_FULL.md §4.5 "Tree operations").
//!
//! Each indirect block holds 512 eight-byte child pointers (`512 * 8 ==
//! BLOCK_SIZE`). A `TREE` record tracks the current `depth`: at depth 0 the
//! root pointer addresses a data block directly; at depth N it addresses an
//! indirect block whose children are depth-(N-1) subtrees. Growing past the
//! current depth's addressable range wraps the existing root in a fresh
//! indirect block and bumps depth, exactly mirroring how the fanout doubles
//! reach without rewriting existing data.

use crate::block::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::gxfs::alloc::Allocator;
use crate::gxfs::super_block::NO_BLOCK;

/// Number of child pointers per indirect block.
pub const FANOUT: u64 = (BLOCK_SIZE / 8) as u64;

/// Maximum number of data blocks a tree of the given depth can address.
fn capacity_at_depth(depth: u16) -> u64 {
    let mut cap: u64 = 1;
    for _ in 0..depth {
        cap = cap.saturating_mul(FANOUT);
    }
    cap
}

pub struct Tree<'a> {
    alloc: &'a Allocator,
}

impl<'a> Tree<'a> {
    pub fn new(alloc: &'a Allocator) -> Self {
        Self { alloc }
    }

    fn read_pointers(&self, block: u64) -> Result<[u64; FANOUT as usize]> {
        let mut raw = [0u8; BLOCK_SIZE];
        self.alloc.read_block(block, &mut raw)?;
        let mut out = [NO_BLOCK; FANOUT as usize];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u64::from_le_bytes(raw[i * 8..i * 8 + 8].try_into().unwrap());
        }
        Ok(out)
    }

    fn write_pointers(&self, block: u64, pointers: &[u64; FANOUT as usize]) -> Result<()> {
        let mut raw = [0u8; BLOCK_SIZE];
        for (i, ptr) in pointers.iter().enumerate() {
            raw[i * 8..i * 8 + 8].copy_from_slice(&ptr.to_le_bytes());
        }
        self.alloc.write_block(block, &raw)
    }

    /// Expands the tree (`root`, `depth`) so that `index` is addressable,
    /// wrapping the existing root in new indirect blocks as needed. Returns
    /// the (possibly new) root block and depth.
    pub fn grow(&self, root: u64, depth: u16, index: u64) -> Result<(u64, u16)> {
        let mut root = root;
        let mut depth = depth;
        while root == NO_BLOCK || index >= capacity_at_depth(depth) {
            let new_root = self.alloc.allocate()?;
            let mut pointers = [NO_BLOCK; FANOUT as usize];
            if root != NO_BLOCK {
                pointers[0] = root;
            }
            self.write_pointers(new_root, &pointers)?;
            root = new_root;
            depth += 1;
        }
        Ok((root, depth))
    }

    /// Looks up the data block for `index`. If `make` is set, allocates
    /// zero-filled blocks along the path as needed (and the caller is
    /// expected to have already grown the tree so `index` is in range).
    /// Returns `None` for a hole when `make` is false.
    pub fn lookup(&self, root: u64, depth: u16, index: u64, make: bool) -> Result<Option<u64>> {
        if root == NO_BLOCK {
            if !make {
                return Ok(None);
            }
            return Err(Error::Corrupted("gxfs: lookup on empty tree without prior grow"));
        }
        if index >= capacity_at_depth(depth) {
            return Err(Error::Corrupted("gxfs: tree index exceeds depth capacity"));
        }
        self.lookup_at(root, depth, index, make)
    }

    fn lookup_at(&self, block: u64, depth: u16, index: u64, make: bool) -> Result<Option<u64>> {
        if depth == 0 {
            return Ok(Some(block));
        }
        let child_capacity = capacity_at_depth(depth - 1);
        let slot = (index / child_capacity) as usize;
        let child_index = index % child_capacity;

        let mut pointers = self.read_pointers(block)?;
        let mut child = pointers[slot];
        if child == NO_BLOCK {
            if !make {
                return Ok(None);
            }
            child = self.alloc.allocate()?;
            pointers[slot] = child;
            self.write_pointers(block, &pointers)?;
        }
        self.lookup_at(child, depth - 1, child_index, make)
    }

    /// Frees an entire tree (every data and indirect block it addresses),
    /// used when an inode is reclaimed (SPEC_FULL.md §3 invariants).
    pub fn free_all(&self, root: u64, depth: u16) -> Result<()> {
        self.free_subtree(root, depth)
    }

    /// Frees every block addressed by the subtree rooted at `block` at the
    /// given depth, including `block` itself, recursing depth-first.
    fn free_subtree(&self, block: u64, depth: u16) -> Result<()> {
        if block == NO_BLOCK {
            return Ok(());
        }
        if depth > 0 {
            let pointers = self.read_pointers(block)?;
            for &child in pointers.iter() {
                self.free_subtree(child, depth - 1)?;
            }
        }
        self.alloc.free(block)
    }

    /// Truncates the tree to `new_block_count` data blocks: fully-above-size
    /// branches are freed outright, the single partially-covered branch (if
    /// any) is recursed into, and depth is left unchanged (shrinking depth
    /// is not worth the bookkeeping, mirroring the original's own behavior
    /// of leaving the tree "tall" after truncation).
    pub fn truncate(&self, root: u64, depth: u16, new_block_count: u64) -> Result<u64> {
        if root == NO_BLOCK {
            return Ok(NO_BLOCK);
        }
        if new_block_count == 0 {
            self.free_subtree(root, depth)?;
            return Ok(NO_BLOCK);
        }
        if new_block_count >= capacity_at_depth(depth) {
            return Ok(root);
        }
        self.truncate_at(root, depth, new_block_count)
    }

    fn truncate_at(&self, block: u64, depth: u16, new_count: u64) -> Result<u64> {
        if depth == 0 {
            return Ok(block);
        }
        let child_capacity = capacity_at_depth(depth - 1);
        let keep_slots = (new_count / child_capacity) as usize;
        let remainder = new_count % child_capacity;

        let mut pointers = self.read_pointers(block)?;
        for slot in pointers.iter_mut().skip(keep_slots + if remainder > 0 { 1 } else { 0 }) {
            if *slot != NO_BLOCK {
                self.free_subtree(*slot, depth - 1)?;
                *slot = NO_BLOCK;
            }
        }
        if remainder > 0 && keep_slots < pointers.len() {
            let partial = pointers[keep_slots];
            if partial != NO_BLOCK {
                pointers[keep_slots] = self.truncate_at(partial, depth - 1, remainder)?;
            }
        }
        self.write_pointers(block, &pointers)?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use std::sync::Arc;

    fn fresh_alloc(blocks: u64) -> Allocator {
        let dev: Arc<dyn crate::block::BlockDevice> =
            Arc::new(MemDisk::new(crate::gxfs::super_block::BLOCK_REGION_OFFSET + blocks * BLOCK_SIZE as u64));
        Allocator::format(dev, blocks, [0u8; 16], 0).unwrap()
    }

    #[test]
    fn grows_depth_as_index_exceeds_capacity() {
        let alloc = fresh_alloc(4096);
        let tree = Tree::new(&alloc);
        assert_eq!(capacity_at_depth(0), 1);
        assert_eq!(capacity_at_depth(1), FANOUT);
        let (root, depth) = tree.grow(NO_BLOCK, 0, 0).unwrap();
        assert_eq!(depth, 1);
        assert_ne!(root, NO_BLOCK);
        let (root2, depth2) = tree.grow(root, depth, FANOUT).unwrap();
        assert_eq!(depth2, 2);
        assert_ne!(root2, root);
    }

    #[test]
    fn lookup_with_make_allocates_along_path_and_is_stable() {
        let alloc = fresh_alloc(4096);
        let tree = Tree::new(&alloc);
        let (root, depth) = tree.grow(NO_BLOCK, 0, 600).unwrap();
        let b1 = tree.lookup(root, depth, 600, true).unwrap().unwrap();
        let b2 = tree.lookup(root, depth, 600, true).unwrap().unwrap();
        assert_eq!(b1, b2);
        assert!(tree.lookup(root, depth, 0, false).unwrap().is_none());
    }

    #[test]
    fn truncate_frees_blocks_past_the_new_size() {
        let alloc = fresh_alloc(4096);
        let tree = Tree::new(&alloc);
        let (root, depth) = tree.grow(NO_BLOCK, 0, FANOUT + 5).unwrap();
        tree.lookup(root, depth, 0, true).unwrap();
        tree.lookup(root, depth, FANOUT + 5, true).unwrap();
        let used_before = alloc.used_blocks();
        let root = tree.truncate(root, depth, 1).unwrap();
        assert!(alloc.used_blocks() <= used_before);
        assert!(tree.lookup(root, depth, 0, false).unwrap().is_some());
    }
}
