mod disk;
mod mem;

pub use disk::{device_blocks, DiskStore};
pub use mem::MemStore;

use crate::fs::FsError;
use crate::geometry::Geometry;
use crate::node::Inode;

/// Index of an inode slot, from 0 to `num_inodes - 1`.
pub type InodeNumber = usize;
/// Index of a data block, from 0 to `num_data_blocks - 1`.
pub type BlockNumber = usize;

/// Persistence for inode records and data blocks, addressed by index.
///
/// Implementations do no bookkeeping beyond their allocation maps: the file
/// layer decides which inode owns which block. Allocation reports exhaustion
/// as `None`.
pub trait BlockStore {
    fn geometry(&self) -> &Geometry;

    fn read_inode(&mut self, inum: InodeNumber) -> Result<Inode, FsError>;

    fn write_inode(&mut self, inum: InodeNumber, node: &Inode) -> Result<(), FsError>;

    /// Reserves a free inode slot. The slot's record is not touched; callers
    /// write the new inode themselves.
    fn alloc_inode(&mut self) -> Result<Option<InodeNumber>, FsError>;

    /// Releases an inode slot and resets its record to a free inode.
    fn free_inode(&mut self, inum: InodeNumber) -> Result<(), FsError>;

    /// Reads a whole data block into `buf`, which must be exactly one block long.
    fn read_data_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), FsError>;

    /// Writes a whole data block from `buf`, which must be exactly one block long.
    fn write_data_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), FsError>;

    fn alloc_data_block(&mut self) -> Result<Option<BlockNumber>, FsError>;

    fn free_data_block(&mut self, blocknr: BlockNumber) -> Result<(), FsError>;
}

/// Rejects inode numbers outside the table.
pub(crate) fn check_inode(geometry: &Geometry, inum: InodeNumber) -> Result<(), FsError> {
    if inum >= geometry.num_inodes {
        return Err(FsError::InvalidArgument(format!(
            "inode {} out of range",
            inum
        )));
    }
    Ok(())
}

/// Rejects inode records that don't fit `geometry`: names too long to store,
/// a block array of the wrong length, block numbers outside the data region or
/// a size past what the block array can address.
pub(crate) fn check_node(geometry: &Geometry, node: &Inode) -> Result<(), FsError> {
    if node.name.len() >= geometry.max_name_len {
        return Err(FsError::InvalidArgument(format!(
            "name {:?} is too long",
            node.name
        )));
    }
    if node.direct_blocks.len() != geometry.max_blocks_per_file {
        return Err(FsError::InvalidArgument(format!(
            "inode has {} block slots, expected {}",
            node.direct_blocks.len(),
            geometry.max_blocks_per_file
        )));
    }
    if let Some(blocknr) = node
        .allocated_blocks()
        .find(|&nr| nr >= geometry.num_data_blocks)
    {
        return Err(FsError::InvalidArgument(format!(
            "data block {} out of range",
            blocknr
        )));
    }
    if node.file_size > geometry.max_file_size() {
        return Err(FsError::InvalidArgument(format!(
            "file size {} exceeds {}",
            node.file_size,
            geometry.max_file_size()
        )));
    }
    Ok(())
}

/// Rejects block numbers outside the data region and buffers of the wrong
/// length.
pub(crate) fn check_block(
    geometry: &Geometry,
    blocknr: BlockNumber,
    buf_len: usize,
) -> Result<(), FsError> {
    if blocknr >= geometry.num_data_blocks {
        return Err(FsError::InvalidArgument(format!(
            "data block {} out of range",
            blocknr
        )));
    }
    if buf_len != geometry.block_size {
        return Err(FsError::InvalidArgument(format!(
            "buffer of {} bytes is not one block",
            buf_len
        )));
    }
    Ok(())
}
