use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::geometry::Geometry;

pub const SB_MAGIC: u32 = 0x4646_5342; // FFSB

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// Records the geometry the disk was formatted with. Open file handles are not
/// persisted, so the handle limit is not recorded here.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, PartialEq, Clone, Copy)]
pub struct SuperBlock {
    /// A 32-bit identifying string, in this case FFSB.
    pub sb_magic: u32,
    /// Length in bytes of every block on the device.
    pub block_size: u32,
    /// Upper bound on how many files can exist.
    pub inodes_count: u32,
    /// Number of blocks in the data region.
    pub blocks_count: u32,
    pub blocks_per_file: u32,
    pub name_len: u32,
}

impl SuperBlock {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            sb_magic: SB_MAGIC,
            block_size: geometry.block_size as u32,
            inodes_count: geometry.num_inodes as u32,
            blocks_count: geometry.num_data_blocks as u32,
            blocks_per_file: geometry.max_blocks_per_file as u32,
            name_len: geometry.max_name_len as u32,
        }
    }

    /// Reads the super block from the front of `buf`. Returns `None` if the
    /// buffer is too short or does not carry the magic constant.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let sb = Self::read_from_prefix(buf)?;
        if sb.sb_magic != SB_MAGIC {
            return None;
        }
        Some(sb)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    /// The geometry this disk was formatted with, keeping the caller's handle
    /// limit.
    pub fn geometry(&self, max_open_files: usize) -> Geometry {
        Geometry {
            block_size: self.block_size as usize,
            num_inodes: self.inodes_count as usize,
            num_data_blocks: self.blocks_count as usize,
            max_blocks_per_file: self.blocks_per_file as usize,
            max_name_len: self.name_len as usize,
            max_open_files,
        }
    }
}
