use crate::fs::FsError;

/// Length in bytes of a single data block.
pub const BLOCK_SIZE: usize = 64;
/// Number of inode slots, and therefore the maximum number of files.
pub const NUM_INODES: usize = 8;
/// Number of data blocks shared by all files.
pub const NUM_DATA_BLOCKS: usize = 32;
/// Length of the direct block array carried by every inode.
pub const MAX_BLOCKS_PER_FILE: usize = 4;
/// File names must be strictly shorter than this many bytes.
pub const MAX_NAME_LEN: usize = 8;
/// Number of file handles that can be open at once.
pub const MAX_OPEN_FILES: usize = 20;

/// Capacity limits of one file system instance. Fixed when the file system is
/// initialized; nothing resizes them afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: usize,
    pub num_inodes: usize,
    pub num_data_blocks: usize,
    pub max_blocks_per_file: usize,
    pub max_name_len: usize,
    pub max_open_files: usize,
}

impl Geometry {
    pub fn builder() -> GeometryBuilder {
        GeometryBuilder::default()
    }

    /// The largest file the direct block array can address.
    pub fn max_file_size(&self) -> usize {
        self.max_blocks_per_file * self.block_size
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            num_inodes: NUM_INODES,
            num_data_blocks: NUM_DATA_BLOCKS,
            max_blocks_per_file: MAX_BLOCKS_PER_FILE,
            max_name_len: MAX_NAME_LEN,
            max_open_files: MAX_OPEN_FILES,
        }
    }
}

#[derive(Default)]
pub struct GeometryBuilder {
    geometry: Geometry,
}

impl GeometryBuilder {
    /// Sets the length in bytes of every data block.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.geometry.block_size = bytes;
        self
    }

    pub fn with_inodes(mut self, count: usize) -> Self {
        self.geometry.num_inodes = count;
        self
    }

    pub fn with_data_blocks(mut self, count: usize) -> Self {
        self.geometry.num_data_blocks = count;
        self
    }

    pub fn with_blocks_per_file(mut self, count: usize) -> Self {
        self.geometry.max_blocks_per_file = count;
        self
    }

    /// Names must be strictly shorter than `len` bytes, so a limit of 1 admits
    /// no name at all.
    pub fn with_name_len(mut self, len: usize) -> Self {
        self.geometry.max_name_len = len;
        self
    }

    pub fn with_open_files(mut self, count: usize) -> Self {
        self.geometry.max_open_files = count;
        self
    }

    /// Validates the limits. Every count must be non zero and names must have
    /// room for at least one byte.
    pub fn build(self) -> Result<Geometry, FsError> {
        let g = self.geometry;
        let checks = [
            (g.block_size > 0, "block size must be non zero"),
            (g.num_inodes > 0, "inode count must be non zero"),
            (g.num_data_blocks > 0, "data block count must be non zero"),
            (g.max_blocks_per_file > 0, "blocks per file must be non zero"),
            (g.max_name_len > 1, "name length must leave room for one byte"),
            (g.max_open_files > 0, "open file count must be non zero"),
        ];
        for (ok, reason) in checks.iter() {
            if !ok {
                return Err(FsError::InvalidArgument(reason.to_string()));
            }
        }
        Ok(g)
    }
}
