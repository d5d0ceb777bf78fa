use crate::alloc::{Bitmap, State};
use crate::fs::FsError;
use crate::geometry::Geometry;
use crate::node::Inode;
use crate::store::{check_block, check_inode, check_node, BlockNumber, BlockStore, InodeNumber};

/// A block store held entirely in memory. Useful for tests and for callers
/// that don't need the data to outlive the process.
pub struct MemStore {
    geometry: Geometry,
    inodes: Vec<Inode>,
    inode_map: Bitmap,
    blocks: Vec<Vec<u8>>,
    data_map: Bitmap,
}

impl MemStore {
    /// A freshly formatted store: every inode free, every data block zeroed
    /// and free.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            inodes: vec![Inode::free(&geometry); geometry.num_inodes],
            inode_map: Bitmap::new(geometry.num_inodes),
            blocks: vec![vec![0; geometry.block_size]; geometry.num_data_blocks],
            data_map: Bitmap::new(geometry.num_data_blocks),
            geometry,
        }
    }

    /// Number of data blocks not currently allocated.
    pub fn free_data_blocks(&self) -> usize {
        self.data_map.count_free()
    }

    /// Number of inode slots not currently allocated.
    pub fn free_inodes(&self) -> usize {
        self.inode_map.count_free()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

impl BlockStore for MemStore {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn read_inode(&mut self, inum: InodeNumber) -> Result<Inode, FsError> {
        check_inode(&self.geometry, inum)?;
        Ok(self.inodes[inum].clone())
    }

    fn write_inode(&mut self, inum: InodeNumber, node: &Inode) -> Result<(), FsError> {
        check_inode(&self.geometry, inum)?;
        check_node(&self.geometry, node)?;
        self.inodes[inum] = node.clone();
        Ok(())
    }

    fn alloc_inode(&mut self) -> Result<Option<InodeNumber>, FsError> {
        Ok(self.inode_map.alloc())
    }

    fn free_inode(&mut self, inum: InodeNumber) -> Result<(), FsError> {
        check_inode(&self.geometry, inum)?;
        self.inode_map.set_free(inum);
        self.inodes[inum] = Inode::free(&self.geometry);
        Ok(())
    }

    fn read_data_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), FsError> {
        check_block(&self.geometry, blocknr, buf.len())?;
        buf.copy_from_slice(&self.blocks[blocknr]);
        Ok(())
    }

    fn write_data_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), FsError> {
        check_block(&self.geometry, blocknr, buf.len())?;
        self.blocks[blocknr].copy_from_slice(buf);
        Ok(())
    }

    fn alloc_data_block(&mut self) -> Result<Option<BlockNumber>, FsError> {
        Ok(self.data_map.alloc())
    }

    fn free_data_block(&mut self, blocknr: BlockNumber) -> Result<(), FsError> {
        check_block(&self.geometry, blocknr, self.geometry.block_size)?;
        if self.data_map.get(blocknr) == State::Free {
            return Err(FsError::Corrupt(format!(
                "data block {} freed twice",
                blocknr
            )));
        }
        self.data_map.set_free(blocknr);
        Ok(())
    }
}
