use log::{debug, info};

use crate::alloc::{Bitmap, State};
use crate::fs::FsError;
use crate::geometry::Geometry;
use crate::io::{BlockStorage, DeviceBlock};
use crate::node::{self, Inode};
use crate::sb::SuperBlock;
use crate::store::{check_block, check_inode, check_node, BlockNumber, BlockStore, InodeNumber};

/// Known location.
const SUPERBLOCK_INDEX: DeviceBlock = 0;

/// Where each region starts on the device, derived from the geometry alone so
/// that format and open agree.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    inode_bmp_start: DeviceBlock,
    data_bmp_start: DeviceBlock,
    inode_start: DeviceBlock,
    inodes_per_block: usize,
    data_start: DeviceBlock,
    total: usize,
}

impl Layout {
    fn new(geometry: &Geometry) -> Result<Self, FsError> {
        let bs = geometry.block_size;
        let record = node::record_len(geometry);
        if record > bs {
            return Err(FsError::InvalidArgument(format!(
                "inode record of {} bytes does not fit a {} byte block",
                record, bs
            )));
        }
        if std::mem::size_of::<SuperBlock>() > bs {
            return Err(FsError::InvalidArgument(format!(
                "super block does not fit a {} byte block",
                bs
            )));
        }
        let blocks_for = |bytes: usize| (bytes + bs - 1) / bs;
        let inodes_per_block = bs / record;

        let inode_bmp_start = SUPERBLOCK_INDEX + 1;
        let data_bmp_start = inode_bmp_start + blocks_for(Bitmap::byte_len(geometry.num_inodes));
        let inode_start = data_bmp_start + blocks_for(Bitmap::byte_len(geometry.num_data_blocks));
        let inode_blocks = (geometry.num_inodes + inodes_per_block - 1) / inodes_per_block;
        let data_start = inode_start + inode_blocks;
        Ok(Self {
            inode_bmp_start,
            data_bmp_start,
            inode_start,
            inodes_per_block,
            data_start,
            total: data_start + geometry.num_data_blocks,
        })
    }

    /// Device block holding `inum` and the byte offset of its record.
    fn inode_location(&self, geometry: &Geometry, inum: InodeNumber) -> (DeviceBlock, usize) {
        let block = self.inode_start + inum / self.inodes_per_block;
        let offset = (inum % self.inodes_per_block) * node::record_len(geometry);
        (block, offset)
    }
}

/// Total number of device blocks a file system of `geometry` occupies.
pub fn device_blocks(geometry: &Geometry) -> Result<usize, FsError> {
    Ok(Layout::new(geometry)?.total)
}

/// A block store laid out on block storage.
///
/// # Layout
/// ==============================================================================
/// | SuperBlock | Bitmap (inodes) | Bitmap (data region) | Inodes | Data Region |
/// ==============================================================================
///
/// Both bitmaps are kept in memory and written through on every change.
pub struct DiskStore<T: BlockStorage> {
    dev: T,
    geometry: Geometry,
    layout: Layout,
    inode_map: Bitmap,
    data_map: Bitmap,
}

impl<T: BlockStorage> DiskStore<T> {
    /// Initializes an empty file system onto owned block storage. The device
    /// blocks must be exactly `geometry.block_size` long and there must be at
    /// least `device_blocks(&geometry)` of them.
    pub fn format(mut dev: T, geometry: Geometry) -> Result<Self, FsError> {
        let layout = Layout::new(&geometry)?;
        Self::check_device(&dev, &geometry, &layout)?;

        // Reusable buffer for writing blocks.
        let mut block_buffer = vec![0; geometry.block_size];
        for blocknr in SUPERBLOCK_INDEX + 1..layout.data_start {
            dev.write_block(blocknr, &block_buffer)?;
        }

        let super_block = SuperBlock::new(&geometry);
        block_buffer[..super_block.serialize().len()].copy_from_slice(super_block.serialize());
        dev.write_block(SUPERBLOCK_INDEX, &block_buffer)?;
        dev.sync_disk()?;

        info!(
            "formatted {} inodes and {} data blocks of {} bytes over {} device blocks",
            geometry.num_inodes, geometry.num_data_blocks, geometry.block_size, layout.total
        );
        Ok(Self {
            dev,
            inode_map: Bitmap::new(geometry.num_inodes),
            data_map: Bitmap::new(geometry.num_data_blocks),
            geometry,
            layout,
        })
    }

    /// Mounts a file system previously written by `format`. `max_open_files`
    /// is not stored on disk and is supplied by the caller.
    pub fn open(mut dev: T, max_open_files: usize) -> Result<Self, FsError> {
        let mut block_buf = vec![0; dev.block_len()];

        // Read superblock from first block.
        dev.read_block(SUPERBLOCK_INDEX, &mut block_buf)?;
        let super_block = SuperBlock::parse(&block_buf)
            .ok_or_else(|| FsError::Corrupt("missing super block".to_string()))?;
        let geometry = Geometry::builder()
            .with_block_size(super_block.block_size as usize)
            .with_inodes(super_block.inodes_count as usize)
            .with_data_blocks(super_block.blocks_count as usize)
            .with_blocks_per_file(super_block.blocks_per_file as usize)
            .with_name_len(super_block.name_len as usize)
            .with_open_files(max_open_files)
            .build()?;
        debug_assert_eq!(geometry, super_block.geometry(max_open_files));
        let layout = Layout::new(&geometry)?;
        Self::check_device(&dev, &geometry, &layout)?;

        let mut store = Self {
            dev,
            inode_map: Bitmap::new(geometry.num_inodes),
            data_map: Bitmap::new(geometry.num_data_blocks),
            geometry,
            layout,
        };
        store.inode_map = store.read_bitmap(layout.inode_bmp_start, geometry.num_inodes)?;
        store.data_map = store.read_bitmap(layout.data_bmp_start, geometry.num_data_blocks)?;
        info!(
            "mounted file system with {} of {} inodes free",
            store.inode_map.count_free(),
            geometry.num_inodes
        );
        Ok(store)
    }

    /// Flushes buffered device writes.
    pub fn sync(&mut self) -> Result<(), FsError> {
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Returns ownership of the block storage to the caller.
    pub fn into_device(self) -> T {
        self.dev
    }

    fn check_device(dev: &T, geometry: &Geometry, layout: &Layout) -> Result<(), FsError> {
        if dev.block_len() != geometry.block_size {
            return Err(FsError::InvalidArgument(format!(
                "device blocks are {} bytes, file system blocks are {}",
                dev.block_len(),
                geometry.block_size
            )));
        }
        if dev.block_count() < layout.total {
            return Err(FsError::InvalidArgument(format!(
                "device has {} blocks, file system needs {}",
                dev.block_count(),
                layout.total
            )));
        }
        Ok(())
    }

    fn read_bitmap(&mut self, start: DeviceBlock, len: usize) -> Result<Bitmap, FsError> {
        let bs = self.geometry.block_size;
        let nblocks = (Bitmap::byte_len(len) + bs - 1) / bs;
        let mut bytes = vec![0; nblocks * bs];
        for (i, chunk) in bytes.chunks_mut(bs).enumerate() {
            self.dev.read_block(start + i, chunk)?;
        }
        Bitmap::parse(&bytes, len).ok_or_else(|| FsError::Corrupt("short bitmap".to_string()))
    }

    fn write_bitmap(
        dev: &mut T,
        block_size: usize,
        start: DeviceBlock,
        map: &Bitmap,
    ) -> Result<(), FsError> {
        for (i, chunk) in map.serialize().chunks(block_size).enumerate() {
            dev.write_block(start + i, chunk)?;
        }
        Ok(())
    }

    fn sync_inode_map(&mut self) -> Result<(), FsError> {
        Self::write_bitmap(
            &mut self.dev,
            self.geometry.block_size,
            self.layout.inode_bmp_start,
            &self.inode_map,
        )
    }

    fn sync_data_map(&mut self) -> Result<(), FsError> {
        Self::write_bitmap(
            &mut self.dev,
            self.geometry.block_size,
            self.layout.data_bmp_start,
            &self.data_map,
        )
    }
}

impl<T: BlockStorage> BlockStore for DiskStore<T> {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn read_inode(&mut self, inum: InodeNumber) -> Result<Inode, FsError> {
        check_inode(&self.geometry, inum)?;
        let (blocknr, offset) = self.layout.inode_location(&self.geometry, inum);
        let mut block_buf = vec![0; self.geometry.block_size];
        self.dev.read_block(blocknr, &mut block_buf)?;
        node::parse(&block_buf[offset..], &self.geometry)
            .ok_or_else(|| FsError::Corrupt(format!("inode {} record is invalid", inum)))
    }

    fn write_inode(&mut self, inum: InodeNumber, inode: &Inode) -> Result<(), FsError> {
        check_inode(&self.geometry, inum)?;
        check_node(&self.geometry, inode)?;
        let (blocknr, offset) = self.layout.inode_location(&self.geometry, inum);
        // Records share device blocks, so update ours in place.
        let mut block_buf = vec![0; self.geometry.block_size];
        self.dev.read_block(blocknr, &mut block_buf)?;
        node::serialize(inode, &self.geometry, &mut block_buf[offset..]);
        self.dev.write_block(blocknr, &block_buf)?;
        Ok(())
    }

    fn alloc_inode(&mut self) -> Result<Option<InodeNumber>, FsError> {
        let inum = self.inode_map.alloc();
        if inum.is_some() {
            self.sync_inode_map()?;
        }
        Ok(inum)
    }

    fn free_inode(&mut self, inum: InodeNumber) -> Result<(), FsError> {
        check_inode(&self.geometry, inum)?;
        let free = Inode::free(&self.geometry);
        self.write_inode(inum, &free)?;
        self.inode_map.set_free(inum);
        self.sync_inode_map()
    }

    fn read_data_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), FsError> {
        check_block(&self.geometry, blocknr, buf.len())?;
        self.dev.read_block(self.layout.data_start + blocknr, buf)?;
        Ok(())
    }

    fn write_data_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), FsError> {
        check_block(&self.geometry, blocknr, buf.len())?;
        self.dev.write_block(self.layout.data_start + blocknr, buf)?;
        Ok(())
    }

    fn alloc_data_block(&mut self) -> Result<Option<BlockNumber>, FsError> {
        let blocknr = self.data_map.alloc();
        if let Some(nr) = blocknr {
            debug!("allocated data block {}", nr);
            self.sync_data_map()?;
        }
        Ok(blocknr)
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
        debug!("freed data block {}", blocknr);
        self.sync_data_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_device(geometry: &Geometry) -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_block_count(device_blocks(geometry).unwrap())
            .with_block_len(geometry.block_size)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    #[test]
    fn default_layout_places_regions_in_order() {
        let g = Geometry::default();
        let layout = Layout::new(&g).unwrap();
        // 12 byte header, 8 byte name and 4 block pointers make a 36 byte record.
        assert_eq!(layout.inodes_per_block, 1);
        assert_eq!(layout.inode_bmp_start, 1);
        assert_eq!(layout.data_bmp_start, 2);
        assert_eq!(layout.inode_start, 3);
        assert_eq!(layout.data_start, 3 + g.num_inodes);
        assert_eq!(layout.total, 3 + g.num_inodes + g.num_data_blocks);
    }

    #[test]
    fn records_are_packed_when_blocks_are_large() {
        let g = Geometry::builder().with_block_size(128).build().unwrap();
        let layout = Layout::new(&g).unwrap();
        assert_eq!(layout.inodes_per_block, 3);
        assert_eq!(layout.inode_location(&g, 4), (layout.inode_start + 1, 36));
    }

    #[test]
    fn block_too_small_for_inode_record_is_rejected() {
        let g = Geometry::builder().with_block_size(16).build().unwrap();
        assert!(matches!(Layout::new(&g), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn device_with_too_few_blocks_is_rejected() {
        let g = Geometry::default();
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(4)
            .with_block_len(g.block_size)
            .build()
            .unwrap();
        assert!(matches!(DiskStore::format(dev, g), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn unformatted_device_fails_to_open() {
        let g = Geometry::default();
        let dev = create_test_device(&g);
        assert!(matches!(DiskStore::open(dev, 4), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn packed_inodes_do_not_clobber_neighbours() {
        let g = Geometry::builder().with_block_size(128).build().unwrap();
        let mut store = DiskStore::format(create_test_device(&g), g).unwrap();
        let a = Inode::new_file("a", &g);
        let mut b = Inode::new_file("b", &g);
        b.file_size = 5;
        b.direct_blocks[0] = Some(9);
        store.write_inode(0, &a).unwrap();
        store.write_inode(1, &b).unwrap();

        assert_eq!(store.read_inode(0).unwrap(), a);
        assert_eq!(store.read_inode(1).unwrap(), b);
        assert_eq!(store.read_inode(2).unwrap(), Inode::free(&g));
    }

    #[test]
    fn can_create_and_reopen_initialized_store() {
        let g = Geometry::default();
        let disk = tempfile::NamedTempFile::new().unwrap();
        let dev = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(device_blocks(&g).unwrap())
            .with_block_len(g.block_size)
            .build()
            .unwrap();
        let mut store = DiskStore::format(dev, g).unwrap();
        let inum = store.alloc_inode().unwrap().unwrap();
        let blocknr = store.alloc_data_block().unwrap().unwrap();
        let mut node = Inode::new_file("kept", &g);
        node.file_size = 3;
        node.direct_blocks[0] = Some(blocknr);
        store.write_inode(inum, &node).unwrap();
        let mut data = vec![0; g.block_size];
        data[..3].copy_from_slice(b"abc");
        store.write_data_block(blocknr, &data).unwrap();
        store.sync().unwrap();
        drop(store);

        let dev = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(device_blocks(&g).unwrap())
            .with_block_len(g.block_size)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut store = DiskStore::open(dev, g.max_open_files).unwrap();
        assert_eq!(store.geometry(), &g);
        assert_eq!(store.read_inode(inum).unwrap(), node);
        let mut read_back = vec![0; g.block_size];
        store.read_data_block(blocknr, &mut read_back).unwrap();
        assert_eq!(read_back, data);

        // Allocation state survived: the next slots handed out are fresh.
        assert_eq!(store.alloc_inode().unwrap(), Some(inum + 1));
        assert_eq!(store.alloc_data_block().unwrap(), Some(blocknr + 1));
    }

    #[test]
    fn returned_device_mounts_again() {
        let g = Geometry::default();
        let mut store = DiskStore::format(create_test_device(&g), g).unwrap();
        let inum = store.alloc_inode().unwrap().unwrap();
        let node = Inode::new_file("moved", &g);
        store.write_inode(inum, &node).unwrap();

        let mut store = DiskStore::open(store.into_device(), 2).unwrap();
        assert_eq!(store.geometry().max_open_files, 2);
        assert_eq!(store.read_inode(inum).unwrap(), node);
    }

    #[test]
    fn malformed_inode_is_not_written() {
        let g = Geometry::default();
        let mut store = DiskStore::format(create_test_device(&g), g).unwrap();
        let mut node = Inode::new_file("ok", &g);
        node.name = "far too long".to_string();
        assert!(matches!(
            store.write_inode(0, &node),
            Err(FsError::InvalidArgument(_))
        ));

        let mut node = Inode::new_file("ok", &g);
        node.direct_blocks.push(None);
        assert!(matches!(
            store.write_inode(0, &node),
            Err(FsError::InvalidArgument(_))
        ));
        assert_eq!(store.read_inode(0).unwrap(), Inode::free(&g));
    }
}
