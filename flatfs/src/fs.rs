use std::fmt::{self, Write};
use std::ops::Range;

use log::{debug, info, warn};
use thiserror::Error;

use crate::geometry::Geometry;
use crate::handle::{Handle, HandleTable, Slot};
use crate::node::Inode;
use crate::store::{BlockNumber, BlockStore, InodeNumber};

/// The pools a file system can run out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    DataBlocks,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => write!(f, "inodes"),
            Resource::DataBlocks => write!(f, "data blocks"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("a file named {0:?} already exists")]
    DuplicateName(String),
    #[error("no {0} left")]
    CapacityExhausted(Resource),
    #[error("no file named {0:?}")]
    NotFound(String),
    #[error("all file handles are in use")]
    TooManyOpenFiles,
    #[error("handle {0} is not open")]
    InvalidHandle(usize),
    #[error("handle {0} refers to a deleted file")]
    StaleHandle(usize),
    #[error("position {position} is outside 0..={limit}")]
    OutOfBounds { position: i64, limit: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("inconsistent file system: {0}")]
    Corrupt(String),
    #[error("block device error")]
    Io(#[from] std::io::Error),
}

/// One block-aligned piece of a byte range.
#[derive(Debug, PartialEq)]
struct Chunk {
    /// Position of the block within the file.
    block: usize,
    /// Bytes addressed within that block.
    in_block: Range<usize>,
    /// The same bytes within the caller's buffer.
    in_buf: Range<usize>,
}

/// Splits `len` bytes starting at file offset `start` into chunks that never
/// cross a block boundary.
struct Span {
    pos: usize,
    end: usize,
    start: usize,
    block_size: usize,
}

impl Span {
    fn new(start: usize, len: usize, block_size: usize) -> Self {
        Self {
            pos: start,
            end: start + len,
            start,
            block_size,
        }
    }
}

impl Iterator for Span {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.end {
            return None;
        }
        let block = self.pos / self.block_size;
        let from = self.pos % self.block_size;
        let len = std::cmp::min(self.block_size - from, self.end - self.pos);
        let buf_from = self.pos - self.start;
        self.pos += len;
        Some(Chunk {
            block,
            in_block: from..from + len,
            in_buf: buf_from..buf_from + len,
        })
    }
}

/// A flat file system: uniquely named files, each with a fixed array of direct
/// data blocks, over any `BlockStore`.
///
/// Open files are tracked in a fixed size handle table owned by this value.
/// Reads and writes happen at the handle's offset and leave it where it was;
/// only `seek` moves it.
pub struct FlatFs<S: BlockStore> {
    store: S,
    handles: HandleTable,
}

impl<S: BlockStore> FlatFs<S> {
    pub fn new(store: S) -> Self {
        let handles = HandleTable::new(store.geometry().max_open_files);
        Self { store, handles }
    }

    pub fn geometry(&self) -> &Geometry {
        self.store.geometry()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Gives back the store. Open handles are dropped.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Creates an empty file and returns its inode number.
    pub fn create(&mut self, name: &str) -> Result<InodeNumber, FsError> {
        let geometry = *self.store.geometry();
        if name.is_empty() || name.len() >= geometry.max_name_len {
            return Err(FsError::InvalidName(name.to_string()));
        }
        if self.lookup(name)?.is_some() {
            return Err(FsError::DuplicateName(name.to_string()));
        }

        let inum = self
            .store
            .alloc_inode()?
            .ok_or(FsError::CapacityExhausted(Resource::Inodes))?;
        if let Err(e) = self
            .store
            .write_inode(inum, &Inode::new_file(name, &geometry))
        {
            warn!("could not write inode {} for {:?}, releasing it: {}", inum, name, e);
            if let Err(free_err) = self.store.free_inode(inum) {
                warn!("could not release inode {}: {}", inum, free_err);
            }
            return Err(e);
        }
        info!("created {:?} as inode {}", name, inum);
        Ok(inum)
    }

    /// Removes a file and releases its blocks. Deleting a name that doesn't
    /// exist does nothing. Handles still open on the file become stale.
    ///
    /// The inode is emptied on the store before any block is released, so a
    /// block is never both free and listed by a file. A block whose release
    /// fails stays reserved; the file is still removed and the first such
    /// error is returned.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let (inum, node) = match self.lookup(name)? {
            Some(found) => found,
            None => {
                debug!("delete of missing file {:?} ignored", name);
                return Ok(());
            }
        };

        let emptied = Inode {
            file_size: 0,
            direct_blocks: vec![None; node.direct_blocks.len()],
            ..node.clone()
        };
        self.store.write_inode(inum, &emptied)?;
        // Offsets into the old content no longer mean anything.
        let stale = self.handles.invalidate(inum);

        let mut first_err = None;
        for blocknr in node.allocated_blocks() {
            if let Err(e) = self.store.free_data_block(blocknr) {
                warn!("could not release data block {} of {:?}: {}", blocknr, name, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        self.store.free_inode(inum)?;

        if stale > 0 {
            warn!("{} handle(s) on deleted file {:?} are now stale", stale, name);
        }
        info!("deleted {:?} (inode {})", name, inum);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Opens a file with its offset at the start.
    pub fn open(&mut self, name: &str) -> Result<Handle, FsError> {
        let (inum, _) = self
            .lookup(name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let handle = self.handles.bind(inum)?;
        debug!("opened {:?} as {}", name, handle);
        Ok(handle)
    }

    /// Closes a handle. Closing a closed or unknown handle does nothing.
    pub fn close(&mut self, handle: Handle) {
        self.handles.release(handle);
    }

    /// Fills `buf` with the bytes at the handle's offset. Either the whole
    /// buffer can be filled from within the file or nothing is read.
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<(), FsError> {
        let (inum, offset) = self.handles.get(handle)?;
        if buf.is_empty() {
            return Ok(());
        }

        let node = self.store.read_inode(inum)?;
        let end = offset + buf.len();
        if end > node.file_size {
            return Err(FsError::OutOfBounds {
                position: end as i64,
                limit: node.file_size,
            });
        }

        let block_size = self.store.geometry().block_size;
        let mut block = vec![0; block_size];
        for chunk in Span::new(offset, buf.len(), block_size) {
            let blocknr = Self::block_at(inum, &node, chunk.block)?;
            self.store.read_data_block(blocknr, &mut block)?;
            buf[chunk.in_buf].copy_from_slice(&block[chunk.in_block]);
        }
        Ok(())
    }

    /// Writes `buf` at the handle's offset, growing the file if the write ends
    /// past its current size.
    ///
    /// If a data block can't be allocated the blocks allocated by this call are
    /// released again and the inode is left as it was. Bytes already written
    /// into blocks the file owned before the call stay written.
    pub fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<(), FsError> {
        let (inum, offset) = self.handles.get(handle)?;
        if buf.is_empty() {
            return Ok(());
        }

        let max_file_size = self.store.geometry().max_file_size();
        let end = offset + buf.len();
        if end > max_file_size {
            return Err(FsError::OutOfBounds {
                position: end as i64,
                limit: max_file_size,
            });
        }

        let mut node = self.store.read_inode(inum)?;
        let mut fresh = Vec::new();
        let written = self
            .write_span(&mut node, offset, buf, &mut fresh)
            .and_then(|()| {
                node.file_size = std::cmp::max(node.file_size, end);
                self.store.write_inode(inum, &node)
            });
        if let Err(e) = written {
            warn!(
                "write of {} bytes to inode {} failed, releasing {} new block(s): {}",
                buf.len(),
                inum,
                fresh.len(),
                e
            );
            for blocknr in fresh {
                if let Err(free_err) = self.store.free_data_block(blocknr) {
                    warn!("could not release data block {}: {}", blocknr, free_err);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Copies `buf` into the file's blocks starting at `offset`, allocating
    /// blocks for unallocated slots and recording them in `fresh`.
    fn write_span(
        &mut self,
        node: &mut Inode,
        offset: usize,
        buf: &[u8],
        fresh: &mut Vec<BlockNumber>,
    ) -> Result<(), FsError> {
        let block_size = self.store.geometry().block_size;
        let mut block = vec![0; block_size];
        for chunk in Span::new(offset, buf.len(), block_size) {
            let blocknr = match node.direct_blocks[chunk.block] {
                Some(blocknr) => {
                    // Keep the bytes of the block this write doesn't touch.
                    self.store.read_data_block(blocknr, &mut block)?;
                    blocknr
                }
                None => {
                    let blocknr = self
                        .store
                        .alloc_data_block()?
                        .ok_or(FsError::CapacityExhausted(Resource::DataBlocks))?;
                    fresh.push(blocknr);
                    node.direct_blocks[chunk.block] = Some(blocknr);
                    for b in block.iter_mut() {
                        *b = 0;
                    }
                    blocknr
                }
            };
            block[chunk.in_block].copy_from_slice(&buf[chunk.in_buf]);
            self.store.write_data_block(blocknr, &block)?;
        }
        Ok(())
    }

    /// Moves the handle's offset by `delta` bytes and returns the new offset.
    /// The offset may land anywhere from the start of the file up to and
    /// including its end.
    pub fn seek(&mut self, handle: Handle, delta: i64) -> Result<usize, FsError> {
        let (inum, offset) = self.handles.get(handle)?;
        let node = self.store.read_inode(inum)?;

        let new_offset = (offset as i64).saturating_add(delta);
        if new_offset < 0 || new_offset > node.file_size as i64 {
            return Err(FsError::OutOfBounds {
                position: new_offset,
                limit: node.file_size,
            });
        }
        let new_offset = new_offset as usize;
        self.handles.set_offset(handle, new_offset)?;
        Ok(new_offset)
    }

    /// Current offset of an open handle.
    pub fn tell(&self, handle: Handle) -> Result<usize, FsError> {
        let (_, offset) = self.handles.get(handle)?;
        Ok(offset)
    }

    /// The inode of the named file.
    pub fn stat(&mut self, name: &str) -> Result<Inode, FsError> {
        self.lookup(name)?
            .map(|(_, node)| node)
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Describes every file and every handle that is not closed, one per line.
    pub fn dump(&mut self) -> Result<String, FsError> {
        let mut out = String::new();
        for inum in 0..self.store.geometry().num_inodes {
            let node = self.store.read_inode(inum)?;
            if node.in_use() {
                // Writing to a String cannot fail.
                let _ = writeln!(out, "inode {}: {}", inum, node);
            }
        }
        for (handle, slot) in self.handles.active() {
            let _ = match slot {
                Slot::Open { inum, offset } => {
                    writeln!(out, "{}: inode {} offset {}", handle, inum, offset)
                }
                _ => writeln!(out, "{}: stale", handle),
            };
        }
        debug!("file system state:\n{}", out);
        Ok(out)
    }

    /// Scans the inode table for an in-use inode called `name`.
    fn lookup(&mut self, name: &str) -> Result<Option<(InodeNumber, Inode)>, FsError> {
        for inum in 0..self.store.geometry().num_inodes {
            let node = self.store.read_inode(inum)?;
            if node.is_named(name) {
                return Ok(Some((inum, node)));
            }
        }
        Ok(None)
    }

    fn block_at(inum: InodeNumber, node: &Inode, index: usize) -> Result<BlockNumber, FsError> {
        node.direct_blocks[index].ok_or_else(|| {
            FsError::Corrupt(format!(
                "inode {} has no block {} below its size {}",
                inum, index, node.file_size
            ))
        })
    }
}
