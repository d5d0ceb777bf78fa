use std::path::Path;

/// The device block number to access ranging from 0 (the first block) to n - 1
/// (the last block) where n is number of blocks available.
pub type DeviceBlock = usize;

/// A device of fixed-length blocks addressed by number.
///
/// Tried to map as closely as possible to the prescribed interface found here:
/// http://web.mit.edu/6.033/1997/handouts/html/04sfs.html.
pub trait BlockStorage {
    /// Opens a disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize, block_len: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Reads disk block number into the first `block_len` bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer shorter than a
    /// block, will return an error.
    fn read_block(&mut self, blocknr: DeviceBlock, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number. Buffers longer
    /// than a block are truncated, shorter ones leave the tail of the block as is.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: DeviceBlock, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
    /// Length in bytes of every block on the device.
    fn block_len(&self) -> usize;
    /// Number of blocks on the device.
    fn block_count(&self) -> usize;
}
