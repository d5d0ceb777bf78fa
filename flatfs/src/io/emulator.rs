use crate::io::block::{BlockStorage, DeviceBlock};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// 4k is a common block size for file systems. Disks commonly are composed of
/// 512 byte blocks mapping each file system block to 8 hard disk blocks.
pub const DEFAULT_BLOCK_LEN: usize = 4096;

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
    /// Length in bytes of each block.
    block_len: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: DeviceBlock) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        Ok(())
    }

    fn seek_to(&mut self, blocknr: DeviceBlock) -> std::io::Result<()> {
        self.fd
            .seek(SeekFrom::Start((blocknr * self.block_len) as u64))?;
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize, block_len: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let emu = FileBlockEmulator {
            fd: file,
            block_count: nblocks,
            block_len,
        };

        Ok(emu)
    }

    fn read_block(&mut self, blocknr: DeviceBlock, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < self.block_len {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.seek_to(blocknr)?;

        // Limit the read to just the block specified.
        let block_len = self.block_len;
        self.fd.read_exact(&mut buf[..block_len])
    }

    /// This method truncates writes that exceed the total block size.
    fn write_block(&mut self, blocknr: DeviceBlock, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        self.seek_to(blocknr)?;

        let max = std::cmp::min(self.block_len, buf.len());
        self.fd.write_all(&buf[0..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }

    fn block_len(&self) -> usize {
        self.block_len
    }

    fn block_count(&self) -> usize {
        self.block_count
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    block_len: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded down
            // to the nearest block.
            block_count: 0,
            block_len: DEFAULT_BLOCK_LEN,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Sets the length in bytes of each block.
    pub fn with_block_len(mut self, bytes: usize) -> Self {
        self.block_len = bytes;
        self
    }

    /// Whether `build` zeroes the medium. Turn this off to reattach to a disk
    /// image that already holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless
    /// told otherwise, does destructive things to prepare the file for use.
    /// Ownership of the file is transfered to the emulator meaning this builder
    /// can only be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 || self.block_len == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "device must have at least one non empty block",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
            block_len: self.block_len,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; self.block_len];
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive writes.
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(blocks: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(disk_emu.into_file().metadata().unwrap().len(), 4 * 4096);
    }

    #[test]
    fn custom_block_len_sizes_the_medium() {
        let fs_block = tempfile::tempfile().unwrap();
        let disk_emu = FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(10)
            .with_block_len(64)
            .build()
            .unwrap();
        assert_eq!(disk_emu.block_len(), 64);
        assert_eq!(disk_emu.into_file().metadata().unwrap().len(), 640);
    }

    #[test]
    fn can_read_and_write_blocks() {
        let mut disk_emu = emulator(4);

        // Allocate a block with a non-zero character.
        let block = vec![0x55; 4096];
        disk_emu.write_block(2, &block).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_block = vec![0x00; 4096];
        // Read a different block.
        disk_emu.read_block(3, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x00; 4096]);

        // Read the block with data.
        let mut filled_block = vec![0x00; 4096];
        disk_emu.read_block(2, &mut filled_block).unwrap();
        assert_eq!(filled_block, vec![0x55; 4096]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let mut disk_emu = emulator(2);

        disk_emu.write_block(0, &[0x55; 4096]).unwrap();
        disk_emu.write_block(1, &[0x66; 4096]).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_block = vec![0x00; 4096];
        disk_emu.read_block(0, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x55; 4096]);
        disk_emu.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x66; 4096]);
    }

    #[test]
    fn write_block_beyond_range_returns_error() {
        let mut disk_emu = emulator(1);

        // Attempt to write beyond range.
        let wresult = disk_emu.write_block(1, &[0x55; 4096]);
        if wresult.is_ok() {
            panic!("expected an error, got result instead")
        }
    }

    #[test]
    fn read_into_short_buffer_returns_error() {
        let mut disk_emu = emulator(1);
        let mut short = vec![0; 512];
        assert!(disk_emu.read_block(0, &mut short).is_err());
    }

    #[test]
    fn writing_to_block_with_block_size_lt_max_succeeds() {
        let mut disk_emu = emulator(1);

        // Fill half the block with meaningful data.
        disk_emu
            .write_block(0, &[0x55; 2048])
            .expect("failed to write block");
        disk_emu.sync_disk().unwrap();

        let mut read_block = vec![0x00; 4096];
        disk_emu.read_block(0, &mut read_block).unwrap();
        assert_eq!(&read_block[..2048], &[0x55; 2048][..]);
        assert_eq!(&read_block[2048..], &[0x00; 2048][..]);
    }

    #[test]
    fn reattaching_without_clearing_keeps_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(2)
            .with_block_len(16)
            .build()
            .unwrap();
        first.write_block(1, &[7; 16]).unwrap();
        first.sync_disk().unwrap();

        let mut second = FileBlockEmulator::open_disk(disk.path(), 2, 16).unwrap();
        let mut buf = [0; 16];
        second.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
    }
}
