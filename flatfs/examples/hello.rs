use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::{device_blocks, DiskStore, FlatFs, Geometry};

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let geometry = Geometry::default();
    let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile()?)
        .with_block_count(device_blocks(&geometry)?)
        .with_block_len(geometry.block_size)
        .build()?;
    let mut fs = FlatFs::new(DiskStore::format(dev, geometry)?);

    let inum = fs.create("a.txt")?;
    let fd = fs.open("a.txt")?;
    fs.write(fd, b"HelloWorld")?;
    println!("created inode {}, wrote {} bytes through {}", inum, fs.stat("a.txt")?.file_size, fd);

    // Writes don't move the offset, so walk to the end and back.
    fs.seek(fd, 10)?;
    fs.seek(fd, -10)?;
    let mut buf = [0; 10];
    fs.read(fd, &mut buf)?;
    println!("read back {:?}", String::from_utf8_lossy(&buf));
    fs.close(fd);
    Ok(())
}
