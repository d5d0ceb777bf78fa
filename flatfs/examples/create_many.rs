use flatfs::{FlatFs, MemStore};

/// Creates more files than there are inodes and prints the outcome of each.
pub fn main() {
    env_logger::init();

    let mut fs = FlatFs::new(MemStore::default());
    for i in 0..10 {
        let name = format!("{}_.txt", i);
        match fs.create(&name) {
            Ok(inum) => println!("Creating file {}: {}", name, inum),
            Err(e) => println!("Creating file {}: {}", name, e),
        }
    }
    match fs.dump() {
        Ok(state) => print!("{}", state),
        Err(e) => eprintln!("dump failed: {}", e),
    }
}
