mod cli;

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use indexed_fs::IndexedFs;
use indexed_fs::SECTOR_SIZE;
use indexed_fs_fuse::SectorFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nimage={:?}", cli.source, cli.image);

    let device = Arc::new(SectorFile::new(
        {
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&cli.image)?;
            fd.set_len((cli.sectors * SECTOR_SIZE) as u64)?;

            fd
        },
        cli.sectors,
    ));

    let fs = IndexedFs::format(device);

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let mut data: Vec<u8> = Vec::new();
        File::open(entry.path())?.read_to_end(&mut data)?;

        let sector = fs.create_inode(data.len()).expect("image is full");
        let inode = fs.open_inode(sector);
        inode.write_at(0, &data).expect("image is full");
        println!(
            "{} -> sector {sector}",
            entry.file_name().to_string_lossy()
        );
    }

    fs.flush();
    Ok(())
}
