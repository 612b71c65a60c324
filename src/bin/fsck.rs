use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use newfs::{
    newfs::{EntryKind, Newfs},
    storage::{FileBackedStorage, NewfsStorage},
};

#[derive(Parser)]
struct Args {
    /// newfs image file
    device: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let device = File::options().read(true).open(args.device)?;
    let storage = FileBackedStorage::new(device)?;

    // loading runs every consistency check
    let newfs = Newfs::load(storage)?;
    let superblock = newfs.superblock();

    println!(
        "inodes: {} used, {} free",
        superblock.allocated_inodes,
        newfs.free_inodes()
    );
    println!(
        "data blocks: {} used, {} free",
        superblock.allocated_blocks,
        newfs.free_blocks()
    );

    print_tree(&newfs, "/", 0)
}

fn print_tree<S: NewfsStorage>(newfs: &Newfs<S>, path: &str, depth: usize) -> Result<()> {
    let mut start = 0;

    while let Some(child) = newfs
        .list_children(path, start)
        .with_context(|| format!("listing {path}"))?
    {
        let child_path = format!("{}/{}", path.trim_end_matches('/'), child.name);
        let size = newfs.attributes(&child_path)?.size;

        match child.kind {
            EntryKind::Directory => {
                println!("{:indent$}{}/", "", child.name, indent = depth * 2);
                print_tree(newfs, &child_path, depth + 1)?;
            }
            EntryKind::Regular => {
                println!("{:indent$}{} ({size} bytes)", "", child.name, indent = depth * 2);
            }
        }

        start += 1;
    }

    Ok(())
}
