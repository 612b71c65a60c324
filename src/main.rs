use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;
use std::fs::File;
use std::path::PathBuf;

use newfs::fuse::NewfsFs;
use newfs::newfs::{FormatOptions, Newfs};
use newfs::storage::FileBackedStorage;

#[derive(Parser)]
struct Args {
    /// newfs image file
    device: PathBuf,
    /// FUSE mountpoint
    mountpoint: PathBuf,
    /// Number of inodes in a freshly formatted image
    #[arg(long, default_value_t = FormatOptions::default().max_inodes)]
    max_inodes: usize,
    /// Format the image even if it already holds a filesystem
    #[arg(long)]
    format: bool,
    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let device = File::options()
        .read(true)
        .write(true)
        .open(&args.device)
        .context("unable to open image file in read-write mode")?;
    let storage = FileBackedStorage::new(device)?;

    let options = FormatOptions {
        max_inodes: args.max_inodes,
    };
    let newfs = if args.format {
        Newfs::format(storage, &options)?
    } else {
        Newfs::mount(storage, &options)?
    };

    let mut mount_options = vec![MountOption::FSName("newfs".to_owned())];
    if args.auto_unmount {
        mount_options.push(MountOption::AutoUnmount);
    }

    info!("mounting {} at {}", args.device.display(), args.mountpoint.display());
    fuser::mount2(NewfsFs::new(newfs), &args.mountpoint, &mount_options)
        .context("unable to mount filesystem")?;

    Ok(())
}
