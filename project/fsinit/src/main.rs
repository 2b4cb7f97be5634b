//! Prepares a loopback-backed btrfs filesystem for the volume daemon: a
//! sparse disk image attached to a loopback device, formatted once, and
//! mounted at the requested path. `--remove` tears the whole stack down.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::mount::{mount, umount, MsFlags};

#[derive(Parser, Debug)]
#[command(name = "fsinit", about = "Prepare a loopback-backed btrfs filesystem")]
struct Args {
    /// Disk image backing the filesystem
    #[arg(long, value_name = "FILE")]
    disk_image: PathBuf,

    /// Loopback device to attach the image to
    #[arg(long, value_name = "DEV")]
    loopback_device: PathBuf,

    /// Where to mount the filesystem
    #[arg(long, value_name = "DIR")]
    mount_path: PathBuf,

    /// Size of the disk image when it has to be created
    #[arg(long, value_name = "MB", default_value_t = 1024)]
    size_in_mb: u64,

    /// Tear down the mount, loopback device and image
    #[arg(long)]
    remove: bool,
}

fn main() {
    let args = Args::parse();
    let result = if args.remove { remove(&args) } else { create(&args) };
    if let Err(err) = result {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn create(args: &Args) -> Result<()> {
    let fresh_image = !args.disk_image.exists();
    if fresh_image {
        let image = File::create(&args.disk_image)
            .with_context(|| format!("failed to create {}", args.disk_image.display()))?;
        image
            .set_len(args.size_in_mb * 1024 * 1024)
            .context("failed to size disk image")?;
    }

    if !loopback_attached(&args.loopback_device)? {
        run(
            "losetup",
            [args.loopback_device.as_os_str(), args.disk_image.as_os_str()],
        )?;
    }

    if fresh_image {
        run("mkfs.btrfs", [args.loopback_device.as_os_str()])?;
    }

    fs::create_dir_all(&args.mount_path)
        .with_context(|| format!("failed to create {}", args.mount_path.display()))?;

    if !mounted(&args.mount_path)? {
        mount(
            Some(args.loopback_device.as_path()),
            args.mount_path.as_path(),
            Some("btrfs"),
            MsFlags::empty(),
            None::<&str>,
        )
        .with_context(|| format!("failed to mount {}", args.mount_path.display()))?;
    }

    Ok(())
}

fn remove(args: &Args) -> Result<()> {
    if mounted(&args.mount_path)? {
        umount(args.mount_path.as_path())
            .with_context(|| format!("failed to unmount {}", args.mount_path.display()))?;
    }

    if loopback_attached(&args.loopback_device)? {
        run("losetup", [OsStr::new("-d"), args.loopback_device.as_os_str()])?;
    }

    if args.disk_image.exists() {
        fs::remove_file(&args.disk_image)
            .with_context(|| format!("failed to remove {}", args.disk_image.display()))?;
    }
    if args.mount_path.exists() {
        fs::remove_dir_all(&args.mount_path)
            .with_context(|| format!("failed to remove {}", args.mount_path.display()))?;
    }

    Ok(())
}

fn run<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// `losetup <dev>` prints status and exits 0 only when the device is
/// attached.
fn loopback_attached(device: &Path) -> Result<bool> {
    let output = Command::new("losetup")
        .arg(device)
        .output()
        .context("failed to run losetup")?;
    Ok(output.status.success())
}

fn mounted(mount_path: &Path) -> Result<bool> {
    let mut mounts = String::new();
    File::open("/proc/mounts")
        .context("failed to open /proc/mounts")?
        .read_to_string(&mut mounts)
        .context("failed to read /proc/mounts")?;

    let canonical = mount_path
        .canonicalize()
        .unwrap_or_else(|_| mount_path.to_path_buf());
    Ok(mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| Path::new(target) == canonical))
}
