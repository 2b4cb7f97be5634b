//! Gzipped tar packing and unpacking for volume streaming.
//!
//! These are synchronous and meant to run under `spawn_blocking`; the
//! callers spool request bodies to temp files first.

use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

/// Write a gzipped tar of `source` into `out`. A directory is archived as
/// its contents (entry names relative to it); a regular file becomes a
/// single entry named after the file.
pub fn pack<W: Write>(source: &Path, out: W) -> io::Result<()> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = Builder::new(encoder);

    let metadata = fs::symlink_metadata(source)?;
    if metadata.is_file() {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::other(format!("unusable file name: {}", source.display())))?;
        append_file(&mut builder, source, name, &metadata)?;
    } else {
        append_tree(&mut builder, source)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

/// Extract a gzipped tar from `input` into `dest`. Permissions from the
/// archive are preserved; ownership only when `preserve_ownership` is set
/// (which requires running as root).
pub fn unpack<R: Read>(input: R, dest: &Path, preserve_ownership: bool) -> io::Result<()> {
    let decoder = GzDecoder::new(BufReader::new(input));
    let mut archive = Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(preserve_ownership);
    archive.unpack(dest)
}

fn append_tree<W: Write>(builder: &mut Builder<W>, source: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();

        let relative = match path.strip_prefix(source) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        // the source directory itself
        if relative.is_empty() {
            continue;
        }

        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_file() {
            append_file(builder, path, &relative, &metadata)?;
        } else if metadata.is_dir() {
            append_dir(builder, &relative, &metadata)?;
        } else if metadata.file_type().is_symlink() {
            append_symlink(builder, path, &relative, &metadata)?;
        } else {
            tracing::warn!("skipping special file: {}", path.display());
        }
    }
    Ok(())
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
    metadata: &Metadata,
) -> io::Result<()> {
    let mut file = BufReader::new(File::open(path)?);
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_size(metadata.len());
    header.set_cksum();
    builder.append_data(&mut header, name, &mut file)
}

fn append_dir<W: Write>(builder: &mut Builder<W>, name: &str, metadata: &Metadata) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_cksum();
    let name = if name.ends_with('/') {
        name.to_string()
    } else {
        format!("{name}/")
    };
    builder.append_data(&mut header, name, io::empty())
}

fn append_symlink<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
    metadata: &Metadata,
) -> io::Result<()> {
    let target = fs::read_link(path)?;
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    builder.append_link(&mut header, name, &target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("file.txt"), "hello").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/nested.txt"), "nested").unwrap();
        std::os::unix::fs::symlink("file.txt", src.path().join("link")).unwrap();

        let mut spool = tempfile::tempfile().unwrap();
        pack(src.path(), &mut spool).unwrap();
        spool.rewind().unwrap();

        let dest = tempdir().unwrap();
        unpack(&spool, dest.path(), false).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("file.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(dest.path().join("sub/nested.txt")).unwrap(),
            "nested"
        );
        assert_eq!(
            fs::read_link(dest.path().join("link")).unwrap(),
            Path::new("file.txt")
        );
    }

    #[test]
    fn test_single_file() {
        let src = tempdir().unwrap();
        let file = src.path().join("only.txt");
        fs::write(&file, "just me").unwrap();

        let mut spool = tempfile::tempfile().unwrap();
        pack(&file, &mut spool).unwrap();
        spool.rewind().unwrap();

        let dest = tempdir().unwrap();
        unpack(&spool, dest.path(), false).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("only.txt")).unwrap(), "just me");
    }

    #[test]
    fn test_unpack_garbage_is_invalid_data() {
        let dest = tempdir().unwrap();
        let err = unpack(&b"definitely not gzip"[..], dest.path(), false).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
        ));
    }
}
