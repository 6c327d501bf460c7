//! Packing dependency directories into cache blobs and back.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use trellis_core::pipeline::ArchiveCompression;
use trellis_core::{Error, Result};

const ZSTD_LEVEL: i32 = 3;

fn pack_error(what: &str, e: std::io::Error) -> Error {
    Error::CacheWriteFailed(format!("{}: {}", what, e))
}

fn append_paths<W: Write>(
    builder: &mut tar::Builder<W>,
    paths: &[PathBuf],
    base_dir: &Path,
) -> Result<()> {
    for p in paths {
        let abs_path = if p.is_absolute() {
            p.clone()
        } else {
            base_dir.join(p)
        };
        if !abs_path.exists() {
            debug!(path = %abs_path.display(), "Cache path missing, skipped");
            continue;
        }

        let name = if p.is_absolute() {
            p.strip_prefix(base_dir).unwrap_or(p)
        } else {
            p.as_path()
        };

        if abs_path.is_dir() {
            builder
                .append_dir_all(name, &abs_path)
                .map_err(|e| pack_error("failed to pack dir", e))?;
        } else {
            builder
                .append_path_with_name(&abs_path, name)
                .map_err(|e| pack_error("failed to pack file", e))?;
        }
    }
    Ok(())
}

/// Create an archive of `paths` (relative to `base_dir`) on `writer`.
pub fn create_archive<W: Write>(
    writer: W,
    paths: &[PathBuf],
    base_dir: &Path,
    compression: ArchiveCompression,
) -> Result<()> {
    match compression {
        ArchiveCompression::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)
                .map_err(|e| pack_error("zstd init failed", e))?;
            {
                let mut builder = tar::Builder::new(&mut encoder);
                append_paths(&mut builder, paths, base_dir)?;
                builder
                    .finish()
                    .map_err(|e| pack_error("failed to finish tar", e))?;
            }
            encoder
                .finish()
                .map_err(|e| pack_error("zstd finish failed", e))?;
        }
        ArchiveCompression::None => {
            let mut builder = tar::Builder::new(writer);
            append_paths(&mut builder, paths, base_dir)?;
            builder
                .finish()
                .map_err(|e| pack_error("failed to finish tar", e))?;
        }
    }
    Ok(())
}

/// Extract an archive to a destination.
pub fn extract_archive<R: Read>(
    reader: R,
    dest: &Path,
    compression: ArchiveCompression,
) -> Result<()> {
    let unpack_error = |e: std::io::Error| Error::CacheCorrupt(format!("failed to unpack archive: {}", e));
    match compression {
        ArchiveCompression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(reader).map_err(unpack_error)?;
            tar::Archive::new(decoder).unpack(dest).map_err(unpack_error)?;
        }
        ArchiveCompression::None => {
            tar::Archive::new(reader).unpack(dest).map_err(unpack_error)?;
        }
    }
    Ok(())
}

/// Pack `paths` into an in-memory blob.
pub fn pack(paths: &[PathBuf], base_dir: &Path, compression: ArchiveCompression) -> Result<Vec<u8>> {
    let mut blob = Vec::new();
    create_archive(&mut blob, paths, base_dir, compression)?;
    Ok(blob)
}

/// Unpack a blob produced by [`pack`] into `dest`.
pub fn unpack(blob: &[u8], dest: &Path, compression: ArchiveCompression) -> Result<()> {
    extract_archive(blob, dest, compression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".pip-cache/wheels")).unwrap();
        fs::write(dir.path().join(".pip-cache/wheels/numpy.whl"), b"wheel").unwrap();
        fs::write(dir.path().join("requirements.txt"), b"numpy\n").unwrap();
        dir
    }

    #[test]
    fn test_pack_and_unpack_restore_tree() {
        let src = workspace();
        let paths = vec![PathBuf::from(".pip-cache"), PathBuf::from("requirements.txt")];

        for compression in [ArchiveCompression::Zstd, ArchiveCompression::None] {
            let blob = pack(&paths, src.path(), compression).unwrap();
            let dest = tempfile::tempdir().unwrap();
            unpack(&blob, dest.path(), compression).unwrap();

            assert_eq!(
                fs::read(dest.path().join(".pip-cache/wheels/numpy.whl")).unwrap(),
                b"wheel"
            );
            assert_eq!(fs::read(dest.path().join("requirements.txt")).unwrap(), b"numpy\n");
        }
    }

    #[test]
    fn test_missing_paths_are_skipped() {
        let src = workspace();
        let blob = pack(&[PathBuf::from("node_modules")], src.path(), ArchiveCompression::None).unwrap();
        let dest = tempfile::tempdir().unwrap();
        unpack(&blob, dest.path(), ArchiveCompression::None).unwrap();
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let dest = tempfile::tempdir().unwrap();
        let err = unpack(b"not an archive at all", dest.path(), ArchiveCompression::Zstd).unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt(_)));
    }
}
