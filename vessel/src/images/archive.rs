//! Image tarball ingest.
//!
//! An image enters the store as a tar archive (optionally gzip-compressed)
//! of its root filesystem. The content digest is the SHA-256 of the archive
//! bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use vessel_shared::{VesselError, VesselResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// SHA-256 of the archive, as lowercase hex.
pub(crate) fn digest_file(path: &Path) -> VesselResult<String> {
    let file = File::open(path)
        .map_err(|e| VesselError::NotFound(format!("image archive {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Unpack the archive into `dest`, which must exist and be empty.
pub(crate) fn unpack(path: &Path, dest: &Path) -> VesselResult<()> {
    let mut file = File::open(path)
        .map_err(|e| VesselError::NotFound(format!("image archive {}: {}", path.display(), e)))?;

    let mut magic = [0u8; 2];
    let gzipped = matches!(file.read(&mut magic), Ok(2) if magic == GZIP_MAGIC);
    let file = File::open(path)?;

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| VesselError::InvalidArg(format!("unpacking {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_tar(dir: &Path, gz: bool) -> std::path::PathBuf {
        let payload = dir.join("payload");
        std::fs::create_dir_all(payload.join("bin")).unwrap();
        std::fs::write(payload.join("bin/hello"), b"hi there\n").unwrap();

        let tar_path = dir.join(if gz { "img.tar.gz" } else { "img.tar" });
        let file = File::create(&tar_path).unwrap();
        if gz {
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(enc);
            builder.append_dir_all(".", &payload).unwrap();
            builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
        } else {
            let mut builder = tar::Builder::new(file);
            builder.append_dir_all(".", &payload).unwrap();
            builder.into_inner().unwrap().flush().unwrap();
        }
        tar_path
    }

    #[test]
    fn digest_is_stable() {
        let tmp = TempDir::new().unwrap();
        let tar = make_tar(tmp.path(), false);
        let a = digest_file(&tar).unwrap();
        let b = digest_file(&tar).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn unpack_plain_tar() {
        let tmp = TempDir::new().unwrap();
        let tar = make_tar(tmp.path(), false);
        let dest = tmp.path().join("rootfs");
        std::fs::create_dir_all(&dest).unwrap();
        unpack(&tar, &dest).unwrap();
        assert_eq!(
            std::fs::read(dest.join("bin/hello")).unwrap(),
            b"hi there\n"
        );
    }

    #[test]
    fn unpack_gzipped_tar() {
        let tmp = TempDir::new().unwrap();
        let tar = make_tar(tmp.path(), true);
        let dest = tmp.path().join("rootfs");
        std::fs::create_dir_all(&dest).unwrap();
        unpack(&tar, &dest).unwrap();
        assert!(dest.join("bin/hello").is_file());
    }

    #[test]
    fn missing_archive_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = digest_file(&tmp.path().join("absent.tar")).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::NotFound);
    }
}
