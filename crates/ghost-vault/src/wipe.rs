//! Secure file deletion
//!
//! Overwrite the full file length with fresh random bytes for each pass,
//! syncing to storage after every pass, then rename to a random name and
//! unlink. On RAM-backed filesystems this leaves nothing behind; on flash
//! media wear levelling may still retain old blocks.

use rand::{rngs::OsRng, RngCore};
use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const WIPE_BLOCK_SIZE: usize = 8192;

/// Random lowercase hex name of `bytes` bytes
fn random_name(bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

fn overwrite(path: &Path, passes: u32) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    let mut block = vec![0u8; WIPE_BLOCK_SIZE];

    for _ in 0..passes.max(1) {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(WIPE_BLOCK_SIZE as u64) as usize;
            OsRng.fill_bytes(&mut block[..n]);
            file.write_all(&block[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    Ok(())
}

/// Overwrite, rename and remove a file
///
/// A path that no longer exists is already wiped.
pub fn secure_wipe(path: &Path, passes: u32) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_file() => overwrite(path, passes)?,
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not a regular file", path),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let renamed: PathBuf = path.with_file_name(random_name(16));
    let target = match std::fs::rename(path, &renamed) {
        Ok(()) => renamed,
        Err(e) => {
            warn!("Could not rename {:?} before removal: {}", path, e);
            path.to_path_buf()
        }
    };

    std::fs::remove_file(&target)?;
    debug!("Wiped {:?} with {} passes", path, passes.max(1));
    Ok(())
}
