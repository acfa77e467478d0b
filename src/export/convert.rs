use fuser::{FileAttr, FileType};
use std::io;
use std::time::SystemTime;

use crate::error::SpawnfsError;
use crate::fs::Metadata;

/// Map a spawnfs error to the closest libc error code.
pub(crate) fn error_to_libc(e: &SpawnfsError) -> i32 {
    match e {
        SpawnfsError::NotExist(_) => libc::ENOENT,
        SpawnfsError::NotADirectory(_) => libc::ENOTDIR,
        SpawnfsError::AlreadyExists(_) => libc::EEXIST,
        SpawnfsError::Sealed => libc::EACCES,
        SpawnfsError::ShortBuffer(_) => libc::EINVAL,
        SpawnfsError::BufferFull(_) => libc::EFBIG,
        SpawnfsError::NotSupported => libc::ENOTSUP,
        SpawnfsError::Timeout(_) => libc::ETIMEDOUT,
        SpawnfsError::Io(e) => io_error_to_libc(e),
        _ => libc::EIO,
    }
}

pub(crate) fn io_error_to_libc(e: &io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }
    match e.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        io::ErrorKind::Interrupted => libc::EINTR,
        _ => libc::EIO,
    }
}

/// Build kernel-facing attributes from an entry's metadata snapshot.
pub(crate) fn metadata_to_fileattr(meta: &Metadata, ino: u64, uid: u32, gid: u32) -> FileAttr {
    let kind = if meta.is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };

    FileAttr {
        ino,
        size: meta.size,
        blocks: meta.size.div_ceil(512),
        atime: meta.modified,
        mtime: meta.modified,
        ctime: meta.modified,
        crtime: SystemTime::UNIX_EPOCH,
        kind,
        perm: (meta.mode & 0o777) as u16,
        nlink: if meta.is_dir { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}
