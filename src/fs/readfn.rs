use std::sync::Arc;
use std::time::SystemTime;

use crate::error::Result;
use crate::fs::entry::{Entry, Handle, Metadata};

pub type ReadCallback = Box<dyn Fn(&mut [u8]) -> Result<usize> + Send + Sync>;

/// A read-callback file: each open handle produces one callback payload and
/// then end-of-stream. The `clone` allocation file is built on this — a
/// failed callback (e.g. `ShortBuffer`) leaves the handle fresh so the
/// client can retry with a larger buffer.
pub struct ReadFn {
    name: String,
    read: ReadCallback,
    modified: SystemTime,
}

impl ReadFn {
    pub fn new(name: &str, read: ReadCallback) -> Arc<ReadFn> {
        Arc::new(ReadFn {
            name: name.to_string(),
            read,
            modified: SystemTime::now(),
        })
    }
}

impl Entry for ReadFn {
    fn stat(&self) -> Result<Metadata> {
        Ok(Metadata::file(&self.name, 0, 0o444, self.modified))
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        Ok(Box::new(ReadFnHandle {
            file: self,
            done: false,
        }))
    }
}

struct ReadFnHandle {
    file: Arc<ReadFn>,
    done: bool,
}

impl Handle for ReadFnHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = (self.file.read)(buf)?;
        self.done = true;
        Ok(n)
    }
}
