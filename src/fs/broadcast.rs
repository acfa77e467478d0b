use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, SpawnfsError};
use crate::fs::entry::{Entry, Handle, Metadata};

/// A write-many, multi-reader append channel, used for the `err` and `state`
/// streams. Every open handle reads from its own offset, so late readers
/// observe the full history. Readers at the tail block until more data
/// arrives; closing wakes them all and turns the tail into end-of-stream.
pub struct Broadcast {
    name: String,
    inner: Mutex<BroadcastInner>,
    cond: Condvar,
}

struct BroadcastInner {
    buf: Vec<u8>,
    closed: bool,
    modified: SystemTime,
}

impl Broadcast {
    pub fn new(name: &str) -> Arc<Broadcast> {
        Arc::new(Broadcast {
            name: name.to_string(),
            inner: Mutex::new(BroadcastInner {
                buf: Vec::new(),
                closed: false,
                modified: SystemTime::now(),
            }),
            cond: Condvar::new(),
        })
    }

    pub fn append(&self, bytes: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SpawnfsError::Sealed);
        }
        inner.modified = SystemTime::now();
        inner.buf.extend_from_slice(bytes);
        self.cond.notify_all();
        Ok(bytes.len())
    }

    pub fn append_line(&self, line: &str) -> Result<()> {
        self.append(line.as_bytes())?;
        self.append(b"\n")?;
        Ok(())
    }

    /// Signal readers that no more data will arrive. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            inner.modified = SystemTime::now();
        }
        self.cond.notify_all();
    }
}

impl Entry for Broadcast {
    fn stat(&self) -> Result<Metadata> {
        let inner = self.inner.lock();
        Ok(Metadata::file(
            &self.name,
            inner.buf.len() as u64,
            0o444,
            inner.modified,
        ))
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        Ok(Box::new(BroadcastHandle {
            chan: self,
            offset: 0,
        }))
    }
}

struct BroadcastHandle {
    chan: Arc<Broadcast>,
    offset: usize,
}

impl Handle for BroadcastHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.chan.inner.lock();
        loop {
            if self.offset < inner.buf.len() {
                let n = buf.len().min(inner.buf.len() - self.offset);
                buf[..n].copy_from_slice(&inner.buf[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if inner.closed {
                return Ok(0);
            }
            self.chan.cond.wait(&mut inner);
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.chan.append(buf)
    }
}
