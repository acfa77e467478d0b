use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, SpawnfsError};
use crate::fs::entry::{Entry, Handle, Metadata};

/// Upper bound on buffered plumb input. Control payloads are small; anything
/// larger is a client error, not a streaming use-case.
pub const MAX_PLUMB_BYTES: usize = 1 << 20;

pub type Trigger = Box<dyn Fn(&Plumber) -> bool + Send + Sync>;

/// A write-once control file. Writes accumulate in a bounded buffer; the
/// first close seals the buffer and, if any bytes arrived, fires the trigger
/// exactly once with the plumber itself. The trigger's boolean result becomes
/// the plumbed state, and a plumbed file rejects all further writes.
pub struct Plumber {
    name: String,
    trigger: Option<Trigger>,
    inner: Mutex<PlumberInner>,
}

struct PlumberInner {
    buf: Vec<u8>,
    sealed: bool,
    plumbed: bool,
    modified: SystemTime,
}

impl Plumber {
    pub fn new(name: &str, trigger: Trigger) -> Arc<Plumber> {
        Arc::new(Plumber {
            name: name.to_string(),
            trigger: Some(trigger),
            inner: Mutex::new(PlumberInner {
                buf: Vec::new(),
                sealed: false,
                plumbed: false,
                modified: SystemTime::now(),
            }),
        })
    }

    /// The buffered payload. Triggers call this after close, when the buffer
    /// is sealed and read-only.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().buf.clone()
    }

    pub fn plumbed(&self) -> bool {
        self.inner.lock().plumbed
    }

    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(SpawnfsError::Sealed);
        }
        if inner.buf.len() + bytes.len() > MAX_PLUMB_BYTES {
            return Err(SpawnfsError::BufferFull(MAX_PLUMB_BYTES));
        }
        inner.modified = SystemTime::now();
        inner.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Seal the buffer and plumb. Idempotent: only the first close can fire
    /// the trigger, and only when the buffer received at least one byte. The
    /// trigger runs outside the lock; it is expected to hand off asynchronous
    /// work and return quickly.
    pub fn close(&self) -> Result<()> {
        let fire = {
            let mut inner = self.inner.lock();
            if inner.sealed {
                return Ok(());
            }
            inner.sealed = true;
            inner.modified = SystemTime::now();
            !inner.buf.is_empty()
        };

        if fire {
            if let Some(trigger) = self.trigger.as_ref() {
                let plumbed = trigger(self);
                self.inner.lock().plumbed = plumbed;
            }
        }
        Ok(())
    }
}

impl Entry for Plumber {
    fn stat(&self) -> Result<Metadata> {
        let inner = self.inner.lock();
        Ok(Metadata::file(
            &self.name,
            inner.buf.len() as u64,
            0o222,
            inner.modified,
        ))
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        Ok(Box::new(PlumbHandle {
            plumber: self,
            offset: 0,
        }))
    }
}

struct PlumbHandle {
    plumber: Arc<Plumber>,
    offset: usize,
}

impl Handle for PlumbHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.plumber.inner.lock();
        if self.offset >= inner.buf.len() {
            return Ok(0);
        }
        let n = buf.len().min(inner.buf.len() - self.offset);
        buf[..n].copy_from_slice(&inner.buf[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.plumber.write(buf)
    }

    fn close(&mut self) -> Result<()> {
        self.plumber.close()
    }
}
