//! Streaming image writer for the inactive slot.
//!
//! Flow: `begin_write(size)` → N × `write_chunk` → `finalize` (or `abort`).
//!
//! The writer fails closed: a chunk that would overshoot the declared
//! size, a short stream, or a rejected image all leave the running image
//! as the boot target.  A [`WriteHandle`] dropped without `finalize`
//! aborts the slot update.

use core::fmt::Write as _;

use hmac_sha256::Hash;
use log::{info, warn};

use crate::app::ports::{FirmwareSlot, SlotUpdate};
use crate::error::{OtaError, Result};

/// Integer percentage of `written` over `expected`, clamped to 0–100.
pub fn progress_percent(written: u32, expected: u32) -> u8 {
    if expected == 0 {
        return 0;
    }
    let pct = u64::from(written) * 100 / u64::from(expected);
    pct.min(100) as u8
}

/// Lowercase hex rendering of a SHA-256 digest.
pub fn digest_hex(digest: &[u8; 32]) -> heapless::String<64> {
    let mut out = heapless::String::new();
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

// ── Write handle ──────────────────────────────────────────────

/// An in-progress slot write.
pub struct WriteHandle<U: SlotUpdate> {
    update: Option<U>,
    expected: u32,
    written: u32,
    digest: Hash,
}

impl<U: SlotUpdate> WriteHandle<U> {
    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.written, self.expected)
    }

    fn abort_slot(&mut self) {
        if let Some(update) = self.update.take() {
            update.abort();
            warn!(
                "Flash: aborted after {}/{} bytes",
                self.written, self.expected
            );
        }
    }
}

impl<U: SlotUpdate> Drop for WriteHandle<U> {
    fn drop(&mut self) {
        self.abort_slot();
    }
}

/// Outcome of a successful `finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashReport {
    pub bytes: u32,
    /// SHA-256 of the bytes written.  Informational only; the platform's
    /// own image check is what gates the boot switch.
    pub sha256: [u8; 32],
}

// ── Writer ────────────────────────────────────────────────────

pub struct FlashWriter<'a, F> {
    slot: &'a F,
}

impl<'a, F: FirmwareSlot> FlashWriter<'a, F> {
    pub fn new(slot: &'a F) -> Self {
        Self { slot }
    }

    /// Open the inactive slot for an image of `expected_size` bytes.
    ///
    /// Fails with `InsufficientSpace` before anything is written when the
    /// slot is too small.
    pub fn begin_write(&self, expected_size: u32) -> Result<WriteHandle<F::Update>> {
        if expected_size == 0 {
            return Err(OtaError::Io("Invalid content length".into()));
        }
        let available = self.slot.capacity()?;
        if expected_size > available {
            warn!(
                "Flash: image {} bytes exceeds slot capacity {}",
                expected_size, available
            );
            return Err(OtaError::InsufficientSpace {
                required: expected_size,
                available,
            });
        }
        let update = self.slot.begin()?;
        info!("Flash: begin ({} bytes, slot {})", expected_size, available);
        Ok(WriteHandle {
            update: Some(update),
            expected: expected_size,
            written: 0,
            digest: Hash::new(),
        })
    }

    /// Append `bytes`.  Returns the cumulative count written.
    pub fn write_chunk(&self, handle: &mut WriteHandle<F::Update>, bytes: &[u8]) -> Result<u32> {
        let Some(update) = handle.update.as_mut() else {
            return Err(OtaError::Io("write on a closed slot".into()));
        };
        let len = u32::try_from(bytes.len())
            .map_err(|_| OtaError::Io("chunk too large".into()))?;
        let total = handle.written.saturating_add(len);
        if total > handle.expected {
            handle.abort_slot();
            return Err(OtaError::Io(format!(
                "chunk overflows declared size ({} > {})",
                total, handle.expected
            )));
        }
        if let Err(e) = update.write(bytes) {
            handle.abort_slot();
            return Err(e.into());
        }
        handle.digest.update(bytes);
        handle.written = total;
        Ok(total)
    }

    /// Verify the byte count, run the platform image check and switch the
    /// boot target.
    pub fn finalize(&self, mut handle: WriteHandle<F::Update>) -> Result<FlashReport> {
        let Some(update) = handle.update.take() else {
            return Err(OtaError::Io("finalize on a closed slot".into()));
        };
        if handle.written != handle.expected {
            update.abort();
            warn!(
                "Flash: written bytes mismatch ({}/{})",
                handle.written, handle.expected
            );
            return Err(OtaError::Io(format!(
                "Written bytes mismatch: {} of {}",
                handle.written, handle.expected
            )));
        }
        update.commit()?;

        let digest = core::mem::replace(&mut handle.digest, Hash::new()).finalize();
        info!(
            "Flash: committed {} bytes, sha256 {}",
            handle.written,
            digest_hex(&digest)
        );
        Ok(FlashReport {
            bytes: handle.written,
            sha256: digest,
        })
    }

    pub fn abort(&self, mut handle: WriteHandle<F::Update>) {
        handle.abort_slot();
    }
}
