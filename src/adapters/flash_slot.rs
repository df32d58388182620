//! Inactive-slot adapter.
//!
//! - **`target_os = "espidf"`**: [`EspSlot`] wraps the `esp-ota` crate
//!   (next update partition, image validation, boot switch).
//! - **host**: [`SimSlot`] keeps the slot in memory and records every
//!   begin/abort so tests can assert the boot image never changed.

use crate::app::ports::{FirmwareSlot, SlotError, SlotUpdate};
use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspSlot;

#[cfg(target_os = "espidf")]
impl EspSlot {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareSlot for EspSlot {
    type Update = EspSlotUpdate;

    fn capacity(&self) -> Result<u32, SlotError> {
        // SAFETY: a null start partition asks IDF for the partition after
        // the running one; the returned pointer is into the static table.
        let part = unsafe { esp_idf_svc::sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if part.is_null() {
            return Err(SlotError::NoPartition);
        }
        Ok(unsafe { (*part).size })
    }

    fn begin(&self) -> Result<EspSlotUpdate, SlotError> {
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin failed: {:?}", e);
            SlotError::BeginFailed
        })?;
        Ok(EspSlotUpdate(update))
    }
}

#[cfg(target_os = "espidf")]
pub struct EspSlotUpdate(esp_ota::OtaUpdate);

#[cfg(target_os = "espidf")]
impl SlotUpdate for EspSlotUpdate {
    fn write(&mut self, data: &[u8]) -> Result<(), SlotError> {
        self.0.write(data).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            SlotError::WriteFailed
        })
    }

    fn commit(self) -> Result<(), SlotError> {
        let mut completed = self.0.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            SlotError::ImageInvalid
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition failed: {:?}", e);
            SlotError::BootSetFailed
        })
    }

    fn abort(self) {
        // esp-ota aborts the update when the handle is dropped
        drop(self.0);
    }
}

/// Cancel the bootloader's rollback for the image we are running.
#[cfg(target_os = "espidf")]
pub fn confirm_running_image() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: running image marked valid"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn confirm_running_image() {
    info!("OTA: running image confirmation skipped (simulation)");
}

// ── Simulation ────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use sim::{SimSlot, SimSlotUpdate};

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Default)]
    struct SlotState {
        capacity: u32,
        open: bool,
        staged: Vec<u8>,
        boot: Option<Vec<u8>>,
        begins: u32,
        aborts: u32,
        reject_images: bool,
    }

    /// In-memory slot.  Clones share state, so a test can keep one while
    /// the session owns another.
    #[derive(Clone)]
    pub struct SimSlot {
        state: Arc<Mutex<SlotState>>,
    }

    impl SimSlot {
        pub fn new(capacity: u32) -> Self {
            Self {
                state: Arc::new(Mutex::new(SlotState {
                    capacity,
                    ..SlotState::default()
                })),
            }
        }

        fn lock(&self) -> MutexGuard<'_, SlotState> {
            self.state.lock().unwrap_or_else(|p| p.into_inner())
        }

        /// Make the next `commit` fail the platform image check.
        pub fn set_reject_images(&self, reject: bool) {
            self.lock().reject_images = reject;
        }

        /// Image selected for the next boot, if an update was committed.
        pub fn boot_image(&self) -> Option<Vec<u8>> {
            self.lock().boot.clone()
        }

        pub fn is_open(&self) -> bool {
            self.lock().open
        }

        pub fn begins(&self) -> u32 {
            self.lock().begins
        }

        pub fn aborts(&self) -> u32 {
            self.lock().aborts
        }
    }

    impl FirmwareSlot for SimSlot {
        type Update = SimSlotUpdate;

        fn capacity(&self) -> Result<u32, SlotError> {
            Ok(self.lock().capacity)
        }

        fn begin(&self) -> Result<SimSlotUpdate, SlotError> {
            let mut s = self.lock();
            if s.open {
                return Err(SlotError::BeginFailed);
            }
            s.open = true;
            s.begins += 1;
            s.staged.clear();
            Ok(SimSlotUpdate {
                state: Arc::clone(&self.state),
            })
        }
    }

    pub struct SimSlotUpdate {
        state: Arc<Mutex<SlotState>>,
    }

    impl SimSlotUpdate {
        fn lock(&self) -> MutexGuard<'_, SlotState> {
            self.state.lock().unwrap_or_else(|p| p.into_inner())
        }
    }

    impl SlotUpdate for SimSlotUpdate {
        fn write(&mut self, data: &[u8]) -> Result<(), SlotError> {
            let mut s = self.lock();
            if s.staged.len() + data.len() > s.capacity as usize {
                return Err(SlotError::WriteFailed);
            }
            s.staged.extend_from_slice(data);
            Ok(())
        }

        fn commit(self) -> Result<(), SlotError> {
            let mut s = self.lock();
            s.open = false;
            if s.reject_images || s.staged.is_empty() {
                s.staged.clear();
                return Err(SlotError::ImageInvalid);
            }
            let image = core::mem::take(&mut s.staged);
            info!("SimSlot: boot image set ({} bytes)", image.len());
            s.boot = Some(image);
            Ok(())
        }

        fn abort(self) {
            let mut s = self.lock();
            s.open = false;
            s.aborts += 1;
            s.staged.clear();
        }
    }

}
