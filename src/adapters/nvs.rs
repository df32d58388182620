//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`SettingsPort`] for the OTA pipeline's `ota` and `mqtt`
//! namespaces.
//!
//! - **`target_os = "espidf"`**: raw `nvs_*` FFI.  Each setter commits in
//!   the same handle, so a value survives power loss as soon as the call
//!   returns; [`commit`](SettingsPort::commit) is then a cheap flush.
//! - **host**: in-memory map.  Writes are staged until `commit`, and
//!   [`NvsSettings::discard_uncommitted`] simulates a power cut.

use crate::app::ports::{SettingsPort, StorageError};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::Mutex;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// NVS keys and namespaces are limited to 15 bytes plus NUL.
const NVS_KEY_MAX: usize = 15;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    I32(i32),
    Bool(bool),
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimStore {
    committed: HashMap<String, Value>,
    staged: HashMap<String, Value>,
}

pub struct NvsSettings {
    #[cfg(not(target_os = "espidf"))]
    store: Mutex<SimStore>,
}

impl NvsSettings {
    /// Initialise NVS flash and return the adapter.
    ///
    /// On first boot or after a layout change the partition is erased and
    /// re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS use.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsSettings: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsSettings: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: Mutex::new(SimStore::default()),
        })
    }

    fn key_buf(s: &str) -> Result<[u8; 16], StorageError> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > NVS_KEY_MAX || bytes.contains(&0) {
            return Err(StorageError::TypeMismatch);
        }
        let mut buf = [0u8; 16];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }
}

// ── Host simulation ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl NvsSettings {
    fn composite_key(namespace: &str, key: &str) -> Result<String, StorageError> {
        Self::key_buf(namespace)?;
        Self::key_buf(key)?;
        Ok(format!("{}::{}", namespace, key))
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let k = Self::composite_key(namespace, key)?;
        let store = self.store.lock().map_err(|_| StorageError::IoError)?;
        Ok(store
            .staged
            .get(&k)
            .or_else(|| store.committed.get(&k))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let k = Self::composite_key(namespace, key)?;
        let mut store = self.store.lock().map_err(|_| StorageError::IoError)?;
        store.staged.insert(k, value);
        Ok(())
    }

    /// Drop every write not yet committed, as a power cut would.
    pub fn discard_uncommitted(&self) {
        if let Ok(mut store) = self.store.lock() {
            store.staged.clear();
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl SettingsPort for NvsSettings {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(StorageError::TypeMismatch),
        }
    }

    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.set(namespace, key, Value::Str(value.to_owned()))
    }

    fn get_i32(&self, namespace: &str, key: &str) -> Result<Option<i32>, StorageError> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Value::I32(v)) => Ok(Some(v)),
            Some(_) => Err(StorageError::TypeMismatch),
        }
    }

    fn set_i32(&self, namespace: &str, key: &str, value: i32) -> Result<(), StorageError> {
        self.set(namespace, key, Value::I32(value))
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StorageError> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Value::Bool(v)) => Ok(Some(v)),
            Some(_) => Err(StorageError::TypeMismatch),
        }
    }

    fn set_bool(&self, namespace: &str, key: &str, value: bool) -> Result<(), StorageError> {
        self.set(namespace, key, Value::Bool(value))
    }

    fn commit(&self, namespace: &str) -> Result<(), StorageError> {
        Self::key_buf(namespace)?;
        let prefix = format!("{}::", namespace);
        let mut store = self.store.lock().map_err(|_| StorageError::IoError)?;
        let keys: Vec<String> = store
            .staged
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for k in keys {
            if let Some(v) = store.staged.remove(&k) {
                store.committed.insert(k, v);
            }
        }
        Ok(())
    }
}

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl NvsSettings {
    /// Open an NVS namespace, execute a closure with the handle, then close.
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = Self::key_buf(namespace).map_err(|_| ESP_ERR_NVS_INVALID_NAME)?;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let mut handle: nvs_handle_t = 0;
        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Read helper: a missing namespace or key is `None`, not an error.
    fn read<T>(
        namespace: &str,
        key: &str,
        f: impl FnOnce(nvs_handle_t, *const core::ffi::c_char) -> Result<T, i32>,
    ) -> Result<Option<T>, StorageError> {
        let key_buf = Self::key_buf(key)?;
        let result =
            Self::with_nvs_handle(namespace, false, |h| f(h, key_buf.as_ptr() as *const _));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(e) if e == ESP_ERR_NVS_TYPE_MISMATCH => Err(StorageError::TypeMismatch),
            Err(e) => {
                warn!("NvsSettings: read {}::{} failed ({})", namespace, key, e);
                Err(StorageError::IoError)
            }
        }
    }

    /// Write helper: set then commit within one handle.
    fn write(
        namespace: &str,
        key: &str,
        f: impl FnOnce(nvs_handle_t, *const core::ffi::c_char) -> i32,
    ) -> Result<(), StorageError> {
        let key_buf = Self::key_buf(key)?;
        let result = Self::with_nvs_handle(namespace, true, |h| {
            let ret = f(h, key_buf.as_ptr() as *const _);
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(h) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            warn!("NvsSettings: write {}::{} failed ({})", namespace, key, e);
            if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                StorageError::Full
            } else if e == ESP_ERR_NVS_NOT_FOUND || e == ESP_ERR_NVS_INVALID_NAME {
                StorageError::OpenFailed
            } else {
                StorageError::IoError
            }
        })
    }
}

#[cfg(target_os = "espidf")]
impl SettingsPort for NvsSettings {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        Self::read(namespace, key, |h, k| {
            let mut len: usize = 0;
            let ret = unsafe { nvs_get_str(h, k, core::ptr::null_mut(), &mut len) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let mut buf = vec![0u8; len];
            let ret = unsafe { nvs_get_str(h, k, buf.as_mut_ptr() as *mut _, &mut len) };
            if ret != ESP_OK {
                return Err(ret);
            }
            // Drop the trailing NUL.
            buf.truncate(len.saturating_sub(1));
            String::from_utf8(buf).map_err(|_| ESP_ERR_NVS_TYPE_MISMATCH)
        })
    }

    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let mut c_value = Vec::with_capacity(value.len() + 1);
        c_value.extend_from_slice(value.as_bytes());
        c_value.push(0);
        Self::write(namespace, key, |h, k| unsafe {
            nvs_set_str(h, k, c_value.as_ptr() as *const _)
        })
    }

    fn get_i32(&self, namespace: &str, key: &str) -> Result<Option<i32>, StorageError> {
        Self::read(namespace, key, |h, k| {
            let mut v: i32 = 0;
            let ret = unsafe { nvs_get_i32(h, k, &mut v) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(v)
        })
    }

    fn set_i32(&self, namespace: &str, key: &str, value: i32) -> Result<(), StorageError> {
        Self::write(namespace, key, |h, k| unsafe { nvs_set_i32(h, k, value) })
    }

    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StorageError> {
        Self::read(namespace, key, |h, k| {
            let mut v: u8 = 0;
            let ret = unsafe { nvs_get_u8(h, k, &mut v) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(v != 0)
        })
    }

    fn set_bool(&self, namespace: &str, key: &str, value: bool) -> Result<(), StorageError> {
        Self::write(namespace, key, |h, k| unsafe {
            nvs_set_u8(h, k, u8::from(value))
        })
    }

    fn commit(&self, namespace: &str) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |h| {
            let ret = unsafe { nvs_commit(h) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|_| StorageError::IoError)
    }
}
