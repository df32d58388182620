//! Low-level platform drivers.

pub mod task_pin;
