//! Bus status lines.
//!
//! ```text
//! OTA:UPDATING@<progress>
//! OTA:INFO@<lastVersion>@<lastUpdate>@<auto 0|1>@<available 0|1>
//! ```
//!
//! Rendering never touches the network; availability comes from the
//! cached result of the last check.

use core::fmt::Write as _;

use crate::app::events::SessionSnapshot;

pub const UNKNOWN: &str = "unknown";

/// Fixed-capacity line for the high-frequency progress message.
pub type ProgressLine = heapless::String<24>;

pub fn updating_line(percent: u8) -> ProgressLine {
    let mut line = ProgressLine::new();
    let _ = write!(line, "OTA:UPDATING@{}", percent.min(100));
    line
}

pub fn info_line(
    last_version: Option<&str>,
    last_update: Option<&str>,
    auto_update: bool,
    update_available: bool,
) -> String {
    format!(
        "OTA:INFO@{}@{}@{}@{}",
        last_version.unwrap_or(UNKNOWN),
        last_update.unwrap_or(UNKNOWN),
        u8::from(auto_update),
        u8::from(update_available)
    )
}

/// `UPDATING` while an image is in flight, `INFO` otherwise.
pub fn render(snap: &SessionSnapshot) -> String {
    if snap.state.is_updating() {
        return updating_line(snap.progress_percent).as_str().to_owned();
    }
    info_line(
        snap.last_applied_version.as_deref(),
        snap.last_applied_at.as_deref(),
        snap.auto_update,
        snap.pending.is_some(),
    )
}
