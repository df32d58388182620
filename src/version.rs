//! Running firmware identity and update eligibility.
//!
//! The build label carries both the device role and the version number,
//! e.g. `Master-1.0.0` or `slave-2.3.1`.  The role decides which half of
//! the manifest a device consults; the [`VersionPolicy`] decides whether
//! an advertised version is worth installing.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

// ── Device role ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    Master,
    Slave,
}

impl DeviceRole {
    /// Master iff the label mentions "Master" or "master"; everything else
    /// is treated as a slave build.
    pub fn from_label(label: &str) -> Self {
        if label.contains("Master") || label.contains("master") {
            Self::Master
        } else {
            Self::Slave
        }
    }
}

// ── Running version ───────────────────────────────────────────

/// Identity of the image currently executing.  Immutable for the life of
/// the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningVersion {
    label: String,
    role: DeviceRole,
}

impl RunningVersion {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            role: DeviceRole::from_label(label),
        }
    }

    /// Full build label, e.g. `Master-1.0.0`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Bare version number: the text after the last `-`, or the whole
    /// label when there is no prefix.
    pub fn number(&self) -> &str {
        match self.label.rfind('-') {
            Some(idx) => &self.label[idx + 1..],
            None => &self.label,
        }
    }
}

// ── Eligibility policy ────────────────────────────────────────

/// How an advertised version is compared against the running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VersionPolicy {
    /// Install anything that differs from both the running label and its
    /// bare number.  Lets the server roll back as well as forward.
    #[default]
    Differs,
    /// Plain string ordering against the full running label.
    /// `"10.0.0" < "9.0.0"` under this rule, and a bare number never
    /// beats a `Master-` prefixed label.
    Lexicographic,
    /// Numeric dotted-component ordering against the bare number.  Falls
    /// back to [`Differs`](Self::Differs) when either side does not parse.
    Semantic,
}

impl VersionPolicy {
    pub fn is_eligible(self, candidate: &str, running: &RunningVersion) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match self {
            Self::Differs => differs(candidate, running),
            Self::Lexicographic => candidate > running.label(),
            Self::Semantic => match (parse_numeric(candidate), parse_numeric(running.number())) {
                (Some(c), Some(r)) => compare_components(&c, &r) == Ordering::Greater,
                _ => differs(candidate, running),
            },
        }
    }
}

fn differs(candidate: &str, running: &RunningVersion) -> bool {
    candidate != running.label() && candidate != running.number()
}

/// Parse `1.2.3`, `v1.2` or `1.2.3-rc1` into numeric components.  Any
/// suffix after the first non-digit in a component is ignored.
fn parse_numeric(s: &str) -> Option<Vec<u64>> {
    let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
    let mut out = Vec::new();
    for part in s.split('.') {
        let digits: &str = match part.find(|c: char| !c.is_ascii_digit()) {
            Some(0) => return None,
            Some(end) => &part[..end],
            None => part,
        };
        out.push(digits.parse().ok()?);
    }
    Some(out)
}

/// Missing trailing components count as zero (`1.2 == 1.2.0`).
fn compare_components(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
