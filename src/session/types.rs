//! Analysis unit model
//!
//! An [`AnalysisUnit`] is one subject/session/scan triple. Units are created by
//! the resolver, are immutable, and are consumed exactly once by the pipeline
//! runner.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of scan a unit analyses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Anatomical,
    Functional,
}

impl ScanKind {
    /// Resolution order within a session
    pub const ALL: [ScanKind; 2] = [ScanKind::Anatomical, ScanKind::Functional];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Anatomical => "anatomical",
            ScanKind::Functional => "functional",
        }
    }

    /// Key of this kind's scan group in a participant list
    pub fn list_key(&self) -> &'static str {
        match self {
            ScanKind::Anatomical => "anatomical_scan",
            ScanKind::Functional => "functional_scan",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant / session / series identifier of a unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub subject: String,
    pub session: String,
    pub scan: String,
}

impl UnitId {
    pub fn new(
        subject: impl Into<String>,
        session: impl Into<String>,
        scan: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
            scan: scan.into(),
        }
    }

    /// Filesystem-safe single token, used for job and file names.
    ///
    /// Components are joined with `_`; every byte that is not ASCII
    /// alphanumeric is written as `-xx`, so distinct ids never share a slug.
    pub fn slug(&self) -> String {
        let mut slug = String::new();
        for (i, part) in [&self.subject, &self.session, &self.scan].into_iter().enumerate() {
            if i > 0 {
                slug.push('_');
            }
            for byte in part.bytes() {
                if byte.is_ascii_alphanumeric() {
                    slug.push(byte as char);
                } else {
                    slug.push_str(&format!("-{:02x}", byte));
                }
            }
        }
        slug
    }

    /// First component that cannot be used as a single directory name
    pub fn unsafe_component(&self) -> Option<(&'static str, &str)> {
        [
            ("subject", self.subject.as_str()),
            ("session", self.session.as_str()),
            ("scan", self.scan.as_str()),
        ]
        .into_iter()
        .find(|(_, value)| !is_path_component(value))
    }
}

fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject, self.session, self.scan)
    }
}

/// Unique key of a unit. Ordering is scan kind first, then participant,
/// session and series, which is the ordering of the final tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub kind: ScanKind,
    pub id: UnitId,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// End of a temporal window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StopIndexRepr", into = "StopIndexRepr")]
pub enum StopIndex {
    /// Use the native length of the scan
    End,
    /// Exclusive frame index
    At(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StopIndexRepr {
    Index(usize),
    Word(String),
}

impl TryFrom<StopIndexRepr> for StopIndex {
    type Error = String;

    fn try_from(value: StopIndexRepr) -> Result<Self, Self::Error> {
        match value {
            StopIndexRepr::Index(i) => Ok(StopIndex::At(i)),
            StopIndexRepr::Word(word) => word.parse(),
        }
    }
}

impl From<StopIndex> for StopIndexRepr {
    fn from(value: StopIndex) -> Self {
        match value {
            StopIndex::End => StopIndexRepr::Word("End".to_string()),
            StopIndex::At(i) => StopIndexRepr::Index(i),
        }
    }
}

impl FromStr for StopIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("end") {
            return Ok(StopIndex::End);
        }
        trimmed
            .parse::<usize>()
            .map(StopIndex::At)
            .map_err(|_| format!("expected a frame index or \"End\", got \"{}\"", s))
    }
}

impl fmt::Display for StopIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopIndex::End => f.write_str("End"),
            StopIndex::At(i) => write!(f, "{}", i),
        }
    }
}

/// Invalid temporal window for a given scan length
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("start index {start} is beyond the scan length {length}")]
    StartBeyondEnd { start: usize, length: usize },
    #[error("start index {start} is after stop index {stop}")]
    Inverted { start: usize, stop: usize },
    #[error("window [{start}, {stop}) selects no frames")]
    Empty { start: usize, stop: usize },
}

/// Timepoint range of a functional scan included in analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub stop: StopIndex,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            start: 0,
            stop: StopIndex::End,
        }
    }
}

impl Window {
    pub fn new(start: usize, stop: StopIndex) -> Self {
        Self { start, stop }
    }

    /// Checks the window without knowing the scan length
    pub fn validate(&self) -> Result<(), WindowError> {
        match self.stop {
            StopIndex::At(stop) if self.start > stop => Err(WindowError::Inverted {
                start: self.start,
                stop,
            }),
            _ => Ok(()),
        }
    }

    /// Frame range `[start, stop)` for a scan of `length` frames.
    ///
    /// A numeric stop past the end is clamped to `length`.
    pub fn bounds(&self, length: usize) -> Result<Range<usize>, WindowError> {
        self.validate()?;
        if self.start >= length {
            return Err(WindowError::StartBeyondEnd {
                start: self.start,
                length,
            });
        }
        let stop = match self.stop {
            StopIndex::End => length,
            StopIndex::At(stop) => stop.min(length),
        };
        if stop == self.start {
            return Err(WindowError::Empty {
                start: self.start,
                stop,
            });
        }
        Ok(self.start..stop)
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.stop == StopIndex::End
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// One independent analysis task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisUnit {
    pub key: UnitKey,
    pub site: Option<String>,
    pub path: PathBuf,
    pub window: Window,
    pub exclude_zeros: bool,
}

impl AnalysisUnit {
    pub fn kind(&self) -> ScanKind {
        self.key.kind
    }

    pub fn id(&self) -> &UnitId {
        &self.key.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_index_parses_end_and_numbers() {
        assert_eq!("End".parse::<StopIndex>(), Ok(StopIndex::End));
        assert_eq!("end".parse::<StopIndex>(), Ok(StopIndex::End));
        assert_eq!(" 42 ".parse::<StopIndex>(), Ok(StopIndex::At(42)));
        assert!("forever".parse::<StopIndex>().is_err());
    }

    #[test]
    fn test_stop_index_yaml_forms() {
        let end: StopIndex = serde_yaml::from_str("End").unwrap();
        let at: StopIndex = serde_yaml::from_str("120").unwrap();
        assert_eq!(end, StopIndex::End);
        assert_eq!(at, StopIndex::At(120));
        assert_eq!(serde_yaml::to_string(&StopIndex::End).unwrap().trim(), "End");
    }

    #[test]
    fn test_full_window_equals_explicit_length() {
        let full = Window::default();
        let explicit = Window::new(0, StopIndex::At(150));
        assert_eq!(full.bounds(150), Ok(0..150));
        assert_eq!(full.bounds(150), explicit.bounds(150));
    }

    #[test]
    fn test_window_rejects_inverted_and_out_of_range() {
        assert_eq!(
            Window::new(10, StopIndex::At(5)).bounds(100),
            Err(WindowError::Inverted { start: 10, stop: 5 })
        );
        assert_eq!(
            Window::new(100, StopIndex::End).bounds(100),
            Err(WindowError::StartBeyondEnd {
                start: 100,
                length: 100
            })
        );
        assert_eq!(
            Window::new(4, StopIndex::At(4)).bounds(10),
            Err(WindowError::Empty { start: 4, stop: 4 })
        );
    }

    #[test]
    fn test_window_clamps_stop_past_end() {
        assert_eq!(Window::new(2, StopIndex::At(500)).bounds(20), Ok(2..20));
    }

    #[test]
    fn test_unit_key_orders_by_kind_then_id() {
        let func = UnitKey {
            kind: ScanKind::Functional,
            id: UnitId::new("a", "1", "rest"),
        };
        let anat = UnitKey {
            kind: ScanKind::Anatomical,
            id: UnitId::new("z", "9", "anat"),
        };
        assert!(anat < func);
        assert_eq!(anat.to_string(), "anatomical:z/9/anat");
    }

    #[test]
    fn test_slug_is_filesystem_safe() {
        let id = UnitId::new("sub 01", "ses/1", "rest_1");
        assert_eq!(id.slug(), "sub-2001_ses-2f1_rest-5f1");
        assert_eq!(UnitId::new("sub1", "ses1", "anat1").slug(), "sub1_ses1_anat1");
    }

    #[test]
    fn test_slug_distinguishes_separator_placement() {
        let pairs = [
            (UnitId::new("a_b", "c", "d"), UnitId::new("a", "b_c", "d")),
            (UnitId::new("a-b", "c", "d"), UnitId::new("a", "b-c", "d")),
            (UnitId::new("a/b", "c", "d"), UnitId::new("a", "b/c", "d")),
            (UnitId::new("a-2f", "c", "d"), UnitId::new("a/", "c", "d")),
        ];
        for (left, right) in pairs {
            assert_ne!(left.slug(), right.slug(), "{} vs {}", left, right);
        }
    }

    #[test]
    fn test_unsafe_components_are_reported() {
        assert_eq!(UnitId::new("sub1", "ses1", "rest_1").unsafe_component(), None);
        assert_eq!(UnitId::new("sub.1", "ses..1", "r").unsafe_component(), None);
        assert_eq!(
            UnitId::new("../../escape", "s", "x").unsafe_component(),
            Some(("subject", "../../escape"))
        );
        assert_eq!(
            UnitId::new("a", "..", "x").unsafe_component(),
            Some(("session", ".."))
        );
        assert_eq!(
            UnitId::new("a", "b", "c\\d").unsafe_component(),
            Some(("scan", "c\\d"))
        );
        assert_eq!(UnitId::new("a", "b", ".").unsafe_component(), Some(("scan", ".")));
    }
}
