//! Participant list model
//!
//! A participant list maps `subject → session → scan group → scan id → path`.
//! Scan entries may also carry their own window and background-masking
//! overrides:
//!
//! ```yaml
//! sub-0001:
//!   session_1:
//!     site_name: site_a
//!     anatomical_scan:
//!       anat_1: /data/site_a/sub-0001/session_1/anat_1/mprage.nii.gz
//!     functional_scan:
//!       rest_1:
//!         scan: /data/site_a/sub-0001/session_1/rest_1/rest.nii.gz
//!         start_idx: 4
//!         stop_idx: End
//! ```
//!
//! Mapping order is preserved; it defines the resolution order of units.

use super::types::{ScanKind, StopIndex};
use crate::error::{ErrorCode, QapError, Result};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One scan of a session, before defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub scan: String,
    pub path: PathBuf,
    pub start_idx: Option<usize>,
    pub stop_idx: Option<StopIndex>,
    pub exclude_zeros: Option<bool>,
}

impl ScanEntry {
    pub fn new(scan: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            scan: scan.into(),
            path: path.into(),
            start_idx: None,
            stop_idx: None,
            exclude_zeros: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionEntry {
    pub session: String,
    pub site: Option<String>,
    pub anatomical: Vec<ScanEntry>,
    pub functional: Vec<ScanEntry>,
}

impl SessionEntry {
    pub fn scans(&self, kind: ScanKind) -> &[ScanEntry] {
        match kind {
            ScanKind::Anatomical => &self.anatomical,
            ScanKind::Functional => &self.functional,
        }
    }

    fn scans_mut(&mut self, kind: ScanKind) -> &mut Vec<ScanEntry> {
        match kind {
            ScanKind::Anatomical => &mut self.anatomical,
            ScanKind::Functional => &mut self.functional,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectEntry {
    pub subject: String,
    pub sessions: Vec<SessionEntry>,
}

/// Ordered participant listing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticipantList {
    pub subjects: Vec<SubjectEntry>,
}

impl ParticipantList {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| {
            QapError::config_with_code(
                ErrorCode::CONFIG_INVALID_SUBLIST,
                "Participant list is not valid YAML",
                None,
            )
            .with_source(e)
        })?;
        Self::from_value(&value)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QapError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("Cannot read participant list {}", path.display()),
                None,
            )
            .with_source(e)
        })?;
        Self::from_yaml_str(&content)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let subjects = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => return Err(invalid("top level must map subject ids to sessions")),
        };

        let mut list = ParticipantList::default();
        for (subject_key, sessions_value) in subjects {
            let subject = key_to_string(subject_key)?;
            let sessions = sessions_value.as_mapping().ok_or_else(|| {
                invalid(format!("subject '{}' must map session ids to scans", subject))
            })?;

            let mut entry = SubjectEntry {
                subject: subject.clone(),
                sessions: Vec::with_capacity(sessions.len()),
            };
            for (session_key, session_value) in sessions {
                let session = key_to_string(session_key)?;
                entry
                    .sessions
                    .push(parse_session(&subject, session, session_value)?);
            }
            list.subjects.push(entry);
        }
        Ok(list)
    }

    /// Number of scans across all subjects and sessions
    pub fn scan_count(&self) -> usize {
        self.subjects
            .iter()
            .flat_map(|s| &s.sessions)
            .map(|s| s.anatomical.len() + s.functional.len())
            .sum()
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        let mut root = Mapping::new();
        for subject in &self.subjects {
            let mut sessions = Mapping::new();
            for session in &subject.sessions {
                let mut groups = Mapping::new();
                if let Some(site) = &session.site {
                    groups.insert("site_name".into(), site.clone().into());
                }
                for kind in ScanKind::ALL {
                    let scans = session.scans(kind);
                    if scans.is_empty() {
                        continue;
                    }
                    let mut group = Mapping::new();
                    for scan in scans {
                        group.insert(scan.scan.clone().into(), scan_to_value(scan));
                    }
                    groups.insert(kind.list_key().into(), Value::Mapping(group));
                }
                sessions.insert(session.session.clone().into(), Value::Mapping(groups));
            }
            root.insert(subject.subject.clone().into(), Value::Mapping(sessions));
        }
        serde_yaml::to_string(&Value::Mapping(root)).map_err(QapError::from)
    }
}

fn invalid(message: impl Into<String>) -> QapError {
    QapError::config_with_code(ErrorCode::CONFIG_INVALID_SUBLIST, message, None)
}

/// Identifiers must be YAML strings. An unquoted `0050002` or `0x1A` would be
/// read as a number and lose its written form, so those keys are rejected.
fn key_to_string(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Err(invalid(format!(
            "identifier {} is not a string; quote it as it should appear",
            n
        ))),
        other => Err(invalid(format!("unsupported identifier {:?}", other))),
    }
}

fn parse_session(subject: &str, session: String, value: &Value) -> Result<SessionEntry> {
    let groups = value.as_mapping().ok_or_else(|| {
        invalid(format!(
            "session '{}/{}' must map scan groups to scans",
            subject, session
        ))
    })?;

    let mut entry = SessionEntry {
        session,
        ..SessionEntry::default()
    };

    for (group_key, group_value) in groups {
        let group = key_to_string(group_key)?;
        let kind = match group.as_str() {
            "site_name" => {
                entry.site = group_value.as_str().map(str::to_string);
                continue;
            }
            "anatomical_scan" => ScanKind::Anatomical,
            "functional_scan" => ScanKind::Functional,
            other => {
                debug!("Ignoring unknown scan group '{}' in {}/{}", other, subject, entry.session);
                continue;
            }
        };

        let scans = group_value.as_mapping().ok_or_else(|| {
            invalid(format!(
                "'{}' in {}/{} must map scan ids to files",
                group, subject, entry.session
            ))
        })?;
        for (scan_key, scan_value) in scans {
            let scan = key_to_string(scan_key)?;
            let parsed = parse_scan(scan, scan_value)?;
            entry.scans_mut(kind).push(parsed);
        }
    }
    Ok(entry)
}

fn parse_scan(scan: String, value: &Value) -> Result<ScanEntry> {
    match value {
        Value::String(path) => Ok(ScanEntry::new(scan, path)),
        Value::Null => Ok(ScanEntry::new(scan, "")),
        Value::Mapping(map) => {
            let path = map
                .get("scan")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let start_idx = match map.get("start_idx") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| invalid(format!("start_idx of '{}' must be >= 0", scan)))?
                        as usize,
                ),
            };
            let stop_idx = match map.get("stop_idx") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    serde_yaml::from_value::<StopIndex>(v.clone())
                        .map_err(|e| invalid(format!("stop_idx of '{}': {}", scan, e)))?,
                ),
            };
            let exclude_zeros = map.get("exclude_zeros").and_then(Value::as_bool);
            Ok(ScanEntry {
                scan,
                path: PathBuf::from(path),
                start_idx,
                stop_idx,
                exclude_zeros,
            })
        }
        other => Err(invalid(format!("scan '{}' has unsupported value {:?}", scan, other))),
    }
}

fn scan_to_value(scan: &ScanEntry) -> Value {
    if scan.start_idx.is_none() && scan.stop_idx.is_none() && scan.exclude_zeros.is_none() {
        return Value::String(scan.path.display().to_string());
    }
    let mut map = Mapping::new();
    map.insert("scan".into(), scan.path.display().to_string().into());
    if let Some(start) = scan.start_idx {
        map.insert("start_idx".into(), Value::Number((start as u64).into()));
    }
    if let Some(stop) = scan.stop_idx {
        let value = match stop {
            StopIndex::End => Value::String("End".into()),
            StopIndex::At(i) => Value::Number((i as u64).into()),
        };
        map.insert("stop_idx".into(), value);
    }
    if let Some(exclude) = scan.exclude_zeros {
        map.insert("exclude_zeros".into(), Value::Bool(exclude));
    }
    Value::Mapping(map)
}

fn classify(scan_id: &str, file_name: &str) -> Option<ScanKind> {
    let is_functional = ["rest", "func"]
        .iter()
        .any(|k| scan_id.contains(k) || file_name.contains(k));
    if is_functional {
        return Some(ScanKind::Functional);
    }
    let is_anatomical = scan_id.contains("anat")
        || file_name.contains("anat")
        || file_name.contains("mprage");
    is_anatomical.then_some(ScanKind::Anatomical)
}

/// Build a participant list from a raw data directory laid out as
/// `<site>/<subject>/<session>/<scan>/<file>.nii[.gz]`.
///
/// Only subjects in `inclusion` are kept when it is given. Files whose path
/// does not have that shape are skipped with a warning.
pub fn gather_raw_data(site_folder: &Path, inclusion: Option<&[String]>) -> Result<ParticipantList> {
    let mut files: Vec<PathBuf> = WalkDir::new(site_folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.to_string_lossy().contains(".nii"))
        .collect();
    files.sort();

    let mut list = ParticipantList::default();
    for path in files {
        let relative = path.strip_prefix(site_folder).unwrap_or(&path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .filter(|c| !c.is_empty())
            .collect();
        if parts.len() < 5 {
            warn!(
                "Could not parse the data directory structure for {} (expected <site>/<subject>/<session>/<scan>/<file>)",
                relative.display()
            );
            continue;
        }
        let n = parts.len();
        let (site, subject, session, scan, file) =
            (&parts[n - 5], &parts[n - 4], &parts[n - 3], &parts[n - 2], &parts[n - 1]);

        if let Some(included) = inclusion {
            if !included.iter().any(|s| s == subject) {
                continue;
            }
        }
        let Some(kind) = classify(scan, file) else {
            debug!("Skipping unrecognised scan {}", relative.display());
            continue;
        };

        let subject_entry = match list.subjects.iter().position(|s| &s.subject == subject) {
            Some(i) => &mut list.subjects[i],
            None => {
                list.subjects.push(SubjectEntry {
                    subject: subject.clone(),
                    sessions: Vec::new(),
                });
                let last = list.subjects.len() - 1;
                &mut list.subjects[last]
            }
        };
        let session_entry = match subject_entry
            .sessions
            .iter()
            .position(|s| &s.session == session)
        {
            Some(i) => &mut subject_entry.sessions[i],
            None => {
                subject_entry.sessions.push(SessionEntry {
                    session: session.clone(),
                    site: Some(site.clone()),
                    ..SessionEntry::default()
                });
                let last = subject_entry.sessions.len() - 1;
                &mut subject_entry.sessions[last]
            }
        };
        let scans = session_entry.scans_mut(kind);
        if !scans.iter().any(|s| &s.scan == scan) {
            scans.push(ScanEntry::new(scan.clone(), path.clone()));
        }
    }

    if list.subjects.is_empty() {
        return Err(invalid(format!(
            "The participant list came out empty for {}",
            site_folder.display()
        )));
    }
    Ok(list)
}
