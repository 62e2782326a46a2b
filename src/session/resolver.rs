//! SessionDescriptor resolution
//!
//! Expands a [`ParticipantList`] into a flat, deterministic sequence of
//! [`AnalysisUnit`]s. Resolution is lazy and restartable: every call to
//! [`SessionResolver::resolve`] walks the listing again and yields the same
//! units in the same order (listing order, anatomical before functional
//! within a session).

use super::sublist::{ParticipantList, ScanEntry, SessionEntry, SubjectEntry};
use super::types::{AnalysisUnit, ScanKind, UnitId, UnitKey, Window};
use crate::config::RunConfig;
use crate::error::{ErrorCode, QapError, Result};
use std::sync::Arc;

/// Per-unit defaults applied where the listing is silent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UnitDefaults {
    pub window: Window,
    pub exclude_zeros: bool,
}

impl UnitDefaults {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            window: config.default_window,
            exclude_zeros: config.flags.exclude_zeros,
        }
    }
}

pub struct SessionResolver {
    list: Arc<ParticipantList>,
    defaults: UnitDefaults,
}

impl SessionResolver {
    pub fn new(list: Arc<ParticipantList>, defaults: UnitDefaults) -> Self {
        Self { list, defaults }
    }

    /// Lazily resolve every unit in listing order
    pub fn resolve(&self) -> impl Iterator<Item = Result<AnalysisUnit>> + '_ {
        self.list.subjects.iter().flat_map(move |subject| {
            subject.sessions.iter().flat_map(move |session| {
                ScanKind::ALL.into_iter().flat_map(move |kind| {
                    session
                        .scans(kind)
                        .iter()
                        .map(move |scan| self.build(subject, session, kind, scan))
                })
            })
        })
    }

    /// Resolve everything, failing on the first invalid entry
    pub fn resolve_all(&self) -> Result<Vec<AnalysisUnit>> {
        self.resolve().collect()
    }

    fn build(
        &self,
        subject: &SubjectEntry,
        session: &SessionEntry,
        kind: ScanKind,
        scan: &ScanEntry,
    ) -> Result<AnalysisUnit> {
        let id = UnitId::new(
            subject.subject.trim(),
            session.session.trim(),
            scan.scan.trim(),
        );
        for (field, value) in [
            ("subject", &id.subject),
            ("session", &id.session),
            ("scan", &id.scan),
        ] {
            if value.is_empty() {
                return Err(QapError::config_with_code(
                    ErrorCode::CONFIG_EMPTY_IDENTIFIER,
                    format!("empty {} identifier in participant list ({})", field, id),
                    Some(field.to_string()),
                ));
            }
        }
        if let Some((field, value)) = id.unsafe_component() {
            return Err(QapError::config_with_code(
                ErrorCode::CONFIG_UNSAFE_IDENTIFIER,
                format!(
                    "{} identifier \"{}\" is not a single directory name",
                    field, value
                ),
                Some(field.to_string()),
            ));
        }
        if scan.path.as_os_str().is_empty() {
            return Err(QapError::config_with_code(
                ErrorCode::CONFIG_EMPTY_IDENTIFIER,
                format!("{} scan {} has no input path", kind, id),
                Some("scan".to_string()),
            ));
        }

        let window = Window::new(
            scan.start_idx.unwrap_or(self.defaults.window.start),
            scan.stop_idx.unwrap_or(self.defaults.window.stop),
        );

        Ok(AnalysisUnit {
            key: UnitKey { kind, id },
            site: session.site.clone(),
            path: scan.path.clone(),
            window,
            exclude_zeros: scan.exclude_zeros.unwrap_or(self.defaults.exclude_zeros),
        })
    }
}
