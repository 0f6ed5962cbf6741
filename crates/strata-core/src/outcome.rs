//! Transform results, per-version outcomes and their aggregation.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{StrataError, VersionError};
use crate::file::FileHandle;
use crate::uploader::VersionId;

/// What a transform produced for one version.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    /// The target now points at the derived bytes and should be persisted.
    Transformed(FileHandle),
    /// Persist the target and derive the listed child versions from it.
    TransformedWithChildren(FileHandle, Vec<VersionId>),
    /// Nothing to store for this version.
    Skipped,
    Failed(String),
}

impl TransformResult {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        TransformResult::Failed(reason.to_string())
    }
}

/// Final state of one version after a store/copy/delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum VersionOutcome {
    Stored,
    NoStore,
    Error(VersionError),
}

impl VersionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, VersionOutcome::Error(_))
    }

    pub fn error(&self) -> Option<&VersionError> {
        match self {
            VersionOutcome::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Every version reached by an operation together with its outcome.
///
/// A report is an error iff at least one outcome is an error; successes are
/// always kept so callers can act on partial failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    outcomes: BTreeMap<VersionId, VersionOutcome>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        !self.is_err()
    }

    pub fn is_err(&self) -> bool {
        self.outcomes.values().any(VersionOutcome::is_error)
    }

    pub fn get(&self, version: &str) -> Option<&VersionOutcome> {
        self.outcomes.get(version)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &BTreeMap<VersionId, VersionOutcome> {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> BTreeMap<VersionId, VersionOutcome> {
        self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = (&VersionId, &VersionError)> {
        self.outcomes
            .iter()
            .filter_map(|(version, outcome)| outcome.error().map(|err| (version, err)))
    }

    /// Turn a failed report into [`StrataError::PartialFailure`], carrying the full map.
    pub fn into_result(self) -> Result<Report, StrataError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(StrataError::PartialFailure(self))
        }
    }
}

impl FromIterator<(VersionId, VersionOutcome)> for Report {
    fn from_iter<I: IntoIterator<Item = (VersionId, VersionOutcome)>>(iter: I) -> Self {
        Report {
            outcomes: iter.into_iter().collect(),
        }
    }
}

/// Fold `(version, outcome)` pairs into a report.
///
/// Duplicate versions keep the last pair.
pub fn combine<I>(pairs: I) -> Report
where
    I: IntoIterator<Item = (VersionId, VersionOutcome)>,
{
    pairs.into_iter().collect()
}
