//! Phase definitions and records
//!
//! A [`PipelineDefinition`] is an ordered list of phase descriptors built once
//! and never mutated. The phase sequence is fixed; only the cumulative
//! progress weights may differ, and they must strictly increase to 100.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    IdentifierAcquisition,
    Registration,
    CatalogNumber,
    Packaging,
    Cover,
    MetadataOptimization,
    Validation,
    DestinationSubmission,
}

impl PhaseKind {
    /// Every phase, in the only order a publish call runs them.
    pub const SEQUENCE: [PhaseKind; 8] = [
        Self::IdentifierAcquisition,
        Self::Registration,
        Self::CatalogNumber,
        Self::Packaging,
        Self::Cover,
        Self::MetadataOptimization,
        Self::Validation,
        Self::DestinationSubmission,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::IdentifierAcquisition => "identifier-acquisition",
            Self::Registration => "registration",
            Self::CatalogNumber => "catalog-number",
            Self::Packaging => "packaging",
            Self::Cover => "cover",
            Self::MetadataOptimization => "metadata-optimization",
            Self::Validation => "validation",
            Self::DestinationSubmission => "destination-submission",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseDescriptor {
    pub kind: PhaseKind,
    pub weight: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Pipeline definition has no phases")]
    Empty,

    #[error("Phase {phase} weight {weight} does not exceed previous weight {previous}")]
    NonIncreasing { phase: PhaseKind, weight: u8, previous: u8 },

    #[error("Expected phase {expected} at position {position}, found {found}")]
    OutOfSequence { position: usize, expected: PhaseKind, found: PhaseKind },

    #[error("Phase {0} is missing")]
    Missing(PhaseKind),

    #[error("{0} phases given, the sequence has 8")]
    TooMany(usize),

    #[error("Final phase must reach 100, got {0}")]
    Incomplete(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    phases: Vec<PhaseDescriptor>,
}

impl PipelineDefinition {
    pub fn new(phases: Vec<PhaseDescriptor>) -> Result<Self, DefinitionError> {
        if phases.is_empty() {
            return Err(DefinitionError::Empty);
        }
        if phases.len() > PhaseKind::SEQUENCE.len() {
            return Err(DefinitionError::TooMany(phases.len()));
        }

        let mut previous = 0u8;
        for (position, expected) in PhaseKind::SEQUENCE.into_iter().enumerate() {
            let phase = phases.get(position).ok_or(DefinitionError::Missing(expected))?;
            if phase.kind != expected {
                return Err(DefinitionError::OutOfSequence { position, expected, found: phase.kind });
            }
            if phase.weight <= previous {
                return Err(DefinitionError::NonIncreasing { phase: phase.kind, weight: phase.weight, previous });
            }
            previous = phase.weight;
        }
        if previous != 100 {
            return Err(DefinitionError::Incomplete(previous));
        }

        Ok(Self { phases })
    }

    /// The eight publishing phases with their standard cumulative weights.
    pub fn standard() -> Self {
        let phases = PhaseKind::SEQUENCE
            .into_iter()
            .zip([10, 20, 30, 50, 65, 75, 85, 100])
            .map(|(kind, weight)| PhaseDescriptor { kind, weight })
            .collect();
        Self { phases }
    }

    pub fn phases(&self) -> &[PhaseDescriptor] {
        &self.phases
    }

    pub fn weight(&self, kind: PhaseKind) -> Option<u8> {
        self.phases.iter().find(|p| p.kind == kind).map(|p| p.weight)
    }
}

impl Default for PipelineDefinition {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    pub weight: u8,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PhaseRecord {
    pub fn pending(descriptor: PhaseDescriptor) -> Self {
        Self {
            phase: descriptor.kind,
            weight: descriptor.weight,
            status: PhaseStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = PhaseStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = PhaseStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = PhaseStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(message.into());
    }
}
