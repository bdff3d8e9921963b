// restoretool/src/restore/chain.rs
use tracing::{error, info, warn};

use crate::engine::{Engine, Lsn};
use crate::errors::{ChainFailure, EngineError};
use crate::retrieval::{BackupDescriptor, BackupKind};

/// One FULL backup and at most one DIFF applicable to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupChain {
    full: BackupDescriptor,
    diff: Option<BackupDescriptor>,
}

impl BackupChain {
    pub fn full(&self) -> &BackupDescriptor {
        &self.full
    }

    pub fn diff(&self) -> Option<&BackupDescriptor> {
        self.diff.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Resolved(BackupChain),
    NoFullCandidate,
    NoApplicableDiff { full: BackupDescriptor, examined: usize },
}

impl ChainOutcome {
    pub fn into_chain(self) -> Result<BackupChain, ChainFailure> {
        match self {
            ChainOutcome::Resolved(chain) => Ok(chain),
            ChainOutcome::NoFullCandidate => Err(ChainFailure::NoFullCandidate),
            ChainOutcome::NoApplicableDiff { full, examined } => Err(ChainFailure::NoApplicableDiff {
                full_key: full.key().to_string(),
                examined,
            }),
        }
    }
}

/// Lineage rule: a DIFF applies to a FULL iff its first LSN is at or past
/// the FULL's differential base LSN.
pub fn is_applicable(full_differential_base: Lsn, diff_first: Lsn) -> bool {
    diff_first >= full_differential_base
}

/// Pairs the FULL candidate with the newest applicable DIFF candidate.
///
/// LSNs are read from the extracted artifacts through the engine, never
/// inferred from file names. DIFFs are scanned newest first and the scan
/// stops at the first applicable one. When DIFF candidates exist but none
/// applies, the outcome is `NoApplicableDiff` rather than a FULL-only chain.
pub async fn resolve_chain(
    engine: &dyn Engine,
    candidate_full: Option<BackupDescriptor>,
    candidate_diffs: Vec<BackupDescriptor>,
) -> Result<ChainOutcome, EngineError> {
    let Some(full) = candidate_full.filter(|f| f.kind() == BackupKind::Full) else {
        error!("No FULL backup candidate available");
        return Ok(ChainOutcome::NoFullCandidate);
    };

    let full_meta = engine.read_lsn_metadata(full.local_path()).await?;
    let full = full.with_lsn(full_meta);
    info!(
        key = full.key(),
        first_lsn = %full_meta.first_lsn,
        differential_base_lsn = ?full_meta.differential_base_lsn.map(|l| l.to_string()),
        "Read FULL backup header"
    );

    let mut diffs: Vec<BackupDescriptor> = candidate_diffs
        .into_iter()
        .filter(|d| {
            let is_diff = d.kind() == BackupKind::Diff;
            if !is_diff {
                warn!(key = d.key(), kind = %d.kind(), "Ignoring non-DIFF candidate");
            }
            is_diff
        })
        .collect();

    if diffs.is_empty() {
        info!(full = full.key(), "No DIFF candidates. Chain is FULL-only");
        return Ok(ChainOutcome::Resolved(BackupChain { full, diff: None }));
    }

    let Some(base) = full_meta.differential_base_lsn else {
        error!(
            full = full.key(),
            candidates = diffs.len(),
            "FULL backup carries no differential base LSN. No DIFF can be validated"
        );
        let examined = diffs.len();
        return Ok(ChainOutcome::NoApplicableDiff { full, examined });
    };

    diffs.sort_by(|a, b| b.key().cmp(a.key()));

    let mut examined = 0;
    for diff in diffs {
        examined += 1;
        let meta = engine.read_lsn_metadata(diff.local_path()).await?;
        if is_applicable(base, meta.first_lsn) {
            info!(
                full = full.key(),
                diff = diff.key(),
                first_lsn = %meta.first_lsn,
                differential_base_lsn = %base,
                "LSN validation successful. DIFF backup matches FULL backup"
            );
            let diff = diff.with_lsn(meta);
            return Ok(ChainOutcome::Resolved(BackupChain {
                full,
                diff: Some(diff),
            }));
        }
        warn!(
            diff = diff.key(),
            first_lsn = %meta.first_lsn,
            differential_base_lsn = %base,
            "LSN mismatch. DIFF backup is not applicable"
        );
    }

    error!(full = full.key(), examined, "No DIFF candidate is applicable to the FULL backup");
    Ok(ChainOutcome::NoApplicableDiff { full, examined })
}
