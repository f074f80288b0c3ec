// src/reconciler.rs
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::interval::{validate_interval, IntervalError};
use crate::models::{ActivityRecord, BatchSubmission};
use crate::store::{ActivityStore, StoreError};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Subject must not be empty")]
    EmptySubject,
    #[error("Interval at index {index} is invalid: {source}")]
    InvalidInterval {
        index: usize,
        #[source]
        source: IntervalError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub subject: String,
    pub date: NaiveDate,
    pub written: usize,
    pub replaced: usize,
}

fn clock_marker(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validates every interval of the batch and turns it into canonical records.
/// Nothing is returned unless the whole batch is valid.
pub fn build_records(
    subject: &str,
    batch: &BatchSubmission,
) -> Result<Vec<ActivityRecord>, ReconcileError> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(ReconcileError::EmptySubject);
    }

    let clock_in = clock_marker(&batch.clock_in);
    let clock_out = clock_marker(&batch.clock_out);

    batch
        .intervals
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let interval = validate_interval(&input.start, &input.end)
                .map_err(|source| ReconcileError::InvalidInterval { index, source })?;
            Ok(ActivityRecord {
                subject: subject.to_string(),
                date: batch.date,
                clock_in: clock_in.clone(),
                clock_out: clock_out.clone(),
                label: input.label.clone(),
                start: interval.start_str(),
                end: interval.end_str(),
                duration_minutes: interval.duration_minutes,
            })
        })
        .collect()
}

/// Validates the batch, then replaces every interval in the store as one
/// atomic write. Resubmitting the same batch leaves the same end state.
pub async fn reconcile(
    store: &dyn ActivityStore,
    subject: &str,
    batch: &BatchSubmission,
) -> Result<ReconcileOutcome, ReconcileError> {
    let records = build_records(subject, batch)?;
    let subject = subject.trim().to_string();

    if records.is_empty() {
        debug!("Empty batch for {} on {}, nothing to write", subject, batch.date);
        return Ok(ReconcileOutcome {
            subject,
            date: batch.date,
            written: 0,
            replaced: 0,
        });
    }

    let write = store.replace_batch(&records).await?;
    info!(
        "Reconciled {} interval(s) for {} on {} ({} replaced)",
        write.written, subject, batch.date, write.replaced
    );

    Ok(ReconcileOutcome {
        subject,
        date: batch.date,
        written: write.written,
        replaced: write.replaced,
    })
}
