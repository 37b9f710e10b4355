//! Write strategy implementations using enum dispatch.

use std::future::Future;

use crate::error::{PersistenceError, Result};

/// Write strategy enum - determines how a secondary failure is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Primary result is returned; secondary failures are logged
    #[default]
    BestEffort,
    /// Secondary failures are returned after the primary write succeeded
    Strict,
}

/// Outcome of a replicated write.
#[derive(Debug)]
pub struct Replicated<T> {
    /// Primary result
    pub value: T,
    /// Swallowed secondary failure, if any
    pub secondary_error: Option<PersistenceError>,
}

impl WriteStrategy {
    /// Execute a replicated write.
    ///
    /// - `target`: secondary name, used in logs and errors
    /// - `primary_fn`: authoritative write
    /// - `secondary_fn`: replica write, run only after the primary succeeded
    ///
    /// A primary failure is returned immediately and the secondary is never
    /// attempted.
    pub async fn write<T, PrimaryFut, SecondaryFut>(
        self,
        target: &str,
        primary_fn: impl FnOnce() -> PrimaryFut,
        secondary_fn: Option<impl FnOnce() -> SecondaryFut>,
    ) -> Result<Replicated<T>>
    where
        PrimaryFut: Future<Output = Result<T>>,
        SecondaryFut: Future<Output = Result<T>>,
    {
        let value = primary_fn().await?;

        let Some(secondary) = secondary_fn else {
            return Ok(Replicated {
                value,
                secondary_error: None,
            });
        };

        let secondary_error = match secondary().await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    db = target,
                    error = %e,
                    strategy = ?self,
                    "Replication to secondary failed"
                );
                Some(e)
            }
        };

        match (self, secondary_error) {
            (Self::Strict, Some(e)) => Err(PersistenceError::Replication {
                target: target.to_string(),
                message: e.to_string(),
            }),
            (_, secondary_error) => Ok(Replicated {
                value,
                secondary_error,
            }),
        }
    }
}

impl std::str::FromStr for WriteStrategy {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" | "besteffort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(PersistenceError::InvalidQuery(format!(
                "unknown write strategy: {other}"
            ))),
        }
    }
}
