use std::sync::Arc;

use async_trait::async_trait;

use semassist_core::{RunSnapshot, Target};

use crate::result::{ComputeError, SignalResult};

/// A replaceable unit of signal analysis for one target.
///
/// Implementations must be idempotent with respect to `(target, snapshot)`: the
/// scheduler and callers may issue the same call more than once. Batch
/// cancellation never drops an in-flight future; a per-target timeout does, so
/// implementations must be cancel-safe.
///
/// Must not mutate anything the scheduler owns.
#[async_trait]
pub trait SignalComputer: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "signal-computer"
    }

    async fn compute(
        &self,
        target: &Target,
        snapshot: &RunSnapshot,
    ) -> Result<SignalResult, ComputeError>;
}

#[async_trait]
impl<C> SignalComputer for Arc<C>
where
    C: SignalComputer + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn compute(
        &self,
        target: &Target,
        snapshot: &RunSnapshot,
    ) -> Result<SignalResult, ComputeError> {
        (**self).compute(target, snapshot).await
    }
}
