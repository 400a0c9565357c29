pub mod local;
pub mod remote;

use crate::store::clips::Clip;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// A ready clip handed to the pipeline, together with what is needed to
/// release it afterwards.
#[derive(Debug)]
pub struct AcquiredClip {
    pub name: String,
    /// Local file backing the clip (store path or spool download).
    pub path: PathBuf,
    pub clip: Clip,
}

/// One interface over both acquisition topologies; everything downstream of
/// it is topology-agnostic. Implementations deliver clips one at a time, in
/// delivery order, and swallow per-entry failures (log and move on).
pub trait AcquisitionSource {
    /// Wait for the next ready clip. Returns `None` once `cancel` fires.
    fn next_clip(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Option<AcquiredClip>> + Send;

    /// Release a clip after processing (success or failure): the consumer is
    /// the clip's sole destroyer. A crash before this call means the clip is
    /// reprocessed on restart — at-least-once, by design.
    fn release(&mut self, acquired: &AcquiredClip) -> impl std::future::Future<Output = ()> + Send;
}
