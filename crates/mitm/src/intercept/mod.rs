//! Interception points between reconstruction and forwarding
//!
//! Every tagged unit passes through [`InterceptPipeline::intercept`] exactly once
//! before its bytes leave the process. The pipeline asks its policy for a
//! replacement, logs the outcome and returns the bytes to forward.

mod log;
mod pattern;

pub use log::{InterceptLog, InterceptRecord};
pub use pattern::{PatternRule, PatternTable};

use std::{fmt, sync::Arc};

use bytes::Bytes;
use tracing::{debug, info};

use crate::unit::Tag;

/// Decides what to forward in place of a unit
///
/// Policies may be shared between relays running on different threads, so
/// `apply` takes `&self` and must not depend on call order.
pub trait InterceptPolicy: fmt::Debug + Send + Sync {
    /// Replacement for `bytes` at interception point `tag`, or `None` to forward
    /// the original
    fn apply(&self, tag: Tag, bytes: &[u8]) -> Option<Bytes>;
}

impl<P: InterceptPolicy + ?Sized> InterceptPolicy for Arc<P> {
    fn apply(&self, tag: Tag, bytes: &[u8]) -> Option<Bytes> {
        (**self).apply(tag, bytes)
    }
}

impl<P: InterceptPolicy + ?Sized> InterceptPolicy for Box<P> {
    fn apply(&self, tag: Tag, bytes: &[u8]) -> Option<Bytes> {
        (**self).apply(tag, bytes)
    }
}

/// Forward everything unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl InterceptPolicy for PassThrough {
    fn apply(&self, _tag: Tag, _bytes: &[u8]) -> Option<Bytes> {
        None
    }
}

/// Applies a policy to each unit and records the result
#[derive(Debug, Clone)]
pub struct InterceptPipeline {
    policy: Arc<dyn InterceptPolicy>,
    log: Option<InterceptLog>,
}

impl Default for InterceptPipeline {
    fn default() -> Self {
        Self::new(PassThrough)
    }
}

impl InterceptPipeline {
    /// Create a pipeline around `policy`
    pub fn new<P: InterceptPolicy + 'static>(policy: P) -> Self {
        Self::shared(Arc::new(policy))
    }

    /// Create a pipeline around a policy shared with other relays
    pub fn shared(policy: Arc<dyn InterceptPolicy>) -> Self {
        Self { policy, log: None }
    }

    /// Record every interception in `log`
    pub fn with_log(mut self, log: InterceptLog) -> Self {
        self.log = Some(log);
        self
    }

    /// The interception log, if one is attached
    pub const fn log(&self) -> Option<&InterceptLog> {
        self.log.as_ref()
    }

    /// Consult the policy for one complete unit and return the bytes to forward
    pub fn intercept(&self, tag: Tag, original: Bytes) -> Bytes {
        let forwarded = match self.policy.apply(tag, &original) {
            Some(replacement) if replacement != original => {
                info!(
                    %tag,
                    original = %hex::encode(&original),
                    forwarded = %hex::encode(&replacement),
                    "Unit substituted"
                );
                replacement
            }
            _ => {
                debug!(%tag, bytes = %hex::encode(&original), "Unit passed through");
                original.clone()
            }
        };

        if let Some(log) = &self.log {
            log.record(tag, original, forwarded.clone());
        }
        forwarded
    }
}
