//! Port trait for transfer notifications.

use async_trait::async_trait;

use crate::models::{ChainContext, Transfer};

/// Best-effort side channel for committed transfers.
///
/// Implementations log their failures and never report them back: a
/// notification must not be able to stall the pipeline.
#[async_trait]
pub trait TransferNotifier: Send + Sync {
    async fn notify(&self, ctx: &ChainContext, transfers: &[Transfer]);
}

/// Notifier that drops everything. Used when no gateway is configured.
pub struct NoopNotifier;

#[async_trait]
impl TransferNotifier for NoopNotifier {
    async fn notify(&self, _ctx: &ChainContext, _transfers: &[Transfer]) {}
}
