//! Transfer notifications for the Chronicle indexer.
//!
//! Implements the [`TransferNotifier`] port by posting one envelope per
//! committed height to an external push gateway. Recipients are resolved
//! from the `notification_tokens` table, which a separate wallet service
//! owns.
//!
//! [`TransferNotifier`]: chronicle_core::ports::TransferNotifier

mod push;

pub use push::{
    Direction, Envelope, Notification, NotificationData, PushConfig, PushNotifier, build_envelope,
};
