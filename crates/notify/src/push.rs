//! Push gateway dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use chronicle_core::metrics::record_notification;
use chronicle_core::models::{ChainContext, Coin, DeviceToken, Transfer};
use chronicle_core::ports::{Repositories, TransferNotifier};

/// Configuration for the push dispatcher.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Endpoint receiving the notification envelope.
    pub gateway_url: String,
    pub request_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8080/push".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Body posted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tokens: Vec<String>,
    pub platform: i32,
    pub title: String,
    pub message: String,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub notifyto: String,
    pub txid: String,
    #[serde(rename = "type")]
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

fn format_amount(coins: &[Coin]) -> String {
    coins
        .iter()
        .map(|c| format!("{}{}", c.amount, c.denom))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One notification per (transfer side, platform) with registered tokens.
pub fn build_envelope(transfers: &[Transfer], tokens: &[DeviceToken]) -> Envelope {
    let mut by_address: BTreeMap<&str, BTreeMap<i32, Vec<String>>> = BTreeMap::new();
    for t in tokens {
        by_address
            .entry(t.address.as_str())
            .or_default()
            .entry(t.platform)
            .or_default()
            .push(t.token.clone());
    }

    let mut notifications = Vec::new();
    for transfer in transfers {
        let amount = format_amount(&transfer.amount);
        let sides = [
            (
                transfer.from.as_str(),
                Direction::Sent,
                "Tokens sent",
                format!("You sent {amount} to {}", transfer.to),
            ),
            (
                transfer.to.as_str(),
                Direction::Received,
                "Tokens received",
                format!("You received {amount} from {}", transfer.from),
            ),
        ];

        for (address, direction, title, message) in sides {
            let Some(platforms) = by_address.get(address) else {
                continue;
            };
            for (platform, tokens) in platforms {
                notifications.push(Notification {
                    tokens: tokens.clone(),
                    platform: *platform,
                    title: title.to_string(),
                    message: message.clone(),
                    data: NotificationData {
                        notifyto: address.to_string(),
                        txid: transfer.tx_hash.clone(),
                        direction,
                    },
                });
            }
        }
    }

    Envelope { notifications }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Posts transfer notifications to a push gateway.
///
/// Every failure is logged and counted, never returned or retried.
pub struct PushNotifier<R: Repositories> {
    http: Client,
    gateway_url: String,
    repos: Arc<R>,
}

impl<R: Repositories> PushNotifier<R> {
    pub fn new(config: PushConfig, repos: Arc<R>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            gateway_url: config.gateway_url,
            repos,
        })
    }

    async fn post(&self, envelope: &Envelope) -> Result<(), String> {
        let response = self
            .http
            .post(&self.gateway_url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("{status} {body}"))
        }
    }
}

#[async_trait]
impl<R: Repositories + 'static> TransferNotifier for PushNotifier<R> {
    #[instrument(skip_all, fields(transfers = transfers.len()))]
    async fn notify(&self, _ctx: &ChainContext, transfers: &[Transfer]) {
        if transfers.is_empty() {
            return;
        }

        let mut addresses: Vec<String> = transfers
            .iter()
            .flat_map(|t| [t.from.clone(), t.to.clone()])
            .collect();
        addresses.sort();
        addresses.dedup();

        let tokens = match self.repos.accounts().device_tokens(&addresses).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "⚠️ Could not load push tokens");
                record_notification("error");
                return;
            }
        };

        let envelope = build_envelope(transfers, &tokens);
        if envelope.notifications.is_empty() {
            return;
        }

        let count = envelope.notifications.len();
        match self.post(&envelope).await {
            Ok(()) => {
                debug!(count, "📨 Notifications dispatched");
                record_notification("sent");
            }
            Err(e) => {
                warn!(count, error = %e, "⚠️ Push gateway rejected notifications");
                record_notification("failed");
            }
        }
    }
}
