// Operator-facing side channels: escalation tickets and payment-ops notices.
// Neither may ever block or fail a reconciliation, so errors stop here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::traits::{EscalationSink, PaymentOpsNotifier};
use crate::wallet::models::{ReimbursementWallet, RosId, WalletId};

#[derive(Debug, Clone, Serialize)]
struct EscalationTicket {
    wallet_id: WalletId,
    organization_id: i64,
    wallet_state: String,
    message: String,
    raised_at: DateTime<Utc>,
}

/// Posts escalation tickets to the support-ticketing webhook
pub struct TicketEscalationSink {
    webhook_url: String,
    client: reqwest::Client,
}

impl TicketEscalationSink {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            webhook_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn ticket(wallet: &ReimbursementWallet, message: &str) -> EscalationTicket {
        EscalationTicket {
            wallet_id: wallet.id,
            organization_id: wallet.organization_id,
            wallet_state: wallet.state.to_string(),
            message: message.to_string(),
            raised_at: Utc::now(),
        }
    }
}

#[async_trait]
impl EscalationSink for TicketEscalationSink {
    async fn raise(&self, wallet: &ReimbursementWallet, message: &str) {
        let ticket = Self::ticket(wallet, message);
        warn!(wallet_id = wallet.id, "🎫 Escalating wallet: {}", message);

        match self.client.post(&self.webhook_url).json(&ticket).send().await {
            Ok(response) if response.status().is_success() => {
                info!(wallet_id = wallet.id, "Escalation ticket created");
            }
            Ok(response) => {
                error!(
                    wallet_id = wallet.id,
                    status = response.status().as_u16(),
                    "Escalation webhook rejected ticket: {}",
                    message
                );
            }
            Err(e) => {
                error!(wallet_id = wallet.id, "Escalation webhook unreachable: {:?}", e);
            }
        }
    }
}

/// Used when no ticketing webhook is configured
pub struct LogEscalationSink;

#[async_trait]
impl EscalationSink for LogEscalationSink {
    async fn raise(&self, wallet: &ReimbursementWallet, message: &str) {
        error!(
            wallet_id = wallet.id,
            organization_id = wallet.organization_id,
            "🎫 Manual action required: {}",
            message
        );
    }
}

#[derive(Debug, Clone, Serialize)]
struct RosChangeNotice {
    wallet_id: WalletId,
    organization_id: i64,
    previous_ros_id: RosId,
    latest_ros_id: RosId,
    changed_at: DateTime<Utc>,
}

/// Sends ROS-change notices from a detached task
pub struct WebhookPaymentOpsNotifier {
    webhook_url: Option<String>,
    client: Arc<reqwest::Client>,
}

impl WebhookPaymentOpsNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            webhook_url,
            client: Arc::new(reqwest::Client::builder().timeout(timeout).build()?),
        })
    }
}

#[async_trait]
impl PaymentOpsNotifier for WebhookPaymentOpsNotifier {
    async fn notify_ros_change(
        &self,
        wallet: &ReimbursementWallet,
        previous_ros_id: RosId,
        latest_ros_id: RosId,
    ) {
        let Some(url) = self.webhook_url.clone() else {
            info!(
                wallet_id = wallet.id,
                previous_ros_id, latest_ros_id, "ROS change (payment ops webhook not configured)"
            );
            return;
        };

        let notice = RosChangeNotice {
            wallet_id: wallet.id,
            organization_id: wallet.organization_id,
            previous_ros_id,
            latest_ros_id,
            changed_at: Utc::now(),
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&notice).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(
                    wallet_id = notice.wallet_id,
                    "Payment ops notice rejected with {}",
                    response.status()
                ),
                Err(e) => warn!(
                    wallet_id = notice.wallet_id,
                    "Payment ops notice failed: {:?}", e
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::models::WalletState;

    #[test]
    fn test_ticket_carries_wallet_context() {
        let mut wallet = ReimbursementWallet::new(3, 44, 5);
        wallet.state = WalletState::Runout;
        let ticket = TicketEscalationSink::ticket(&wallet, "no eligibility record found");
        assert_eq!(ticket.wallet_id, 3);
        assert_eq!(ticket.organization_id, 44);
        assert_eq!(ticket.wallet_state, "RUNOUT");
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_is_silent() {
        let notifier = WebhookPaymentOpsNotifier::new(None, Duration::from_secs(1)).unwrap();
        let wallet = ReimbursementWallet::new(3, 44, 5);
        notifier.notify_ros_change(&wallet, 5, 6).await;
    }
}
