pub mod alegeus;
pub mod escalation;
pub mod traits;

pub use alegeus::AlegeusClient;
pub use escalation::{LogEscalationSink, TicketEscalationSink, WebhookPaymentOpsNotifier};
pub use traits::{BenefitsAdminGateway, EscalationSink, GatewayResponse, PaymentOpsNotifier};
