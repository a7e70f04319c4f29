// 服务层模块
// 包含支付请求构建、防滥用、网关通知对账等业务逻辑服务

pub mod anti_abuse;
pub mod catalog;
pub mod order_store;
pub mod payment_service;
pub mod period_translator;
pub mod sheet_sync;
pub mod token_service;
pub mod webhook_service;

// 重新导出服务
pub use anti_abuse::{AntiAbuseGate, InMemoryRateLimitStore, RouteClass, TurnstileVerifier};
pub use catalog::ProductCatalog;
pub use order_store::{InMemoryOrderStore, OrderRepository};
pub use payment_service::PaymentService;
pub use sheet_sync::{OrderSink, SheetWebhookSink};
pub use token_service::TokenService;
pub use webhook_service::{NotifyOutcome, WebhookService};
