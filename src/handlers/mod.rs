// API处理器模块
// 包含结账、网关回调、订单查询、健康检查等HTTP请求处理逻辑

pub mod health_handlers;
pub mod order_handlers;
pub mod payment_handlers;
pub mod webhook_handlers;

// 重新导出处理器
pub use health_handlers::*;
pub use order_handlers::*;
pub use payment_handlers::*;
pub use webhook_handlers::*;
