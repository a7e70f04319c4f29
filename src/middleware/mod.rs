// 中间件模块
// 包含请求日志、跨域、防伪令牌、请求限流等中间件

pub mod cors;
pub mod csrf;
pub mod logging;
pub mod rate_limit;

// 重新导出中间件
pub use cors::*;
pub use csrf::*;
pub use logging::*;
pub use rate_limit::*;
