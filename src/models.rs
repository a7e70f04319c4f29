// 数据模型定义
// 包含商品、订单、网关交易字段、一次性令牌等核心数据结构

mod order;
mod product;
mod token;
mod trade;

// 重新导出核心类型
pub use order::*;
pub use product::*;
pub use token::*;
pub use trade::*;
