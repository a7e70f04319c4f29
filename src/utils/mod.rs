// 工具函数模块
// 包含网关加解密、随机字串、输入验证等通用工具

pub mod crypto;
pub mod validation;

// 重新导出常用函数
pub use crypto::*;
pub use validation::*;
