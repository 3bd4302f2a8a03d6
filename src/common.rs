//! 通用模块，包含错误处理、配置、时钟和工具类型

pub mod clock;
pub mod config;
pub mod errors;
pub mod utils;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::VaultConfig;
pub use self::errors::{Error, Result};
pub use self::utils::ZeroizingVec;
