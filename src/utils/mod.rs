//! 工具模块

pub mod strtoul;

pub use strtoul::{IntError, parse_exact, parse_prefix};
