//! 段描述解析: `ADDR[+LEN]=SOURCE`

use std::path::PathBuf;
use thiserror::Error;

use crate::const_values::PAGE_SIZE;
use crate::utils::strtoul::{IntError, parse_exact, parse_prefix};

/// 段描述或入口地址解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("段地址解析错误 '{token}': {reason}")]
    Address { token: String, reason: IntError },
    #[error("段地址后有多余字符 '{token}'")]
    TrailingAddress { token: String },
    #[error("段长度解析错误 '{token}': {reason}")]
    Length { token: String, reason: IntError },
    #[error("段长度后有多余字符 '{token}'")]
    TrailingLength { token: String },
    #[error("段长度过大，无法按页对齐 '{token}'")]
    LengthOverflow { token: String },
    #[error("段描述缺少 '=' '{token}'")]
    MissingDelimiter { token: String },
    #[error("入口地址解析错误 '{token}': {reason}")]
    Entry { token: String, reason: IntError },
}

/// 解析后的段描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    /// 目标物理地址
    pub addr: u64,
    /// 请求的内存长度，`None` 表示使用文件大小
    pub len: Option<u64>,
    /// 段内容来源文件
    pub source: PathBuf,
}

impl SegmentSpec {
    /// 解析一个命令行段描述
    pub fn parse(token: &str) -> Result<Self, SpecParseError> {
        let (addr, rest) = parse_prefix(token).map_err(|reason| SpecParseError::Address {
            token: token.to_string(),
            reason,
        })?;

        let (len, rest) = match rest.strip_prefix('+') {
            Some(len_str) => {
                let (len, rest) =
                    parse_prefix(len_str).map_err(|reason| SpecParseError::Length {
                        token: token.to_string(),
                        reason,
                    })?;
                if !rest.is_empty() && !rest.starts_with('=') {
                    return Err(SpecParseError::TrailingLength {
                        token: token.to_string(),
                    });
                }
                // 页对齐时不能溢出
                if len.checked_add(PAGE_SIZE - 1).is_none() {
                    return Err(SpecParseError::LengthOverflow {
                        token: token.to_string(),
                    });
                }
                (Some(len), rest)
            }
            None => {
                if !rest.is_empty() && !rest.starts_with('=') {
                    return Err(SpecParseError::TrailingAddress {
                        token: token.to_string(),
                    });
                }
                (None, rest)
            }
        };

        // 第一个 '=' 之后的全部内容都是文件名，可以再包含 '='
        let source = rest
            .strip_prefix('=')
            .ok_or_else(|| SpecParseError::MissingDelimiter {
                token: token.to_string(),
            })?;

        Ok(Self {
            addr,
            len,
            source: PathBuf::from(source),
        })
    }
}

/// 解析入口地址，整数规则与段地址相同，但不允许任何多余字符
pub fn parse_entry(token: &str) -> Result<u64, SpecParseError> {
    parse_exact(token).map_err(|reason| SpecParseError::Entry {
        token: token.to_string(),
        reason,
    })
}
