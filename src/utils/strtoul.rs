//! 与 C `strtoul(s, &end, 0)` 行为一致的无符号整数解析
//!
//! 支持的前缀:
//! - `0x` / `0X`: 十六进制（前缀后至少要有一个十六进制数字）
//! - `0`: 八进制
//! - 其余: 十进制
//!
//! 解析停在第一个非法字符处，剩余部分原样返回，由调用者判断是不是合法的分隔符。
//!
//! 与 `strtoul` 不同、更严格的地方:
//! - 没有任何数字时报 [`IntError::Empty`]，`strtoul` 会返回 0
//! - `-` 号报 [`IntError::Negative`]，`strtoul` 会对结果取反回绕
//! - 超出 u64 报 [`IntError::Overflow`]，`strtoul` 返回 `ULONG_MAX` 并设置 `ERANGE`

use thiserror::Error;

/// 整数解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntError {
    #[error("缺少数字")]
    Empty,
    #[error("不支持负数")]
    Negative,
    #[error("数值超出 u64 范围")]
    Overflow,
    #[error("多余的字符 '{0}'")]
    Trailing(String),
}

/// 解析前缀中的整数，返回数值和未消费的剩余部分
pub fn parse_prefix(s: &str) -> Result<(u64, &str), IntError> {
    let s = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let s = match s.as_bytes().first() {
        Some(b'+') => &s[1..],
        Some(b'-') => return Err(IntError::Negative),
        _ => s,
    };

    let bytes = s.as_bytes();
    let (radix, digits) = if bytes.len() > 2
        && bytes[0] == b'0'
        && (bytes[1] == b'x' || bytes[1] == b'X')
        && bytes[2].is_ascii_hexdigit()
    {
        (16, &s[2..])
    } else if bytes.first() == Some(&b'0') {
        // 前导 0 本身就是一个合法的八进制数字
        (8, s)
    } else {
        (10, s)
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(IntError::Empty);
    }

    let mut value: u64 = 0;
    for c in digits[..end].chars() {
        // end 之前的字符都已通过 is_digit 检查
        let digit = c.to_digit(radix).ok_or(IntError::Empty)?;
        value = value
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or(IntError::Overflow)?;
    }

    Ok((value, &digits[end..]))
}

/// 解析完整的整数，不允许有任何剩余字符
pub fn parse_exact(s: &str) -> Result<u64, IntError> {
    match parse_prefix(s)? {
        (value, "") => Ok(value),
        (_, rest) => Err(IntError::Trailing(rest.to_string())),
    }
}
