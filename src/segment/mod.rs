//! 段模块: 段描述解析、段构建与段列表

pub mod builder;
pub mod spec;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::const_values::{KEXEC_SEGMENT_MAX, Verbosity};

pub use builder::{SourceReadError, align_up, build_segment, layout};
pub use spec::{SegmentSpec, SpecParseError, parse_entry};

/// 段数超出内核限制
#[derive(Debug, Error, PartialEq, Eq)]
#[error("最多支持 {max} 个段, 请求了 {requested} 个")]
pub struct CapacityError {
    pub requested: usize,
    pub max: usize,
}

/// 已构建好的段
///
/// 构建后不再修改。`buf` 的生命周期为整个进程。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// 段内容，长度即 source_length
    pub buf: &'static [u8],
    /// 目标物理地址
    pub mem: u64,
    /// 目标内存长度，按页对齐
    pub memsz: u64,
}

impl Segment {
    #[inline(always)]
    pub fn bufsz(&self) -> u64 {
        self.buf.len() as u64
    }
}

/// 有序段列表，顺序与命令行一致
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    /// 检查段数是否超出内核限制
    pub fn check_capacity(requested: usize) -> Result<(), CapacityError> {
        if requested > KEXEC_SEGMENT_MAX {
            return Err(CapacityError {
                requested,
                max: KEXEC_SEGMENT_MAX,
            });
        }
        Ok(())
    }

    /// 逐个解析并构建段
    ///
    /// 段数在打开任何文件之前检查；任一段失败立即返回，不保留已构建的部分。
    pub fn build<S: AsRef<str>>(tokens: &[S], verbosity: Verbosity) -> Result<Self> {
        Self::check_capacity(tokens.len())?;

        let mut segments = Vec::with_capacity(tokens.len());
        for token in tokens {
            let token = token.as_ref();
            let spec = SegmentSpec::parse(token)?;
            let segment = build_segment(&spec, verbosity)
                .with_context(|| format!("无法构建段 '{}'", token))?;
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }
}
