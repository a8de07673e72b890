//! 段构建: 读取来源文件并计算截断与页对齐后的段布局

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, trace};

use super::Segment;
use super::spec::SegmentSpec;
use crate::const_values::{PAGE_SIZE, PREVIEW_BYTES, PREVIEW_VERBOSITY, Verbosity};

/// 段来源文件读取错误
#[derive(Debug, Error)]
pub enum SourceReadError {
    #[error("无法打开 '{}': {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("无法获取 '{}' 的文件信息: {source}", .path.display())]
    Stat { path: PathBuf, source: io::Error },
    #[error("读取 '{}' 失败: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("'{}' 过大, 无法放入内存: {size} 字节", .path.display())]
    TooLarge { path: PathBuf, size: u64 },
}

/// 按页大小向上取整
///
/// 调用者保证 `n + PAGE_SIZE - 1` 不溢出
#[inline(always)]
pub fn align_up(n: u64) -> u64 {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// 计算段布局，返回 (source_length, memory_length)
pub fn layout(file_size: u64, len: Option<u64>) -> (u64, u64) {
    let memsz_raw = len.unwrap_or(file_size);
    // 文件比请求的长度大时截断，而不是报错
    let bufsz = file_size.min(memsz_raw);
    (bufsz, align_up(memsz_raw))
}

/// 读取完整的来源文件
fn read_source(path: &Path) -> Result<Vec<u8>, SourceReadError> {
    let mut file = File::open(path).map_err(|source| SourceReadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| SourceReadError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    let size_usize = usize::try_from(size).map_err(|_| SourceReadError::TooLarge {
        path: path.to_path_buf(),
        size,
    })?;

    read_exact_retrying(&mut file, size_usize).map_err(|source| SourceReadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// 从 reader 读取恰好 `size` 字节
///
/// `Interrupted`/`WouldBlock` 时重试，提前遇到 EOF 视为错误
fn read_exact_retrying<R: Read>(reader: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut off = 0;
    while off < size {
        match reader.read(&mut buf[off..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("文件在读取过程中变短: {} / {} 字节", off, size),
                ));
            }
            Ok(n) => off += n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// 根据段描述构建段
///
/// 缓冲区在这里被泄漏为 `&'static [u8]`: 它必须存活到 kexec_load 消费完毕，
/// 而成功时进程会直接跳转到新镜像，不会再有释放的机会。
pub fn build_segment(spec: &SegmentSpec, verbosity: Verbosity) -> Result<Segment, SourceReadError> {
    let mut data = read_source(&spec.source)?;
    let file_size = data.len() as u64;
    let (bufsz, memsz) = layout(file_size, spec.len);

    // bufsz <= file_size，转换不会失败
    data.truncate(bufsz as usize);
    let buf: &'static [u8] = Box::leak(data.into_boxed_slice());

    if verbosity.enabled() {
        info!(
            addr = format_args!("{:#018x}", spec.addr),
            memsz = format_args!("{:#018x}", memsz),
            path = %spec.source.display(),
            buf = ?buf.as_ptr(),
            bufsz = format_args!("{:#018x}", bufsz),
            "段已读取"
        );
    }
    if verbosity.0 >= PREVIEW_VERBOSITY {
        let preview = &buf[..buf.len().min(PREVIEW_BYTES)];
        trace!(addr = format_args!("{:#x}", spec.addr), head = %hex::encode(preview), "段内容预览");
    }

    Ok(Segment {
        buf,
        mem: spec.addr,
        memsz,
    })
}
