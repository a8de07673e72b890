//! 系统接口模块: 镜像加载与重启

mod kexec;

use std::io;

use bitflags::bitflags;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::const_values::{KEXEC_ARCH_DEFAULT, KEXEC_PRESERVE_CONTEXT, Verbosity};
use crate::segment::SegmentList;

pub use kexec::{KexecSegment, LinuxKexec};

/// 加载请求被拒绝
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("kexec_load 失败: {source}")]
    Rejected { source: io::Error },
    #[error("{what} {value:#x} 超出本机地址宽度")]
    OutOfRange { what: &'static str, value: u64 },
    #[error("当前系统不支持 kexec_load")]
    Unsupported,
}

/// 重启命令被拒绝
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("reboot 失败: {source}")]
    Rejected { source: io::Error },
    #[error("当前系统不支持 kexec 重启")]
    Unsupported,
}

/// 重启调用报告成功却返回了
///
/// 内核承诺该调用不会返回，此时系统处于不一致状态，与普通的失败不同。
#[derive(Debug, Error, PartialEq, Eq)]
#[error("reboot(LINUX_REBOOT_CMD_KEXEC) 报告成功但仍然返回, 系统状态可能不一致")]
pub struct AnomalousReturn;

bitflags! {
    /// kexec_load 的请求级标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KexecFlags: u64 {
        /// 跨越跳转保留执行上下文
        const PRESERVE_CONTEXT = KEXEC_PRESERVE_CONTEXT;
    }
}

impl KexecFlags {
    /// 传给系统调用的最终取值，架构字段使用默认值
    #[inline(always)]
    pub fn raw(self) -> u64 {
        KEXEC_ARCH_DEFAULT | self.bits()
    }
}

/// 一次完整的加载请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub entry: u64,
    pub segments: SegmentList,
    pub flags: KexecFlags,
}

/// 镜像加载设施
///
/// 真实实现为 [`LinuxKexec`]，测试中可替换为记录调用的实现。
pub trait ImageFacility {
    /// 提交加载请求，成功后新镜像已就绪但尚未运行
    fn load(&mut self, request: &LoadRequest) -> Result<(), LoadError>;

    /// 切换到已加载的镜像
    ///
    /// 真实系统上成功时不会返回；返回 `Ok(())` 意味着异常
    fn restart(&mut self) -> Result<(), RestartError>;

    /// 设施名称（用于日志）
    fn name(&self) -> &str {
        "unknown"
    }
}

/// 提交加载请求，失败不重试
pub fn invoke_load<F: ImageFacility + ?Sized>(
    facility: &mut F,
    request: &LoadRequest,
    verbosity: Verbosity,
) -> Result<(), LoadError> {
    if verbosity.enabled() {
        info!(
            facility = facility.name(),
            entry = format_args!("{:#x}", request.entry),
            segments = request.segments.len(),
            flags = format_args!("{:#x}", request.flags.raw()),
            "提交加载请求"
        );
    }
    facility.load(request)?;
    debug!("加载请求已被接受");
    Ok(())
}

/// 触发重启，切换到已加载的镜像
///
/// 只有异常情况下才会返回 `Ok`
pub fn trigger_restart<F: ImageFacility + ?Sized>(
    facility: &mut F,
    verbosity: Verbosity,
) -> Result<AnomalousReturn, RestartError> {
    if verbosity.enabled() {
        info!(facility = facility.name(), "切换到新镜像");
    }
    facility.restart()?;
    error!("{}", AnomalousReturn);
    Ok(AnomalousReturn)
}
