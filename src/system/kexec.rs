//! Linux kexec 实现

use std::ffi::c_void;

#[cfg(target_os = "linux")]
use std::io;

use super::{ImageFacility, LoadError, LoadRequest, RestartError};
use crate::segment::Segment;

/// 与 `<linux/kexec.h>` 中 `struct kexec_segment` 布局一致
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KexecSegment {
    /// 用户态缓冲区
    pub buf: *const c_void,
    /// 缓冲区长度
    pub bufsz: usize,
    /// 目标物理地址（内核中为 `const void *`，宽度与 usize 相同）
    pub mem: usize,
    /// 目标内存长度
    pub memsz: usize,
}

fn to_usize(what: &'static str, value: u64) -> Result<usize, LoadError> {
    usize::try_from(value).map_err(|_| LoadError::OutOfRange { what, value })
}

impl KexecSegment {
    pub fn from_segment(segment: &Segment) -> Result<Self, LoadError> {
        Ok(Self {
            buf: segment.buf.as_ptr().cast(),
            bufsz: segment.buf.len(),
            mem: to_usize("段地址", segment.mem)?,
            memsz: to_usize("段长度", segment.memsz)?,
        })
    }
}

/// 通过 kexec_load(2) 与 reboot(2) 工作的加载设施
#[derive(Debug, Default)]
pub struct LinuxKexec;

impl LinuxKexec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageFacility for LinuxKexec {
    fn load(&mut self, request: &LoadRequest) -> Result<(), LoadError> {
        let segments = request
            .segments
            .iter()
            .map(KexecSegment::from_segment)
            .collect::<Result<Vec<_>, _>>()?;
        let entry = to_usize("入口地址", request.entry)?;
        let flags = to_usize("标志", request.flags.raw())?;

        #[cfg(target_os = "linux")]
        {
            // SAFETY: segments 在调用期间存活，其中的 buf 指向进程生命周期的缓冲区
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_kexec_load,
                    entry as libc::c_ulong,
                    segments.len() as libc::c_ulong,
                    segments.as_ptr(),
                    flags as libc::c_ulong,
                )
            };
            if rc < 0 {
                return Err(LoadError::Rejected {
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (segments, entry, flags);
            Err(LoadError::Unsupported)
        }
    }

    fn restart(&mut self) -> Result<(), RestartError> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: reboot 只接收一个整数命令
            let rc = unsafe {
                libc::reboot(crate::const_values::LINUX_REBOOT_CMD_KEXEC as libc::c_int)
            };
            if rc < 0 {
                return Err(RestartError::Rejected {
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(RestartError::Unsupported)
        }
    }

    fn name(&self) -> &str {
        "kexec_load"
    }
}
