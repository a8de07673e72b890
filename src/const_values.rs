use anyhow::{self, Context};
use serde::Deserialize;
use std::path::Path;

/// kexec_load 要求的页大小
pub const PAGE_SIZE: u64 = 4096;

/// 内核接受的最大段数（linux/kexec.h 中的 KEXEC_SEGMENT_MAX）
pub const KEXEC_SEGMENT_MAX: usize = 16;

/// 架构字段位于 flags 的高 16 位，默认架构为 0
pub const KEXEC_ARCH_DEFAULT: u64 = 0;

/// 跨越跳转保留执行上下文
pub const KEXEC_PRESERVE_CONTEXT: u64 = 0x0000_0002;

/// reboot(2) 中切换到已加载内核的命令字
pub const LINUX_REBOOT_CMD_KEXEC: u32 = 0x4558_4543;

/// verbose 等级达到该值时在 TRACE 中输出段内容预览
pub const PREVIEW_VERBOSITY: u8 = 3;

/// 段内容预览的字节数
pub const PREVIEW_BYTES: usize = 16;

/// 诊断输出等级，由 `-v` 次数与配置文件共同决定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(pub u8);

impl Verbosity {
    pub fn enabled(self) -> bool {
        self.0 > 0
    }
}

/// 加载器配置（来自 `--config` 指定的 TOML 文件）
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// 入口地址，与 `--entry` 使用相同的整数语法
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub preserve_context: bool,
    #[serde(default)]
    pub reboot: bool,
    #[serde(default)]
    pub verbose: u8,
}

impl LoaderConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<LoaderConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", &path.as_ref().as_os_str()))?;
        let config: LoaderConfig = toml::from_str(&toml_str)
            .with_context(|| format!("无法解析配置文件: {:?}", &path.as_ref().as_os_str()))?;
        anyhow::Ok(config)
    }
}
