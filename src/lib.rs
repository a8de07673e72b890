//! kexec 段加载器库

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, error::ErrorKind};
use tracing::info;

pub mod const_values;
pub mod segment;
pub mod system;
pub mod utils;

use const_values::{LoaderConfig, Verbosity};
use segment::{SegmentList, parse_entry};
use system::{ImageFacility, KexecFlags, LinuxKexec, LoadRequest, invoke_load, trigger_restart};

/// 将任意文件作为内存段交给 kexec_load，并可立即切换到新镜像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 入口地址（默认 0）
    #[arg(short, long, value_name = "ADDR")]
    pub entry: Option<String>,

    /// 跨越跳转保留执行上下文
    #[arg(short, long)]
    pub preserve_context: bool,

    /// 输出诊断信息（可重复）
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// 加载成功后立即切换到新镜像
    #[arg(short, long)]
    pub reboot: bool,

    /// 配置文件路径
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 段描述
    #[arg(required = true, value_name = "ADDR[+LEN]=FILE")]
    pub segments: Vec<String>,
}

/// 参数解析失败（包括 `--help`）时的退出码
///
/// `--help` 沿用原有行为以失败状态退出，只有 `--version` 返回 0
pub fn clap_exit_status(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// 合并命令行与配置文件后的运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub entry: u64,
    pub flags: KexecFlags,
    pub reboot: bool,
    pub verbosity: Verbosity,
    pub segments: Vec<String>,
}

impl Settings {
    /// 命令行优先: `--entry` 覆盖配置文件中的入口，其余开关取并集
    ///
    /// 段数最先检查，早于读取配置文件和解析入口地址
    pub fn resolve(args: Args) -> Result<Self> {
        SegmentList::check_capacity(args.segments.len())?;

        let config = match &args.config {
            Some(path) => LoaderConfig::new(path)?,
            None => LoaderConfig::default(),
        };

        let entry = match args.entry.as_deref().or(config.entry.as_deref()) {
            Some(token) => parse_entry(token)?,
            None => 0,
        };

        let mut flags = KexecFlags::empty();
        if args.preserve_context || config.preserve_context {
            flags |= KexecFlags::PRESERVE_CONTEXT;
        }

        Ok(Self {
            entry,
            flags,
            reboot: args.reboot || config.reboot,
            verbosity: Verbosity(args.verbose.max(config.verbose)),
            segments: args.segments,
        })
    }
}

/// 运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 镜像已加载，未请求重启
    Loaded,
    /// 重启调用报告成功后返回（已记录为异常）
    RestartReturned,
}

/// 解析段、加载镜像，并按需切换到新镜像
pub fn run_with<F: ImageFacility + ?Sized>(settings: &Settings, facility: &mut F) -> Result<Outcome> {
    let segments = SegmentList::build(settings.segments.as_slice(), settings.verbosity)?;

    let request = LoadRequest {
        entry: settings.entry,
        segments,
        flags: settings.flags,
    };
    invoke_load(facility, &request, settings.verbosity).context("无法加载新镜像")?;

    if !settings.reboot {
        if settings.verbosity.enabled() {
            info!("镜像已加载, 未请求立即重启");
        }
        return Ok(Outcome::Loaded);
    }

    trigger_restart(facility, settings.verbosity).context("无法切换到新镜像")?;
    Ok(Outcome::RestartReturned)
}

/// 使用 Linux kexec 运行
pub fn run(settings: &Settings) -> Result<Outcome> {
    run_with(settings, &mut LinuxKexec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_values::KEXEC_SEGMENT_MAX;
    use crate::segment::{CapacityError, Segment, SourceReadError, SpecParseError};
    use crate::system::{LoadError, RestartError};
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    /// 记录调用的加载设施
    #[derive(Default)]
    struct MockFacility {
        loads: Vec<(u64, Vec<Segment>, u64)>,
        restarts: usize,
        reject_load: bool,
        reject_restart: bool,
    }

    impl ImageFacility for MockFacility {
        fn load(&mut self, request: &LoadRequest) -> Result<(), LoadError> {
            self.loads.push((
                request.entry,
                request.segments.as_slice().to_vec(),
                request.flags.raw(),
            ));
            if self.reject_load {
                return Err(LoadError::Rejected {
                    source: io::Error::from_raw_os_error(libc::EPERM),
                });
            }
            Ok(())
        }

        fn restart(&mut self) -> Result<(), RestartError> {
            self.restarts += 1;
            if self.reject_restart {
                return Err(RestartError::Rejected {
                    source: io::Error::from_raw_os_error(libc::EPERM),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn source_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn settings(argv: &[&str]) -> Settings {
        let args = Args::try_parse_from(std::iter::once("kexec-load").chain(argv.iter().copied()))
            .unwrap();
        Settings::resolve(args).unwrap()
    }

    #[test]
    fn test_help_exits_with_failure() {
        let err = Args::try_parse_from(["kexec-load", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(clap_exit_status(&err), 1);

        let err = Args::try_parse_from(["kexec-load", "-h"]).unwrap_err();
        assert_eq!(clap_exit_status(&err), 1);
    }

    #[test]
    fn test_version_exits_with_success() {
        let err = Args::try_parse_from(["kexec-load", "--version"]).unwrap_err();
        assert_eq!(clap_exit_status(&err), 0);
    }

    #[test]
    fn test_segments_required() {
        let err = Args::try_parse_from(["kexec-load", "-e", "0x1000"]).unwrap_err();
        assert_eq!(clap_exit_status(&err), 1);
    }

    #[test]
    fn test_resolve_defaults() {
        let s = settings(&["0x1000=a"]);
        assert_eq!(s.entry, 0);
        assert_eq!(s.flags, KexecFlags::empty());
        assert!(!s.reboot);
        assert_eq!(s.verbosity, Verbosity(0));
        assert_eq!(s.segments, vec!["0x1000=a".to_string()]);
    }

    #[test]
    fn test_resolve_flags() {
        let s = settings(&["-e", "0x804560", "-p", "-vvv", "-r", "0x1000=a", "0x2000+16=b"]);
        assert_eq!(s.entry, 0x80_4560);
        assert_eq!(s.flags.raw(), 0x2);
        assert!(s.reboot);
        assert_eq!(s.verbosity, Verbosity(3));
        assert_eq!(s.segments.len(), 2);
    }

    #[test]
    fn test_resolve_bad_entry() {
        let args = Args::try_parse_from(["kexec-load", "-e", "0xg", "0x1000=a"]).unwrap();
        let err = Settings::resolve(args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpecParseError>(),
            Some(SpecParseError::Entry { .. })
        ));
    }

    #[test]
    fn test_capacity_checked_before_entry() {
        let tokens: Vec<String> = (0..=KEXEC_SEGMENT_MAX)
            .map(|i| format!("{:#x}=/nonexistent/{}", i * 0x1000, i))
            .collect();

        // 入口地址非法，但段数错误应当先被报告
        let argv = ["kexec-load", "-e", "0xg"]
            .into_iter()
            .chain(tokens.iter().map(String::as_str));
        let err = Settings::resolve(Args::try_parse_from(argv).unwrap()).unwrap_err();
        assert!(err.downcast_ref::<CapacityError>().is_some());
        assert!(err.downcast_ref::<SpecParseError>().is_none());

        // 配置文件不存在时同样先报告段数错误
        let argv = ["kexec-load", "-c", "/nonexistent/kexec-load.toml"]
            .into_iter()
            .chain(tokens.iter().map(String::as_str));
        let err = Settings::resolve(Args::try_parse_from(argv).unwrap()).unwrap_err();
        assert!(err.downcast_ref::<CapacityError>().is_some());
    }

    #[test]
    fn test_resolve_with_config() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "entry = \"0x100000\"\npreserve_context = true\nreboot = true\nverbose = 1").unwrap();
        let path = config.path().to_str().unwrap().to_string();

        let s = settings(&["-c", &path, "0x1000=a"]);
        assert_eq!(s.entry, 0x10_0000);
        assert_eq!(s.flags, KexecFlags::PRESERVE_CONTEXT);
        assert!(s.reboot);
        assert_eq!(s.verbosity, Verbosity(1));

        // 命令行的入口地址优先
        let s = settings(&["-c", &path, "-e", "0x2000", "-vv", "0x1000=a"]);
        assert_eq!(s.entry, 0x2000);
        assert_eq!(s.verbosity, Verbosity(2));
    }

    #[test]
    fn test_run_loads_without_restart() {
        let kernel = source_file(&[0x90; 6000]);
        let initrd = source_file(b"initrd");
        let s = settings(&[
            "-e",
            "0x1000000",
            "-p",
            &format!("0x1000000={}", kernel.path().display()),
            &format!("0x2000000+0x2000={}", initrd.path().display()),
        ]);

        let mut facility = MockFacility::default();
        assert_eq!(run_with(&s, &mut facility).unwrap(), Outcome::Loaded);
        assert_eq!(facility.restarts, 0);
        assert_eq!(facility.loads.len(), 1);

        let (entry, segments, flags) = &facility.loads[0];
        assert_eq!(*entry, 0x100_0000);
        assert_eq!(*flags, 0x2);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].mem, 0x100_0000);
        assert_eq!(segments[0].bufsz(), 6000);
        assert_eq!(segments[0].memsz, 0x2000);
        assert_eq!(segments[1].mem, 0x200_0000);
        assert_eq!(segments[1].buf, b"initrd");
        assert_eq!(segments[1].memsz, 0x2000);
    }

    #[test]
    fn test_run_restart_returned() {
        let kernel = source_file(b"kernel");
        let s = settings(&["-r", &format!("0x1000={}", kernel.path().display())]);

        let mut facility = MockFacility::default();
        assert_eq!(run_with(&s, &mut facility).unwrap(), Outcome::RestartReturned);
        assert_eq!(facility.restarts, 1);
    }

    #[test]
    fn test_run_load_rejected_skips_restart() {
        let kernel = source_file(b"kernel");
        let s = settings(&["-r", &format!("0x1000={}", kernel.path().display())]);

        let mut facility = MockFacility {
            reject_load: true,
            ..Default::default()
        };
        let err = run_with(&s, &mut facility).unwrap_err();
        assert!(err.downcast_ref::<LoadError>().is_some());
        assert_eq!(facility.loads.len(), 1);
        assert_eq!(facility.restarts, 0);
    }

    #[test]
    fn test_run_restart_rejected() {
        let kernel = source_file(b"kernel");
        let s = settings(&["-r", &format!("0x1000={}", kernel.path().display())]);

        let mut facility = MockFacility {
            reject_restart: true,
            ..Default::default()
        };
        let err = run_with(&s, &mut facility).unwrap_err();
        assert!(err.downcast_ref::<RestartError>().is_some());
    }

    #[test]
    fn test_run_too_many_segments() {
        let tokens: Vec<String> = (0..=KEXEC_SEGMENT_MAX)
            .map(|i| format!("{:#x}=/nonexistent/{}", i * 0x1000, i))
            .collect();
        // 绕过 Settings::resolve，直接检查 run_with 自身的段数检查
        let s = Settings {
            entry: 0,
            flags: KexecFlags::empty(),
            reboot: false,
            verbosity: Verbosity(0),
            segments: tokens,
        };

        let mut facility = MockFacility::default();
        let err = run_with(&s, &mut facility).unwrap_err();
        assert!(err.downcast_ref::<CapacityError>().is_some());
        assert!(facility.loads.is_empty());
    }

    #[test]
    fn test_run_missing_source() {
        let s = settings(&["0x1000=/nonexistent/kernel"]);
        let mut facility = MockFacility::default();
        let err = run_with(&s, &mut facility).unwrap_err();
        assert!(err.downcast_ref::<SourceReadError>().is_some());
        assert!(facility.loads.is_empty());
    }
}
