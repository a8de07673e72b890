use std::process::ExitCode;

use clap::Parser;
use kexec_load::const_values::Verbosity;
use kexec_load::{Args, Outcome, Settings, clap_exit_status, run};
use tracing::{Level, debug, error};
use tracing_subscriber::{self, EnvFilter};

/// 根据 `-v` 次数选择默认日志等级，RUST_LOG 可以覆盖
fn init_logging(verbosity: Verbosity) {
    let level = match verbosity.0 {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_target(false) // 不显示目标模块
        .with_file(true) // 显示文件名
        .with_line_number(true) // 显示行号
        .init();
}

fn main() -> ExitCode {
    // 解析命令行参数
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(clap_exit_status(&e));
        }
    };
    let cli_verbosity = Verbosity(args.verbose);

    let settings = match Settings::resolve(args) {
        Ok(settings) => settings,
        Err(e) => {
            init_logging(cli_verbosity);
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.verbosity);
    debug!(version = env!("CARGO_PKG_VERSION"), "启动 kexec-load");

    match run(&settings) {
        Ok(Outcome::Loaded) | Ok(Outcome::RestartReturned) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
