use anyhow::Context;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use yahee::host::{HostService, TerminalWindow};
use yahee::model::Settings;

#[derive(Debug, Default)]
struct CliArgs {
    host: bool,
    null_audio: bool,
    paths: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    let settings = yahee::config::load_settings()?;
    init_logging(&settings, args.host)?;
    install_panic_hook();

    if args.host {
        let mut service = HostService::terminal(TerminalWindow::new());
        let stdin = std::io::stdin().lock();
        let stdout = std::io::stdout().lock();
        tracing::info!("serving host requests on stdio");
        if let Err(err) = yahee::bridge::serve_lines(&mut service, stdin, stdout) {
            tracing::error!("host transport failed: {err:#}");
            std::process::exit(1);
        }
        return Ok(());
    }

    yahee::app::run(
        yahee::app::AppOptions {
            paths: args.paths,
            null_audio: args.null_audio,
        },
        settings,
    )
}

fn log_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_env("YAHEE_LOG")
        .ok()
        .or_else(|| {
            settings
                .log_filter
                .as_deref()
                .and_then(|filter| EnvFilter::try_new(filter).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("yahee=info"))
}

/// The UI owns the terminal, so logs go to a file; host mode keeps stdout
/// for the protocol and logs to stderr.
fn init_logging(settings: &Settings, host_mode: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(log_filter(settings));
    if host_mode {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(());
    }

    let path = yahee::config::log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    registry
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .init();
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("fatal: {info}");
        default_hook(info);
    }));
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    for arg in args {
        match arg.as_str() {
            "--host" => out.host = true,
            "--null-audio" => out.null_audio = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument {other}"),
            path => out.paths.push(PathBuf::from(path)),
        }
    }
    Ok(out)
}

fn print_help() {
    println!("yahee [OPTIONS] [PATH...]");
    println!("  PATH              Audio files or folders to queue on startup");
    println!("  --null-audio      Play silently (no audio device)");
    println!("  --host            Serve host requests as JSON lines on stdin/stdout");
}
