use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use fixity_caption::logger::setup_logging;
use fixity_caption::model::florence::FlorenceLoader;
use fixity_caption::model::SystemProbe;
use fixity_caption::ui::{read_image_data_url, CaptionSession, UiState};
use fixity_caption::worker::{run_worker, spawn_host, HostBridge, HostChannels, HostHandle};
use fixity_caption::{resolve_config, HostConfig};

const USAGE: &str = "usage: fixity-caption [--config PATH] [--in-process] IMAGE...\n\
note: captioning needs a build with `--features onnx`; without it every model load fails";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    worker: bool,
    in_process: bool,
    config: Option<PathBuf>,
    images: Vec<PathBuf>,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--worker" => cli.worker = true,
            "--in-process" => cli.in_process = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            image => cli.images.push(PathBuf::from(image)),
        }
    }
    Ok(cli)
}

/// Keeps whichever host the session talks to alive until the end.
enum Host {
    InProcess(HostHandle),
    Child(HostBridge),
}

fn start_host(cli: &CliArgs, config: &HostConfig) -> anyhow::Result<(Host, HostChannels)> {
    if cli.in_process {
        let loader = Arc::new(FlorenceLoader::new(config));
        let (handle, channels) = spawn_host(loader, Box::new(SystemProbe), config)
            .context("failed to start in-process model host")?;
        Ok((Host::InProcess(handle), channels))
    } else {
        let (bridge, channels) = HostBridge::spawn(
            cli.config.as_deref(),
            config.command_capacity,
            config.event_capacity,
        )?;
        Ok((Host::Child(bridge), channels))
    }
}

/// Print a status line whenever the rendered state changes.
fn status_printer() -> impl FnMut(&UiState) {
    let mut last = String::new();
    move |state| {
        let line = state.to_string();
        if line != last {
            eprintln!("{line}");
            last = line;
        }
    }
}

async fn run_session(channels: HostChannels, images: &[PathBuf]) -> anyhow::Result<usize> {
    let mut session = CaptionSession::new(channels);
    session
        .wait_until_ready(status_printer())
        .await
        .context("model failed to load")?;

    let mut failures = 0;
    for path in images {
        let result = match read_image_data_url(path) {
            Ok(image) => session.caption(image, status_printer()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(caption) => println!("{}: {caption}", path.display()),
            Err(e) => {
                log::error!("Captioning {} failed: {e}", path.display());
                eprintln!("{}: error: {e}", path.display());
                failures += 1;
            }
        }
    }
    Ok(failures)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    let config = resolve_config(cli.config.as_deref())?;

    // Worker mode builds its own runtime, so it must run before ours.
    if cli.worker {
        if let Err(e) = setup_logging(&config.log_level, "host") {
            eprintln!("Failed to set up logging: {e}");
        }
        let loader = Arc::new(FlorenceLoader::new(&config));
        std::process::exit(run_worker(loader, Box::new(SystemProbe), &config));
    }

    if cli.images.is_empty() {
        bail!("no images given\n{USAGE}");
    }
    if let Err(e) = setup_logging(&config.log_level, "ui") {
        eprintln!("Failed to set up logging: {e}");
    }

    let (host, channels) = start_host(&cli, &config)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;
    let failures = rt.block_on(run_session(channels, &cli.images));

    match host {
        Host::InProcess(handle) => handle.join(),
        Host::Child(bridge) => bridge.kill(),
    }

    let failures = failures?;
    if failures > 0 {
        bail!("{failures} of {} images failed", cli.images.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_session_args() {
        let cli = parse_args(&args(&["--config", "host.json", "a.jpg", "--in-process", "b.png"]))
            .unwrap();
        assert_eq!(
            cli,
            CliArgs {
                worker: false,
                in_process: true,
                config: Some(PathBuf::from("host.json")),
                images: vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")],
            }
        );
    }

    #[test]
    fn test_parse_worker_flag() {
        let cli = parse_args(&args(&["--worker"])).unwrap();
        assert!(cli.worker);
        assert!(cli.images.is_empty());
    }

    #[test]
    fn test_usage_mentions_onnx_feature() {
        assert!(USAGE.contains("--features onnx"));
        let err = parse_args(&args(&["--verbose"])).unwrap_err();
        assert!(err.to_string().contains("--features onnx"));
    }

    #[test]
    fn test_parse_rejects_bad_flags() {
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--verbose"])).is_err());
    }
}
