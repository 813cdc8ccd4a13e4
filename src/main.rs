use anyhow::{bail, Context};
use gcodexec::runner::{parse_channel, Runner};
use gcodexec::{init_logging, ChannelId, EngineConfig, BUILD_DATE, VERSION};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const USAGE: &str = "usage: gcodexec <machine-dir> [--config <file>] [--channel <name>] [script]";

struct Args {
    machine_dir: PathBuf,
    config: Option<PathBuf>,
    channel: ChannelId,
    script: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut machine_dir = None;
    let mut config = None;
    let mut channel = ChannelId::Usb;
    let mut script = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config needs a file")?));
            }
            "--channel" => {
                let name = args.next().context("--channel needs a name")?;
                channel = parse_channel(&name)
                    .with_context(|| format!("unknown channel {}", name))?;
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("gcodexec {} ({})", VERSION, BUILD_DATE);
                std::process::exit(0);
            }
            _ if machine_dir.is_none() => machine_dir = Some(PathBuf::from(arg)),
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument {}\n{}", arg, USAGE),
        }
    }

    Ok(Args {
        machine_dir: machine_dir.context(USAGE)?,
        config,
        channel,
        script,
    })
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let path = match path {
        Some(path) => path.clone(),
        None => EngineConfig::default_path()?,
    };
    let config = EngineConfig::load_or_default(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::info!("configuration from {}", path.display());
    Ok(config)
}

fn report(runner: &Runner, replies: Vec<String>, out: &mut impl Write) -> io::Result<()> {
    for reply in replies.iter().filter(|r| !r.is_empty()) {
        writeln!(out, "{}", reply)?;
    }
    for event in runner.take_events() {
        writeln!(out, "# {}", event.description())?;
    }
    out.flush()
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = parse_args()?;
    let config = load_config(args.config.as_ref())?;

    let mut runner = Runner::open(&args.machine_dir, config)?;
    if !runner.start()? {
        tracing::info!("no config file, starting with defaults");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report(&runner, Vec::new(), &mut out)?;

    match &args.script {
        Some(path) => {
            let script = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let replies = runner.send(args.channel, line)?;
                report(&runner, replies, &mut out)?;
            }
        }
        None => {
            for line in io::stdin().lock().lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let replies = runner.send(args.channel, line)?;
                report(&runner, replies, &mut out)?;
            }
        }
    }

    let pos = runner.head_position();
    tracing::info!("finished at X{:.3} Y{:.3} Z{:.3}", pos[0], pos[1], pos[2]);
    Ok(())
}
