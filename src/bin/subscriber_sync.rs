use clap::Parser;
use std::path::PathBuf;
use subscriber_sync::{logging, shutdown, Mode, SyncConfig, SyncService};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
struct Opts {
    /// configuration file path, if not specified, defaults and environment variables are used.
    #[clap(short, long, env = "SYNC_CONFIG")]
    conf: Option<PathBuf>,
    /// full: backfill (when enabled) then stream, backfill: backfill and exit, stream: stream only.
    #[clap(short, long, default_value = "full")]
    mode: Mode,
    /// log file directory, if not specified, all log information will be output to stdout.
    #[clap(long)]
    log_dir: Option<String>,
}

fn main() {
    let opts: Opts = Opts::parse();
    let mut conf = match SyncConfig::load(opts.conf.as_deref()) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Load configuration failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = opts.log_dir {
        conf.set_log_dir(dir);
    }
    let guards = match logging::init(conf.log()) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Setup logging failed: {}", e);
            std::process::exit(1);
        }
    };

    let code = match run(conf, opts.mode) {
        Ok(()) => {
            info!("Subscriber sync stopped");
            0
        }
        Err(e) => {
            error!(?e, "Subscriber sync failed: {}", e);
            1
        }
    };
    // flush log writers before exit.
    drop(guards);
    std::process::exit(code);
}

fn run(conf: SyncConfig, mode: Mode) -> subscriber_sync::Result<()> {
    let (trigger, listener) = shutdown::channel();
    trigger.install_signal_handlers()?;
    info!(?mode, index = %conf.search().index(), "Starting subscriber sync");
    let service = SyncService::connect(conf)?;
    service.run(mode, listener)
}
