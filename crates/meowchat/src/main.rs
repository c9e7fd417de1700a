use std::path::PathBuf;
use std::sync::Arc;

use meowchat::commands::CommandTable;
use meowchat::config::{DEFAULT_CONFIG_PATH, JsonConfig, Settings};
use meowchat::stock::StockCommands;
use meowchat::{AccountsFile, Hub};
use tokio::net::TcpListener;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
    eprintln!(
        "meowchat (telnet chat room)\n\n\
USAGE:\n  meowchat [--host HOST] [--port PORT] [--config PATH] [--accounts PATH]\n\n\
ENV:\n  MEOWCHAT_CONFIG         optional; default assets/config.json\n  MEOWCHAT_ACCOUNTS_PATH  optional; default assets/accounts.json (or accounts_path in config)\n  RUST_LOG                optional; default info,meowchat=info\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Args {
    config_path: PathBuf,
    accounts_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

fn parse_args() -> Args {
    let mut config_path: PathBuf = std::env::var("MEOWCHAT_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into();
    let mut accounts_path: Option<PathBuf> =
        std::env::var("MEOWCHAT_ACCOUNTS_PATH").ok().map(Into::into);
    let mut host = None;
    let mut port = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--host" => {
                host = Some(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--port" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                let p: u16 = v.parse().unwrap_or_else(|_| usage_and_exit());
                if p == 0 {
                    usage_and_exit();
                }
                port = Some(p);
            }
            "--config" => {
                config_path = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--accounts" => {
                accounts_path = Some(it.next().unwrap_or_else(|| usage_and_exit()).into());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Args {
        config_path,
        accounts_path,
        host,
        port,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meowchat=info".into()),
        )
        .with_target(false)
        .init();

    let args = parse_args();
    let mut settings = Settings::from_source(&JsonConfig::load(&args.config_path));
    if let Some(h) = args.host {
        settings.host = h;
    }
    if let Some(p) = args.port {
        settings.port = p;
    }
    if let Some(a) = args.accounts_path {
        settings.accounts_path = a;
    }

    let accounts = AccountsFile::load(settings.accounts_path.clone())?;
    info!(
        path = %accounts.path().display(),
        accounts = accounts.len(),
        "accounts loaded"
    );

    let mut commands = CommandTable::new();
    let n = commands.load(&StockCommands)?;
    info!(commands = n, "commands loaded");
    if settings.admins.is_empty() {
        info!("no admins configured; admin commands disabled");
    }

    let hub = Arc::new(Hub::new(&settings, Arc::new(accounts), commands));

    let bind = settings.bind_addr();
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind}: {e}"))?;
    info!(
        bind = %bind,
        config = %args.config_path.display(),
        motd = %settings.motd,
        idle_timeout_s = settings.idle_timeout.map(|d| d.as_secs()).unwrap_or(0),
        "meowchat listening"
    );

    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => match res {
                Ok(v) => v,
                Err(e) => {
                    warn!(err = %e, "accept failed");
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        };
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = meowchat::handle_conn(stream, peer, hub).await {
                warn!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}
