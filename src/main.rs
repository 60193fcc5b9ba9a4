use anyhow::Context as _;
use clap::{Parser, Subcommand};
use keyhub::{app, logging, server, storage};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "keyhub", version, about = "Multi-tenant LLM API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    Migrate,
}

fn resolve_port(flag: Option<u16>) -> u16 {
    flag.or_else(|| {
        std::env::var("PORT")
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
    })
    .unwrap_or(app::DEFAULT_PORT)
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("初始化 Tokio Runtime 失败")?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Command::Serve { port: None });

    let data_dir = app::default_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("创建数据目录失败：{}", data_dir.display()))?;
    let db_path = app::db_path(&data_dir);
    storage::init_db(&db_path).with_context(|| "初始化 SQLite 失败")?;

    logging::init(&data_dir)?;

    match cmd {
        Command::Serve { port } => {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), resolve_port(port));
            tracing::event!(
                Level::INFO,
                addr = %addr,
                db = %db_path.display(),
                "keyhub listening"
            );
            server::serve(addr, db_path).await
        }
        Command::Migrate => {
            println!("ok: {}", db_path.display());
            Ok(())
        }
    }
}
