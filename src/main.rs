use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use webwx_sync::sync::{Record, SyncBatch};
use webwx_sync::{ContactChange, Session, SyncClient, SyncConfig, SyncEventHandler};
use webwx_sync_ureq_http_client::UreqHttpClient;

// Follows a logged-in web session and prints what arrives.
//
// Usage:
//   cargo run -- --session session.json
//   cargo run -- -s session.json --host webpush.wx2.qq.com --idle-delay-ms 500
#[derive(Debug, Parser)]
#[command(about = "Long-poll sync loop for a logged-in web session")]
struct Args {
    /// Session file written by the login step; the sync key is saved back on exit.
    #[arg(short, long)]
    session: PathBuf,

    /// Probe only these hosts, in the given order.
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Pause after a sync check that reports nothing new.
    #[arg(long, default_value_t = 1000)]
    idle_delay_ms: u64,

    /// Client-side bound on one long-poll request.
    #[arg(long, default_value_t = 35)]
    poll_timeout_secs: u64,
}

struct LoggingHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingHandler {
    async fn on_contacts_changed(
        &self,
        records: &[Record],
        change: ContactChange,
    ) -> anyhow::Result<()> {
        for record in records {
            info!("Contact {:?}: {}", change, field(record, "UserName"));
        }
        Ok(())
    }

    async fn on_group_members_changed(&self, records: &[Record]) -> anyhow::Result<()> {
        info!("{} group member change(s)", records.len());
        Ok(())
    }

    async fn on_server_event(&self, batch: Arc<SyncBatch>) -> anyhow::Result<()> {
        for message in &batch.add_msg.records {
            info!(
                "Message from {}: {}",
                field(message, "FromUserName"),
                field(message, "Content")
            );
        }
        Ok(())
    }
}

fn field<'a>(record: &'a Record, name: &str) -> &'a str {
    record.get(name).and_then(|v| v.as_str()).unwrap_or("?")
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut session = match Session::load(&args.session) {
        Ok(session) => session,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = SyncConfig {
        idle_delay: Duration::from_millis(args.idle_delay_ms),
        poll_timeout: Duration::from_secs(args.poll_timeout_secs),
        ..SyncConfig::default()
    };
    if !args.hosts.is_empty() {
        config.hosts = args.hosts.clone();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = rt.block_on(async {
        let client = SyncClient::new(
            Arc::new(UreqHttpClient::new()),
            Arc::new(LoggingHandler),
            config,
        );

        let shutdown = client.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping.");
                shutdown.trigger();
            }
        });

        let outcome = client.run(&mut session).await;
        client.close().await;
        outcome
    });

    if let Err(e) = session.save(&args.session) {
        warn!("Could not persist sync key: {e:#}");
    }

    match outcome {
        Ok(()) => {
            info!("Sync loop has shut down.");
            ExitCode::SUCCESS
        }
        Err(e) if e.requires_login() => {
            error!("{e}. Log in again and restart.");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("Sync stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
