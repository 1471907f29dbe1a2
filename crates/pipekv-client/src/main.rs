use anyhow::Context;
use clap::Parser;
use pipekv_client::{
    connect, parse_client_command, run_notification_listener, ClientCommand, ClientPipes,
};
use pipekv_proto::MAX_CLIENT_SUBS;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pipekv-client",
    about = "Interactive pipekv client; reads SUBSCRIBE/UNSUBSCRIBE/DELAY/DISCONNECT from stdin"
)]
struct Cli {
    /// Unique id; the client pipes are created at /tmp/{req,resp,notif}<id>
    client_id: String,
    /// Registration FIFO name of the server (under /tmp)
    register_pipe_name: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let pipes = ClientPipes::derive(&cli.client_id, &cli.register_pipe_name)
        .context("failed to derive pipe paths")?;
    let (mut session, notif) =
        connect(&pipes).context("failed to connect to the server")?;
    println!("Server returned 0 for operation: connect");

    let active_subs = Arc::new(AtomicUsize::new(0));
    let listener = {
        let active_subs = Arc::clone(&active_subs);
        thread::Builder::new()
            .name("notifications".to_owned())
            .spawn(move || run_notification_listener(notif, active_subs))
            .context("failed to spawn notification listener")?
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        match parse_client_command(&line) {
            ClientCommand::Subscribe(key) => {
                if active_subs.load(Ordering::SeqCst) >= MAX_CLIENT_SUBS {
                    error!("max number of subscriptions reached");
                    continue;
                }
                let result = session.subscribe(&key).context("subscribe failed")?;
                println!("Server returned {result} for operation: subscribe");
                if result == 0 {
                    active_subs.fetch_add(1, Ordering::SeqCst);
                }
            }
            ClientCommand::Unsubscribe(key) => {
                let result = session.unsubscribe(&key).context("unsubscribe failed")?;
                println!("Server returned {result} for operation: unsubscribe");
                if result == 0 {
                    let _ = active_subs.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        n.checked_sub(1)
                    });
                }
            }
            ClientCommand::Delay(delay_ms) => {
                if delay_ms > 0 {
                    println!("Waiting...");
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
            ClientCommand::Disconnect => {
                let result = session.disconnect().context("disconnect failed")?;
                println!("Server returned {result} for operation: disconnect");
                listener
                    .join()
                    .map_err(|_| anyhow::anyhow!("notification listener panicked"))?;
                pipes.remove_all();
                return Ok(());
            }
            ClientCommand::Empty => {}
            ClientCommand::Invalid => error!("Invalid command. See HELP for usage"),
        }
    }

    // Stdin ended without a DISCONNECT; tear down as if one was sent.
    let result = session.disconnect().context("disconnect failed")?;
    println!("Server returned {result} for operation: disconnect");
    listener
        .join()
        .map_err(|_| anyhow::anyhow!("notification listener panicked"))?;
    pipes.remove_all();
    Ok(())
}
