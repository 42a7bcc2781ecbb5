//! tabhost-plug: tab process spawned by the window.
//!
//! Frames travel over stdin/stdout, so logging goes to stderr.

use clap::Parser;
use tabhost_common::{encode_tab_interface, Interface, NamespaceToken};
use tabhost_ipc::{ChannelOptions, MessageChannel};
use tabhost_tabs::{headless_factory, TabHost};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabhost-plug", about = "Tab process for tabhost")]
struct Args {
    /// Namespace of the window that spawned us (org.tabhost.main<pid>).
    main_namespace: String,

    /// Log filter override.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let directive = args.log_level.as_deref().unwrap_or("tabhost=info");
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| directive.into()))
        .init();

    let main_process = match NamespaceToken::parse(&args.main_namespace) {
        Some((Interface::Main, process_id)) => process_id,
        _ => {
            tracing::error!(namespace = %args.main_namespace, "not a window namespace");
            std::process::exit(2);
        }
    };

    let own_pid = std::process::id();
    tracing::info!(process_id = own_pid, main_process, "tabhost-plug starting");

    let channel = MessageChannel::new(encode_tab_interface(own_pid), ChannelOptions::default());
    channel.attach(main_process, tokio::io::stdin(), tokio::io::stdout());

    let host = TabHost::new(channel.clone(), main_process, headless_factory());
    if let Err(e) = host.start() {
        tracing::error!("tab host failed to start: {e}");
        std::process::exit(1);
    }
    host.log("info", format!("tab process {own_pid} serving"));
    host.run().await;

    channel.detach(main_process);
    tracing::info!(process_id = own_pid, "tabhost-plug exiting");
}
