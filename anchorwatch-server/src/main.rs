use clap::Parser;
use log::{error, info};
use miette::Result;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use anchorwatch_server::{Cli, Session, VERSION};

mod web;

use web::Web;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_timestamp_millis()
        .init();

    info!("Anchorwatch server {} starting", VERSION);

    Toplevel::new(|s| async move {
        start(&s, args).await;
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(Into::into)
}

async fn start(s: &SubsystemHandle, args: Cli) {
    let session = match Session::new(s, args).await {
        Ok(session) => session,
        Err(e) => {
            error!("Cannot start: {}", e);
            s.request_shutdown();
            return;
        }
    };

    let web = Web::new(session);
    s.start(SubsystemBuilder::new("Webserver", |subsys| web.run(subsys)));
}
