use clap::Parser;
use log::{error, info, warn};
use quiz_server::catalog::QuestionCatalog;
use quiz_server::session::{GameSession, SessionConfig};
use quiz_server::{admin, http, telnet};
use std::time::Duration;
use tokio::net::TcpListener;

/// Parses command-line arguments, loads the question catalog, then wires up
/// the session engine, both transports and the admin console.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Question catalog file
        #[clap(short, long, default_value = "resources/questions.txt")]
        questions: String,
        /// Host to bind both listeners to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port for the interactive (telnet) transport
        #[clap(short, long, default_value = "1337")]
        telnet_port: u16,
        /// Port for the polled (HTTP) transport
        #[clap(short = 'p', long, default_value = "3300")]
        http_port: u16,
        /// Round duration in seconds
        #[clap(short = 'r', long, default_value = "15")]
        round_seconds: u64,
    }

    init_logging()?;
    let args = Args::parse();

    // An unreadable or empty catalog is the one fault that takes the
    // process down; everything after this point is handled in place.
    let catalog = QuestionCatalog::load(&args.questions)?;
    info!("{} questions loaded from {}", catalog.len(), args.questions);

    let config = SessionConfig {
        round_duration: Duration::from_secs(args.round_seconds),
        ..SessionConfig::default()
    };
    let session = GameSession::new(catalog, config);
    let handle = session.handle();
    let session_task = tokio::spawn(session.run());

    let telnet_listener = TcpListener::bind((args.host.as_str(), args.telnet_port)).await?;
    info!("telnet server is listening on {}", telnet_listener.local_addr()?);
    let telnet_task = {
        let handle = handle.clone();
        tokio::spawn(async move {
            telnet::serve(telnet_listener, handle).await;
        })
    };

    let http_listener = TcpListener::bind((args.host.as_str(), args.http_port)).await?;
    info!("web server is listening on http://{}", http_listener.local_addr()?);
    let app = http::router(handle.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app.into_make_service()).await {
            error!("http server error: {}", e);
        }
    });

    let admin_task = tokio::spawn(admin::run_stdin(handle));

    tokio::select! {
        _ = session_task => warn!("session task ended"),
        _ = telnet_task => warn!("telnet task ended"),
        _ = http_task => warn!("http task ended"),
        _ = admin_task => info!("admin input closed"),
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    Ok(())
}

/// The logger is built with its filter open to debug and the global max
/// level used as the runtime gate, so the admin `debug on`/`debug off`
/// commands can toggle verbosity after startup.
fn init_logging() -> Result<(), log::SetLoggerError> {
    let logger = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .build();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(log::LevelFilter::Info);
    Ok(())
}
