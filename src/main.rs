use std::io;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use cachewarden::api::{self, ApiState};
use cachewarden::dashboard::Dashboard;
use cachewarden::{
    get_servers, logging, report, CacheWardenError, Config, FleetScheduler, HttpSession, Mode,
    Reconciler, Workflow,
};

fn build_scheduler(cli: &Config) -> Result<Arc<FleetScheduler>, CacheWardenError> {
    let servers = get_servers(&cli.servers_file, &cli.servers)?;
    let workflow = Workflow::load(&cli.workflow);
    let sessions = HttpSession::for_fleet(servers, cli.timeouts())?;
    let reconciler = Reconciler::new(workflow, &cli.ready_marker, cli.wait_policy());
    Ok(Arc::new(FleetScheduler::new(sessions, reconciler)))
}

/// Stops waiting on remote jobs once ctrl-c is pressed.
fn cancel_on_ctrl_c(scheduler: &Arc<FleetScheduler>) {
    let scheduler = Arc::clone(scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            scheduler.shutdown();
        }
    });
}

async fn run_serve(cli: &Config, scheduler: Arc<FleetScheduler>) -> Result<(), CacheWardenError> {
    let router = api::build_router(ApiState {
        scheduler: Arc::clone(&scheduler),
        dashboard: Arc::new(Dashboard::new()?),
    });
    let listener = tokio::net::TcpListener::bind(cli.listen_addr()).await?;
    info!(addr = %cli.listen_addr(), "serving cache checker API");

    let interval = tokio::spawn(Arc::clone(&scheduler).run_interval(cli.interval()));

    let shutdown = Arc::clone(&scheduler);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.shutdown();
        })
        .await?;
    let _ = interval.await;
    Ok(())
}

/// Runs one fleet pass and prints the report. Returns whether every server ended up fine.
async fn run_check(scheduler: Arc<FleetScheduler>) -> Result<bool, CacheWardenError> {
    cancel_on_ctrl_c(&scheduler);
    let report = scheduler.run_pass().await?;
    report::write_report(&mut io::stdout().lock(), &report)?;
    Ok(!report.has_failures())
}

async fn run_status(scheduler: Arc<FleetScheduler>) -> Result<(), CacheWardenError> {
    let statuses = scheduler.statuses().await;
    report::write_statuses(&mut io::stdout().lock(), &statuses)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), CacheWardenError> {
    let cli = Config::parse();
    logging::init(cli.log_file.as_deref())?;
    let scheduler = build_scheduler(&cli)?;

    match cli.mode {
        Mode::Serve => {
            eprintln!("[Cachewarden] Running in serve mode!");
            run_serve(&cli, scheduler).await?;
        }
        Mode::Check => {
            if !run_check(scheduler).await? {
                eprintln!("[Cachewarden] Some servers could not be brought up to date.");
                std::process::exit(1);
            }
        }
        Mode::Status => {
            run_status(scheduler).await?;
        }
    };

    Ok(())
}
