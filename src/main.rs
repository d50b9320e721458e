mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stalld::boost::sched::LinuxSchedBackend;
use stalld::boost::{ActiveBoosters, BoostEngine};
use stalld::config::Cli;
use stalld::error::StalldError;
use stalld::pidfile::PidFile;
use stalld::signals::Shutdown;
use stalld::{probe, rt_throttle, scheduler};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.foreground {
        // Must happen before any thread is spawned (logging's worker thread
        // included) and before the pidfile is opened, so the recorded pid
        // is the daemonized child's.
        let ret = unsafe { libc::daemon(0, 0) };
        if ret != 0 {
            eprintln!("stalld: failed to daemonize: {}", std::io::Error::last_os_error());
            return ExitCode::FAILURE;
        }
    }

    logging::init(cli.log_filter());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "stalld exiting");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), StalldError> {
    let config = Arc::new(cli.into_config()?);
    info!(strategy = ?config.strategy, cpus = ?config.cpus, "starting");

    let _pidfile = PidFile::acquire(&config.pidfile)?;

    rt_throttle::ensure_unbounded(None)?;

    let backend: Arc<dyn stalld::boost::sched::SchedBackend> = Arc::new(LinuxSchedBackend);
    let method = probe::select_method(backend.as_ref(), config.force_fixed_priority)?;

    let engine = Arc::new(BoostEngine::new(
        backend,
        ActiveBoosters::new(),
        method,
        config.deadline_runtime_ns,
        config.deadline_period_ns,
        config.fixed_priority,
        std::time::Duration::from_secs(config.boost_duration_secs),
    ));

    let shutdown = Shutdown::new();
    shutdown.install_handlers()?;

    scheduler::run(config, engine, shutdown)?;

    info!("stalld shut down cleanly");
    Ok(())
}
