use datafile_collector::http::{build_client, DataRouterClient};
use datafile_collector::protocols::ProtocolClientFactory;
use datafile_collector::shutdown::{install_signal_handlers, signal_name};
use datafile_collector::source::MessageRouterSource;
use datafile_collector::{
    is_shutdown_requested, log, log_at, parse_args, parse_config, set_log_file, Collaborators,
    Level, Pipeline, PipelineSettings, PROGRAM_NAME, PROGRAM_VERSION,
};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sleeps in short slices so a shutdown request is noticed promptly
fn sleep_unless_shutdown(total: Duration) {
    let deadline = Instant::now() + total;
    while !is_shutdown_requested() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(200)));
    }
}

fn fail(message: String) -> ! {
    log_at(Level::Error, &message);
    eprintln!("{}", message);
    process::exit(1);
}

fn main() {
    let options = parse_args();
    if let Some(log_file) = &options.log_file {
        set_log_file(log_file);
    }
    log(&format!("{} v{} started", PROGRAM_NAME, PROGRAM_VERSION));

    let mut config = parse_config(Path::new(&options.config_file))
        .unwrap_or_else(|e| fail(format!("Error loading config: {}", e)));
    if let Err(e) = std::fs::create_dir_all(&config.scratch_dir) {
        fail(format!(
            "Cannot create scratch directory {}: {}",
            config.scratch_dir.display(),
            e
        ));
    }
    if let Err(e) = install_signal_handlers() {
        fail(format!("Error setting signal handlers: {}", e));
    }

    let timeout = config.connect_timeout();
    let transfer_clients = ProtocolClientFactory::new(&config.ftpes, &config.sftp, timeout)
        .unwrap_or_else(|e| fail(format!("Error loading TLS material: {}", e)));
    let http = build_client(timeout)
        .unwrap_or_else(|e| fail(format!("Error building HTTP client: {}", e)));
    let poll_client = build_client(MessageRouterSource::request_timeout(
        &config.message_router,
        timeout,
    ))
    .unwrap_or_else(|e| fail(format!("Error building HTTP client: {}", e)));
    let source = MessageRouterSource::new(poll_client, &config.message_router)
        .unwrap_or_else(|e| fail(format!("Error in message router URL: {}", e)));
    let data_router = Arc::new(DataRouterClient::new(http));

    let settings = PipelineSettings::from_config(&config);
    let collaborators = Collaborators {
        source: Box::new(source),
        feeds: Arc::new(config.take_feeds()),
        published_checker: data_router.clone(),
        transfer_clients: Arc::new(transfer_clients),
        publish_client: data_router,
    };
    let pipeline = Arc::new(
        Pipeline::new(settings, collaborators)
            .unwrap_or_else(|e| fail(format!("Error starting worker pool: {}", e))),
    );

    {
        let pipeline = Arc::clone(&pipeline);
        let interval = config.purge_interval();
        let spawned = thread::Builder::new()
            .name("purge".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                pipeline.purge(Instant::now());
            });
        if let Err(e) = spawned {
            fail(format!("Error starting purge timer: {}", e));
        }
    }

    if options.run_once {
        pipeline.run_cycle();
        while !pipeline.wait_idle(Duration::from_secs(60)) {
            log(&format!("Waiting for {} files in flight", pipeline.in_flight()));
        }
        log(&format!("Single cycle done: {}", pipeline.counters()));
        return;
    }

    while !is_shutdown_requested() {
        pipeline.run_cycle();
        log(&format!(
            "in_flight={} cache={} {}",
            pipeline.in_flight(),
            pipeline.cache_size(),
            pipeline.counters()
        ));
        sleep_unless_shutdown(config.cycle_interval());
    }

    log(&format!(
        "{} received, waiting up to {}s for {} files in flight",
        signal_name().unwrap_or("Shutdown request"),
        config.grace_secs,
        pipeline.in_flight()
    ));
    if !pipeline.wait_idle(Duration::from_secs(config.grace_secs)) {
        log_at(
            Level::Warn,
            &format!("Exiting with {} files still in flight", pipeline.in_flight()),
        );
    }
    log(&format!("Final counters: {}", pipeline.counters()));
}
