use std::path::Path;
use std::process;

use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use transcribe_api::config_loader::load_config;
use transcribe_api::config_validator::ConfigValidator;
use transcribe_api::file_utils::sweep_stale_artifacts;
use transcribe_api::metrics::{create_metrics_exporter, create_null_exporter};
use transcribe_api::{
    configure, load_engine, AuthConfig, Authentication, EngineConfig, Metrics, MetricsConfig,
    Pipeline, PipelineConfig, ServerConfig,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--sample-config") {
        print!("{}", ConfigValidator::generate_sample_config());
        return Ok(());
    }

    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if load_config() {
        info!("Configuration file loaded");
    }
    if ConfigValidator::validate_critical().is_err() {
        error!("Critical configuration errors found, refusing to start");
        process::exit(1);
    }
    ConfigValidator::validate_all();

    // Load configurations
    let server_config = ServerConfig::default();
    let engine_config = EngineConfig::default();
    let pipeline_config = PipelineConfig::default();
    let auth_config = AuthConfig::from_env();
    let metrics_config = MetricsConfig::default();

    // Initialize metrics
    let metrics_exporter = create_metrics_exporter(&metrics_config).unwrap_or_else(|e| {
        warn!("Failed to initialize metrics exporter, metrics disabled: {}", e);
        create_null_exporter()
    });
    let metrics = Metrics::new(metrics_exporter);

    if let Err(e) = pipeline_config.ensure_scratch_dir() {
        warn!(
            "Failed to create scratch directory {}: {}",
            pipeline_config.scratch_dir, e
        );
    }
    match sweep_stale_artifacts(Path::new(&pipeline_config.scratch_dir)) {
        Ok(0) => {}
        Ok(n) => warn!("Removed {} stale job file(s) from a previous run", n),
        Err(e) => warn!("Failed to sweep scratch directory: {}", e),
    }

    // The engine is loaded once and shared by every worker
    let engine = match load_engine(&engine_config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to load transcription engine: {}", e);
            process::exit(1);
        }
    };

    let pipeline = web::Data::new(Pipeline::new(&pipeline_config, engine, metrics.clone())?);

    let bind_address = format!("{}:{}", server_config.host, server_config.port);
    info!("Starting Transcribe API server on http://{}", bind_address);
    info!("Using scratch directory: {}", pipeline_config.scratch_dir);
    info!("Transcoder command: {}", pipeline_config.ffmpeg_command);
    info!("Metrics exporter: {}", metrics_config.exporter_type);

    let workers = server_config.effective_workers();
    let max_body_size = server_config.max_body_size;
    let client_timeout = server_config.client_timeout;
    let keep_alive = server_config.keep_alive;
    let server_data = web::Data::new(server_config);
    let metrics_data = web::Data::new(metrics);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Authentication::new(auth_config.clone()))
            .app_data(web::PayloadConfig::new(max_body_size))
            .app_data(pipeline.clone())
            .app_data(server_data.clone())
            .app_data(metrics_data.clone())
            .configure(configure)
    })
    .workers(workers)
    .bind(bind_address)?
    .client_disconnect_timeout(client_timeout)
    .keep_alive(keep_alive)
    .run()
    .await
}
