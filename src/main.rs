use actix_web::{middleware::from_fn, web, App, HttpServer};
use bleepstore::app_state::AppState;
use bleepstore::config::AppConfig;
use bleepstore::deletion_worker;
use bleepstore::reaper;
use bleepstore::s3::middleware::common_headers;
use bleepstore::s3::router;
use log::info;

/// Maximum request body size: 5 GiB, large enough for any single PUT or
/// multipart part this server accepts.
const MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024 * 1024;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    if std::path::Path::new(&config.logging.config_file).exists() {
        log4rs::init_file(&config.logging.config_file, Default::default())
            .unwrap_or_else(|e| panic!("failed to load {}: {e}", config.logging.config_file));
    } else {
        env_logger::init();
    }

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::from_config(config).expect("failed to initialize application state");

    info!("starting BleepStore on {bind_addr}");
    reaper::start(state.clone());
    deletion_worker::start(state.clone());

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::default().limit(MAX_PAYLOAD_BYTES))
            .wrap(from_fn(common_headers))
            .configure(router::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
