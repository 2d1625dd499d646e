use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;

use chat_vm::api::{self, AppState};
use chat_vm::auth::AuthService;
use chat_vm::blob::{BlobStore, SqliteBlobStore};
use chat_vm::chat::ChatService;
use chat_vm::config::Config;
use chat_vm::events::ChangeFeed;
use chat_vm::store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize store
    let store = match Store::new(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Failed to initialize database {}: {}", config.database_path, e);
            std::process::exit(1);
        }
    };
    log::info!("Database: {}", config.database_path);

    let auth_service = Arc::new(AuthService::new(
        config.jwt_secret.clone(),
        config.token_ttl_days,
        store.clone(),
    ));
    let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(store.clone(), config.blob_config()));
    let chat = Arc::new(ChatService::new(
        store.clone(),
        blobs.clone(),
        ChangeFeed::default(),
        config.message_page_size,
    ));

    let max_upload_bytes = config.max_upload_bytes;
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // AuthService is registered on its own for the AuthUser extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(AppState {
                chat: chat.clone(),
                auth_service: auth_service.clone(),
                blobs: blobs.clone(),
            }))
            // One byte over the limit so the blob store reports TooLarge
            .app_data(web::PayloadConfig::new(max_upload_bytes + 1))
            .configure(api::configure_routes)
    });

    log::info!("Starting chat-vm server on {}:{}", config.bind_addr, config.port);
    server.bind((config.bind_addr.as_str(), config.port))?.run().await
}
