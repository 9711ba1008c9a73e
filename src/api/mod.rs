mod entries;
mod health;
pub mod models;
mod queue;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(entries::get_all)
            .service(entries::get_by_id)
            .service(entries::get_by_height)
            .service(entries::search)
            .service(queue::get_queue)
            .service(queue::get_processing)
            .service(queue::submit)
            .service(queue::clear)
            .service(queue::cancel),
    );
}
