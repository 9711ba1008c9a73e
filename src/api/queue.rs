use actix_web::{HttpResponse, Responder, get, post, web};
use log::info;
use uuid::Uuid;

use super::models::{
    AppState, CancelResponse, ClearResponse, EntryView, SubmitRequest, SubmitResponse,
};
use crate::queue::Entry;

/// Entry being mined (if any) followed by the entries still waiting.
#[get("/queue/")]
pub async fn get_queue(state: web::Data<AppState>) -> impl Responder {
    let entries: Vec<EntryView> = state
        .queue
        .snapshot()
        .iter()
        .map(|e| EntryView::from(e.as_ref()))
        .collect();
    HttpResponse::Ok().json(entries)
}

/// Entry being mined, with its live hash rate, or `null`.
#[get("/queue/processing/")]
pub async fn get_processing(state: web::Data<AppState>) -> impl Responder {
    let processing = state.queue.processing();
    HttpResponse::Ok().json(processing.as_deref().map(EntryView::from))
}

/// Submit a note for mining at the configured difficulty.
#[post("/queue/")]
pub async fn submit(state: web::Data<AppState>, req: web::Json<SubmitRequest>) -> impl Responder {
    let SubmitRequest { data, comment } = req.into_inner();
    let entry = state
        .queue
        .submit(Entry::new(data.into_bytes(), comment, state.difficulty));
    info!("accepted note {} ({} bytes)", entry.id(), entry.data().len());

    HttpResponse::Ok().json(SubmitResponse {
        id: entry.id(),
        difficulty: entry.difficulty(),
    })
}

/// Cancel a queued or in-progress note. Unknown ids are not an error.
#[post("/queue/{id}/cancel/")]
pub async fn cancel(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let cancelled = state.queue.cancel(path.into_inner());
    HttpResponse::Ok().json(CancelResponse { cancelled })
}

/// Cancel every note that has not started mining.
#[post("/queue/clear/")]
pub async fn clear(state: web::Data<AppState>) -> impl Responder {
    let cleared = state.queue.clear();
    HttpResponse::Ok().json(ClearResponse { cleared })
}
