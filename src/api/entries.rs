use actix_web::{HttpResponse, Responder, get, web};
use log::debug;
use uuid::Uuid;

use super::models::{AppState, BlockView, ChainResponse, SearchQuery};
use crate::blockchain::{Block, Chain};

fn view(chain: &Chain, block: &Block) -> BlockView {
    // Look up the position rather than trusting the stored height.
    let verified = chain
        .blocks()
        .iter()
        .position(|b| std::ptr::eq(b, block))
        .is_some_and(|index| chain.is_block_verified(index));
    BlockView::new(block, verified)
}

/// Get the whole ledger, newest block first.
#[get("/entries/")]
pub async fn get_all(state: web::Data<AppState>) -> impl Responder {
    let chain = state.queue.chain();
    let verification: Vec<bool> = chain.verification().collect();
    let blocks: Vec<BlockView> = chain
        .blocks()
        .iter()
        .zip(verification)
        .rev()
        .map(|(block, verified)| BlockView::new(block, verified))
        .collect();

    HttpResponse::Ok().json(ChainResponse {
        title: chain.title().to_string(),
        length: chain.len(),
        verified: blocks.iter().all(|b| b.verified),
        blocks,
    })
}

#[get("/entries/id/{id}/")]
pub async fn get_by_id(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let id = path.into_inner();
    let chain = state.queue.chain();
    match chain.by_id(&id) {
        Some(block) => HttpResponse::Ok().json(view(&chain, block)),
        None => HttpResponse::NotFound().body(format!("no block with id {id}")),
    }
}

#[get("/entries/height/{height}/")]
pub async fn get_by_height(state: web::Data<AppState>, path: web::Path<u32>) -> impl Responder {
    let height = path.into_inner();
    let chain = state.queue.chain();
    match chain.by_height(height) {
        Some(block) => HttpResponse::Ok().json(view(&chain, block)),
        None => HttpResponse::NotFound().body(format!("no block at height {height}")),
    }
}

/// Blocks whose comment contains the query, case-insensitively, newest first.
#[get("/entries/search/")]
pub async fn search(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> impl Responder {
    let chain = state.queue.chain();
    let hits: Vec<BlockView> = chain
        .search(&query.query)
        .into_iter()
        .map(|b| view(&chain, b))
        .collect();
    debug!("search '{}' matched {} block(s)", query.query.trim(), hits.len());
    HttpResponse::Ok().json(hits)
}
