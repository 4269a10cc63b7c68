//! Client-facing JSON API over HTTP.
//!
//! | Route                   | Chain operation            |
//! |-------------------------|----------------------------|
//! | `POST /transaction`     | `add_transaction`          |
//! | `POST /mine`            | `mine_pending_transactions`|
//! | `GET /chain`            | `blocks`                   |
//! | `GET /balance?addr=`    | `balance`                  |
//! | `GET /nonce?addr=`      | `next_nonce`               |
//!
//! Failures are `{"error": "..."}` with a 4xx status.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use quarry_chain::{Chain, ChainError};
use quarry_p2p::Broadcaster;
use quarry_types::{Address, Transaction};

/// Largest request body accepted.
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Everything a handler needs: the chain and, when P2P is running, a way to
/// announce new transactions and blocks.
#[derive(Clone)]
pub struct ApiState {
    pub chain: Arc<Chain>,
    pub broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl ApiState {
    pub fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }
}

#[derive(Deserialize)]
struct MineRequest {
    miner: String,
}

fn reply(body: serde_json::Value, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn ok(body: serde_json::Value) -> WithStatus<Json> {
    reply(body, StatusCode::OK)
}

fn error(status: StatusCode, message: impl ToString) -> WithStatus<Json> {
    reply(json!({ "error": message.to_string() }), status)
}

fn chain_error(err: ChainError) -> WithStatus<Json> {
    debug!(%err, "request rejected");
    error(StatusCode::BAD_REQUEST, err)
}

/// Run `f` against the chain on the blocking pool; chain locks are never
/// taken on the executor.
async fn on_chain<T, F>(state: &ApiState, f: F) -> Result<T, WithStatus<Json>>
where
    F: FnOnce(&Chain) -> T + Send + 'static,
    T: Send + 'static,
{
    let chain = Arc::clone(&state.chain);
    tokio::task::spawn_blocking(move || f(&chain))
        .await
        .map_err(|err| error(StatusCode::INTERNAL_SERVER_ERROR, err))
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body() -> impl Filter<Extract = (warp::hyper::body::Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::bytes())
}

fn query_address(query: &HashMap<String, String>) -> Result<Address, WithStatus<Json>> {
    let raw = query
        .get("addr")
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing addr"))?;
    raw.parse::<Address>()
        .map_err(|e| error(StatusCode::BAD_REQUEST, format!("invalid addr: {e}")))
}

async fn submit_transaction(body: warp::hyper::body::Bytes, state: ApiState) -> WithStatus<Json> {
    let tx: Transaction = match serde_json::from_slice(&body) {
        Ok(tx) => tx,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid transaction json: {e}")),
    };

    let admitted = tx.clone();
    let id = match on_chain(&state, move |chain| chain.add_transaction(admitted)).await {
        Ok(Ok(id)) => id,
        Ok(Err(err)) => return chain_error(err),
        Err(reply) => return reply,
    };

    if let Some(broadcaster) = &state.broadcaster {
        broadcaster.broadcast_tx(&tx);
    }
    ok(json!({ "ok": true, "id": hex::encode(id) }))
}

async fn mine_block(body: warp::hyper::body::Bytes, state: ApiState) -> WithStatus<Json> {
    let req: MineRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid mine request: {e}")),
    };

    let block = match on_chain(&state, move |chain| chain.mine_pending_transactions(&req.miner))
        .await
    {
        Ok(Ok(block)) => block,
        Ok(Err(err)) => return chain_error(err),
        Err(reply) => return reply,
    };

    if let Some(broadcaster) = &state.broadcaster {
        broadcaster.broadcast_block(&block);
    }
    match serde_json::to_value(&block) {
        Ok(value) => ok(value),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

async fn list_chain(state: ApiState) -> WithStatus<Json> {
    let value = on_chain(&state, |chain| serde_json::to_value(chain.blocks())).await;
    match value {
        Ok(Ok(value)) => ok(value),
        Ok(Err(err)) => error(StatusCode::INTERNAL_SERVER_ERROR, err),
        Err(reply) => reply,
    }
}

async fn query_balance(query: HashMap<String, String>, state: ApiState) -> WithStatus<Json> {
    let addr = match query_address(&query) {
        Ok(addr) => addr,
        Err(reply) => return reply,
    };
    match on_chain(&state, move |chain| chain.balance(&addr)).await {
        Ok(balance) => ok(json!({ "address": addr, "balance": balance })),
        Err(reply) => reply,
    }
}

async fn query_nonce(query: HashMap<String, String>, state: ApiState) -> WithStatus<Json> {
    let addr = match query_address(&query) {
        Ok(addr) => addr,
        Err(reply) => return reply,
    };
    match on_chain(&state, move |chain| chain.next_nonce(&addr)).await {
        Ok(nonce) => ok(json!({ "address": addr, "nonce": nonce })),
        Err(reply) => reply,
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let reply = if rejection.is_not_found() {
        error(StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    } else {
        warn!(?rejection, "unhandled rejection");
        error(StatusCode::BAD_REQUEST, "bad request")
    };
    Ok(reply)
}

/// All routes, with rejections rendered as JSON errors.
pub fn routes(state: ApiState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let transaction_route = warp::post()
        .and(warp::path("transaction"))
        .and(warp::path::end())
        .and(json_body())
        .and(with_state(state.clone()))
        .then(submit_transaction);

    let mine_route = warp::post()
        .and(warp::path("mine"))
        .and(warp::path::end())
        .and(json_body())
        .and(with_state(state.clone()))
        .then(mine_block);

    let chain_route = warp::get()
        .and(warp::path("chain"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .then(list_chain);

    let balance_route = warp::get()
        .and(warp::path("balance"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state.clone()))
        .then(query_balance);

    let nonce_route = warp::get()
        .and(warp::path("nonce"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state))
        .then(query_nonce);

    transaction_route
        .or(mine_route)
        .or(chain_route)
        .or(balance_route)
        .or(nonce_route)
        .recover(handle_rejection)
}

/// Bind the API on `addr`. The returned future serves requests until it is
/// dropped; the address is the one actually bound.
pub fn bind(
    addr: SocketAddr,
    state: ApiState,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), warp::Error> {
    let (bound, server) = warp::serve(routes(state)).try_bind_ephemeral(addr)?;
    info!(addr = %bound, "http api listening");
    Ok((bound, server))
}
