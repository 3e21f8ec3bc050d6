/*
 * REST API for the AqyntSwap client core
 */

use ethers::types::Address;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use crate::config::Config;
use crate::models::{
    AddLiquidityRequest, AddLiquidityView, AqyntError, ApproveRequest, BalanceResponse, PoolsResponse,
    QuoteResponse, RemoveLiquidityRequest, RemoveLiquidityView, SwapRequest, TxReport,
};
use crate::service::DexService;
use crate::tokens::Token;
use crate::utils::parse_address;

/// The remove form opens on the whole position.
const REMOVE_DEFAULT_PERCENTAGE: u32 = 100;

type ApiResult<T> = std::result::Result<Json<T>, Custom<String>>;

pub struct ApiState {
    pub config: Config,
    pub service: Arc<DexService>,
}

#[derive(Debug, Serialize)]
pub struct CustomTokenResponse {
    pub token: Token,
    pub added: bool,
}

fn status_for(e: &AqyntError) -> Status {
    match e {
        _ if e.is_validation() => Status::UnprocessableEntity,
        AqyntError::InvalidTransition(_) => Status::Conflict,
        AqyntError::ConfigError(_)
        | AqyntError::StorageError(_)
        | AqyntError::SerializationError(_)
        | AqyntError::Io(_)
        | AqyntError::CalculationError(_) => Status::InternalServerError,
        _ => Status::BadGateway,
    }
}

fn failure(e: AqyntError) -> Custom<String> {
    let status = status_for(&e);
    if status.code >= 500 {
        error!("Request failed: {e:?}");
    }
    Custom(status, e.short_message())
}

fn parse_owner(owner: Option<&str>) -> std::result::Result<Option<Address>, Custom<String>> {
    match owner.map(str::trim).filter(|o| !o.is_empty()) {
        Some(raw) => parse_address(raw)
            .map(Some)
            .ok_or_else(|| Custom(Status::UnprocessableEntity, format!("{raw} is not an address"))),
        None => Ok(None),
    }
}

#[get("/health")]
pub async fn health_check() -> &'static str {
    "OK"
}

#[get("/metrics")]
pub async fn metrics(state: &State<ApiState>) -> String {
    state.service.metrics().render()
}

#[get("/api/v1/tokens?<query>")]
pub async fn list_tokens(query: Option<String>, state: &State<ApiState>) -> Json<Vec<Token>> {
    Json(state.service.tokens(query.as_deref()).await)
}

#[post("/api/v1/tokens/<address>")]
pub async fn add_token(address: String, state: &State<ApiState>) -> ApiResult<CustomTokenResponse> {
    let (token, added) = state.service.add_custom_token(&address).await.map_err(failure)?;
    Ok(Json(CustomTokenResponse { token, added }))
}

#[get("/api/v1/balance?<token>&<owner>")]
pub async fn get_balance(token: String, owner: Option<String>, state: &State<ApiState>) -> ApiResult<BalanceResponse> {
    let balance = state
        .service
        .balance(&token, owner.as_deref())
        .await
        .map_err(failure)?;
    Ok(Json(balance))
}

#[get("/api/v1/quote?<amount_in>&<token_in>&<token_out>")]
pub async fn get_quote(
    amount_in: String,
    token_in: String,
    token_out: String,
    state: &State<ApiState>,
) -> ApiResult<QuoteResponse> {
    let quote = state
        .service
        .quote(&amount_in, &token_in, &token_out)
        .await
        .map_err(failure)?;
    Ok(Json(quote))
}

/// With `owner` this is the "your pools" tab, otherwise "all pools".
/// `refresh=true` drops cached pool reads first.
#[get("/api/v1/pools?<owner>&<refresh>")]
pub async fn get_pools(owner: Option<String>, refresh: Option<bool>, state: &State<ApiState>) -> ApiResult<PoolsResponse> {
    if refresh.unwrap_or(false) {
        state.service.refresh_pools();
    }
    let pools = match parse_owner(owner.as_deref())? {
        Some(owner) => state.service.user_pools(owner).await,
        None => state.service.all_pools().await,
    };
    Ok(Json(pools.map_err(failure)?))
}

#[get("/api/v1/add?<token0>&<token1>&<owner>")]
pub async fn add_liquidity_view(
    token0: Option<String>,
    token1: Option<String>,
    owner: Option<String>,
    state: &State<ApiState>,
) -> ApiResult<AddLiquidityView> {
    let owner = parse_owner(owner.as_deref())?;
    let view = state
        .service
        .add_liquidity_view(token0.as_deref(), token1.as_deref(), owner)
        .await
        .map_err(failure)?;
    Ok(Json(view))
}

#[get("/api/v1/remove?<pair>&<owner>&<percentage>")]
pub async fn remove_liquidity_view(
    pair: String,
    owner: Option<String>,
    percentage: Option<u32>,
    state: &State<ApiState>,
) -> ApiResult<RemoveLiquidityView> {
    let owner = parse_owner(owner.as_deref())?;
    let view = state
        .service
        .remove_view(&pair, owner, percentage.unwrap_or(REMOVE_DEFAULT_PERCENTAGE))
        .await
        .map_err(failure)?;
    Ok(Json(view))
}

#[post("/api/v1/approve", data = "<request>")]
pub async fn approve(request: Json<ApproveRequest>, state: &State<ApiState>) -> ApiResult<TxReport> {
    Ok(Json(state.service.approve(&request).await.map_err(failure)?))
}

#[post("/api/v1/swap", data = "<request>")]
pub async fn swap(request: Json<SwapRequest>, state: &State<ApiState>) -> ApiResult<TxReport> {
    Ok(Json(state.service.swap(&request).await.map_err(failure)?))
}

#[post("/api/v1/liquidity/add", data = "<request>")]
pub async fn add_liquidity(request: Json<AddLiquidityRequest>, state: &State<ApiState>) -> ApiResult<TxReport> {
    Ok(Json(state.service.add_liquidity(&request).await.map_err(failure)?))
}

#[post("/api/v1/liquidity/remove", data = "<request>")]
pub async fn remove_liquidity(request: Json<RemoveLiquidityRequest>, state: &State<ApiState>) -> ApiResult<TxReport> {
    Ok(Json(state.service.remove_liquidity(&request).await.map_err(failure)?))
}

#[must_use]
pub fn create_rocket(state: ApiState) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", state.config.server.host.clone()))
        .merge(("port", state.config.server.port));

    rocket::custom(figment).manage(state).mount(
        "/",
        routes![
            health_check,
            metrics,
            list_tokens,
            add_token,
            get_balance,
            get_quote,
            get_pools,
            add_liquidity_view,
            remove_liquidity_view,
            approve,
            swap,
            add_liquidity,
            remove_liquidity,
        ],
    )
}
