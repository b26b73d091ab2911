/// Route table and handlers for the read API

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use super::guard;
use super::ratelimit::RateLimiter;
use crate::catalog::ItemCatalog;
use crate::config::{AppConfig, ConfigHandle};
use crate::database::MarketDatabase;
use crate::engine::tier::{is_known_tier, tier_order};
use crate::engine::{DumpFlag, TierGroup};
use crate::poller::PipelineStatus;
use crate::tenants::model::TierRoleSetting;
use crate::tenants::{
    validate, AlertThresholds, ChannelMap, PriceBrackets, RoleMap, TenantError, TenantStore,
};
use crate::upstream::UpstreamClient;
use crate::views::ViewPublisher;

const MAX_BODY_BYTES: u64 = 10 * 1024;

#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<ConfigHandle>,
    /// Source of the process config; reload re-reads this path.
    pub config_path: Option<std::path::PathBuf>,
    pub db: Arc<MarketDatabase>,
    pub views: Arc<ViewPublisher>,
    pub tenants: Arc<TenantStore>,
    pub catalog: Arc<ItemCatalog>,
    pub upstream: Arc<UpstreamClient>,
    pub limiter: Arc<RateLimiter>,
    pub status: Arc<PipelineStatus>,
}

type ApiReply = WithStatus<Json>;

fn ok_json<T: serde::Serialize>(value: &T) -> ApiReply {
    warp::reply::with_status(warp::reply::json(value), StatusCode::OK)
}

fn status_json<T: serde::Serialize>(status: StatusCode, value: &T) -> ApiReply {
    warp::reply::with_status(warp::reply::json(value), status)
}

/// Error bodies stay short and generic; no paths, secrets, or backtraces.
fn error_json(status: StatusCode, message: &str) -> ApiReply {
    status_json(status, &json!({ "error": message }))
}

fn client_ip(addr: &Option<SocketAddr>) -> String {
    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ApiContext {
    fn check_rate(
        &self,
        route: &'static str,
        addr: &Option<SocketAddr>,
        max_per_minute: u32,
    ) -> Option<ApiReply> {
        let decision = self
            .limiter
            .check(route, &client_ip(addr), max_per_minute);
        if decision.allowed {
            None
        } else {
            Some(status_json(
                StatusCode::TOO_MANY_REQUESTS,
                &json!({
                    "error": "rate limit exceeded",
                    "retry_after": decision.retry_after_seconds,
                }),
            ))
        }
    }

    /// Admin gate: private caller address (unless explicitly opened) plus a
    /// constant-time key match. An unset admin key never grants access.
    fn admin_guard(&self, addr: &Option<SocketAddr>, key: &Option<String>) -> Option<ApiReply> {
        let config = self.config.get();
        if !config.admin_allow_public {
            match addr {
                Some(a) if guard::is_private_addr(&a.ip()) => {}
                _ => return Some(error_json(StatusCode::FORBIDDEN, "forbidden")),
            }
        }
        let Some(expected) = &config.admin_key else {
            return Some(error_json(StatusCode::UNAUTHORIZED, "unauthorized"));
        };
        match key {
            Some(candidate) if guard::constant_time_eq(candidate, expected) => None,
            _ => Some(error_json(StatusCode::UNAUTHORIZED, "unauthorized")),
        }
    }

    fn quotas(&self) -> crate::config::RateQuotas {
        self.config.get().rate_quotas.clone()
    }
}

#[derive(Debug)]
struct UnsupportedContentType;
impl warp::reject::Reject for UnsupportedContentType {}

fn require_json() -> impl Filter<Extract = (), Error = Rejection> + Copy {
    warp::header::optional::<String>("content-type")
        .and_then(|ct: Option<String>| async move {
            match ct {
                Some(ct) if ct.to_ascii_lowercase().starts_with("application/json") => Ok(()),
                _ => Err(warp::reject::custom(UnsupportedContentType)),
            }
        })
        .untuple_one()
}

fn with_ctx(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn admin_key_header() -> impl Filter<Extract = (Option<String>,), Error = Rejection> + Copy {
    warp::header::optional::<String>("x-admin-key")
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Copy {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub fn build(ctx: ApiContext) -> BoxedFilter<(impl Reply,)> {
    let top = warp::get()
        .and(warp::path!("api" / "top"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and_then(handle_top)
        .boxed();

    let dumps = warp::get()
        .and(warp::path!("api" / "dumps"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(handle_dumps)
        .boxed();

    let dumps_item = warp::get()
        .and(warp::path!("api" / "dumps" / i64))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and_then(handle_dump_item)
        .boxed();

    let spikes = warp::get()
        .and(warp::path!("api" / "spikes"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and_then(handle_spikes)
        .boxed();

    let all_items = warp::get()
        .and(warp::path!("api" / "all_items"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(handle_all_items)
        .boxed();

    let tiers = warp::get()
        .and(warp::path!("api" / "tiers"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(handle_tiers)
        .boxed();

    let health = warp::get()
        .and(warp::path!("api" / "health"))
        .and(with_ctx(ctx.clone()))
        .and_then(handle_health)
        .boxed();

    let config_get = warp::get()
        .and(warp::path!("api" / "config" / String))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and_then(handle_config_get)
        .boxed();

    let config_post = warp::post()
        .and(warp::path!("api" / "config" / String))
        .and(require_json())
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and(json_body::<ConfigUpdateBody>())
        .and_then(handle_config_post)
        .boxed();

    let config_delete = warp::delete()
        .and(warp::path!("api" / "config" / String))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_config_delete)
        .boxed();

    let watchlist_get = warp::get()
        .and(warp::path!("api" / "watchlist"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(handle_watchlist_get)
        .boxed();

    let watchlist_add = warp::post()
        .and(warp::path!("api" / "watchlist" / "add"))
        .and(require_json())
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(json_body::<WatchlistBody>())
        .and_then(handle_watchlist_add)
        .boxed();

    let watchlist_remove = warp::post()
        .and(warp::path!("api" / "watchlist" / "remove"))
        .and(require_json())
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(json_body::<WatchlistBody>())
        .and_then(handle_watchlist_remove)
        .boxed();

    let admin_backfill = warp::post()
        .and(warp::path!("api" / "admin" / "cache" / "fetch_recent"))
        .and(require_json())
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and(json_body::<BackfillBody>())
        .and_then(handle_admin_backfill)
        .boxed();

    let admin_prune = warp::post()
        .and(warp::path!("api" / "admin" / "db_prune"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_admin_prune)
        .boxed();

    let admin_db_health = warp::get()
        .and(warp::path!("api" / "admin" / "db_health"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_admin_db_health)
        .boxed();

    let admin_ban = warp::post()
        .and(warp::path!("api" / "admin" / "ban" / String))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_admin_ban)
        .boxed();

    let admin_unban = warp::post()
        .and(warp::path!("api" / "admin" / "unban" / String))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_admin_unban)
        .boxed();

    let admin_config_reload = warp::post()
        .and(warp::path!("api" / "admin" / "config_reload"))
        .and(with_ctx(ctx.clone()))
        .and(warp::addr::remote())
        .and(admin_key_header())
        .and_then(handle_admin_config_reload)
        .boxed();

    let cors_origins = ctx.config.get().cors_origins.clone();
    let mut cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "DELETE"])
        .allow_headers(vec!["content-type", "x-admin-key"]);
    if cors_origins.is_empty() {
        cors = cors.allow_any_origin();
    } else {
        for origin in &cors_origins {
            cors = cors.allow_origin(origin.as_str());
        }
    }

    top.or(dumps_item)
        .or(dumps)
        .or(spikes)
        .or(all_items)
        .or(tiers)
        .or(health)
        .or(config_get)
        .or(config_post)
        .or(config_delete)
        .or(watchlist_get)
        .or(watchlist_add)
        .or(watchlist_remove)
        .or(admin_backfill)
        .or(admin_prune)
        .or(admin_db_health)
        .or(admin_ban)
        .or(admin_unban)
        .or(admin_config_reload)
        .recover(handle_rejection)
        .with(cors)
        .boxed()
}

async fn handle_rejection(err: Rejection) -> Result<ApiReply, Infallible> {
    let reply = if err.is_not_found() {
        error_json(StatusCode::NOT_FOUND, "not found")
    } else if err.find::<UnsupportedContentType>().is_some() {
        error_json(StatusCode::BAD_REQUEST, "content-type must be application/json")
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        error_json(StatusCode::BAD_REQUEST, "invalid json body")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_json(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_json(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        error_json(StatusCode::BAD_REQUEST, "invalid query string")
    } else {
        warn!(?err, "unhandled rejection");
        error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    Ok(reply)
}

async fn handle_top(ctx: ApiContext, addr: Option<SocketAddr>) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("top", &addr, ctx.quotas().default_per_minute) {
        return Ok(limited);
    }
    let views = ctx.views.snapshot();
    Ok(ok_json(&json!({
        "generation": views.generation,
        "built_at": views.built_at,
        "items": &views.top_flips,
    })))
}

async fn handle_dumps(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    params: HashMap<String, String>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("dumps", &addr, ctx.quotas().dumps_per_minute) {
        return Ok(limited);
    }

    let tier = params.get("tier").map(|t| t.to_ascii_lowercase());
    if let Some(tier) = &tier {
        if !is_known_tier(tier) {
            return Ok(error_json(StatusCode::BAD_REQUEST, "unknown tier"));
        }
    }

    let group = match params.get("group").map(|g| g.to_ascii_lowercase()) {
        None => None,
        Some(g) if g == "metals" => Some(TierGroup::Metals),
        Some(g) if g == "gems" => Some(TierGroup::Gems),
        Some(_) => return Ok(error_json(StatusCode::BAD_REQUEST, "unknown group")),
    };

    let special = match params.get("special").map(|s| s.to_ascii_lowercase()) {
        None => None,
        Some(s) if s == "slow_buy" => Some(DumpFlag::SlowBuy),
        Some(s) if s == "one_gp_dump" => Some(DumpFlag::OneGpDump),
        Some(s) if s == "super" => Some(DumpFlag::Super),
        Some(_) => return Ok(error_json(StatusCode::BAD_REQUEST, "unknown special flag")),
    };

    let limit = match params.get("limit") {
        None => None,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => return Ok(error_json(StatusCode::BAD_REQUEST, "invalid limit")),
        },
    };

    let guild_filters = match params.get("guild_id") {
        None => None,
        Some(guild_id) => {
            if !validate::is_valid_tenant_id(guild_id) {
                return Ok(error_json(StatusCode::BAD_REQUEST, "invalid tenant id"));
            }
            match ctx.tenants.get(guild_id, false).await {
                Ok(config) => Some(config),
                Err(TenantError::NotFound) => {
                    return Ok(error_json(StatusCode::NOT_FOUND, "unknown tenant"))
                }
                Err(e) => {
                    warn!(error = %e, "tenant read failed during dump filtering");
                    return Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
                }
            }
        }
    };

    let views = ctx.views.snapshot();
    let mut dumps: Vec<_> = views
        .dumps
        .iter()
        .filter(|d| tier.as_deref().map_or(true, |t| d.tier == t))
        .filter(|d| group.map_or(true, |g| d.group == g))
        .filter(|d| special.map_or(true, |flag| d.has_flag(flag)))
        .filter(|d| {
            let Some(config) = &guild_filters else {
                return true;
            };
            let thresholds = &config.alert_thresholds;
            if !thresholds.allows_tier(d.tier) {
                return false;
            }
            if let Some(min_tier) = &config.min_tier_name {
                if let (Some(event_order), Some(min_order)) =
                    (tier_order(d.tier), tier_order(min_tier))
                {
                    if event_order < min_order {
                        return false;
                    }
                }
            }
            d.score >= thresholds.min_score && d.margin_gp >= thresholds.min_margin_gp
        })
        .collect();
    if let Some(limit) = limit {
        dumps.truncate(limit);
    }

    Ok(ok_json(&json!({
        "generation": views.generation,
        "built_at": views.built_at,
        "items": dumps,
    })))
}

async fn handle_dump_item(
    item_id: i64,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("dumps", &addr, ctx.quotas().dumps_per_minute) {
        return Ok(limited);
    }
    let views = ctx.views.snapshot();
    let dump = views.dumps.iter().find(|d| d.item_id == item_id);

    let since = Utc::now().timestamp() - 86_400;
    let history = match ctx.db.range(item_id, since).await {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, item_id, "history read failed");
            return Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
    };

    Ok(ok_json(&json!({
        "item_id": item_id,
        "name": ctx.catalog.name(item_id),
        "dump": dump,
        "history": history,
    })))
}

async fn handle_spikes(ctx: ApiContext, addr: Option<SocketAddr>) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("spikes", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    let views = ctx.views.snapshot();
    Ok(ok_json(&json!({
        "generation": views.generation,
        "built_at": views.built_at,
        "items": &views.spikes,
    })))
}

async fn handle_all_items(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    params: HashMap<String, String>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) =
        ctx.check_rate("all_items", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    // The ingest loop samples the five-minute feed; that is the only
    // window the view is built from.
    let time_window = params
        .get("time_window")
        .map(String::as_str)
        .unwrap_or("5m");
    if time_window != "5m" {
        return Ok(error_json(StatusCode::BAD_REQUEST, "unsupported time window"));
    }

    let views = ctx.views.snapshot();
    Ok(ok_json(&json!({
        "generation": views.generation,
        "built_at": views.built_at,
        "time_window": time_window,
        "items": &views.all_items,
    })))
}

async fn handle_tiers(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    params: HashMap<String, String>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("tiers", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }

    let tiers = match ctx.db.tiers().await {
        Ok(tiers) => tiers,
        Err(e) => {
            warn!(error = %e, "tier table read failed");
            return Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
    };

    let guild = match params.get("guild_id") {
        None => None,
        Some(guild_id) => {
            if !validate::is_valid_tenant_id(guild_id) {
                return Ok(error_json(StatusCode::BAD_REQUEST, "invalid tenant id"));
            }
            match ctx.tenants.get(guild_id, false).await {
                Ok(config) => Some(json!({
                    "min_tier_name": &config.min_tier_name,
                    "tier_roles": &config.tier_roles,
                })),
                Err(TenantError::NotFound) => {
                    return Ok(error_json(StatusCode::NOT_FOUND, "unknown tenant"))
                }
                Err(e) => {
                    warn!(error = %e, "tenant read failed");
                    return Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
                }
            }
        }
    };

    Ok(ok_json(&json!({ "tiers": tiers, "guild": guild })))
}

async fn handle_health(ctx: ApiContext) -> Result<ApiReply, Infallible> {
    let views = ctx.views.snapshot();
    let store = match ctx.db.health().await {
        Ok(health) => serde_json::to_value(health).unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "store health check failed");
            json!({ "is_connected": false })
        }
    };

    Ok(ok_json(&json!({
        "status": "ok",
        "upstream": ctx.status.upstream_state(),
        "consecutive_errors": ctx.status.consecutive_errors(),
        "last_success": ctx.status.last_success(),
        "ticks_completed": ctx.status.ticks_completed(),
        "view_generation": views.generation,
        "view_built_at": views.built_at,
        "catalog_items": ctx.catalog.len(),
        "store": store,
    })))
}

/// Serialize a tenant config for API output with the secret removed.
fn redacted_config(config: &crate::tenants::TenantConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or_default();
    if let Some(map) = value.as_object_mut() {
        map.remove("admin_token");
    }
    value
}

fn tenant_error_reply(err: TenantError) -> ApiReply {
    match err {
        TenantError::InvalidTenantId => error_json(StatusCode::BAD_REQUEST, "invalid tenant id"),
        TenantError::InvalidChannel => error_json(StatusCode::BAD_REQUEST, "invalid channel"),
        TenantError::InvalidRole => error_json(StatusCode::BAD_REQUEST, "invalid role"),
        TenantError::InvalidToken => error_json(StatusCode::BAD_REQUEST, "invalid token"),
        TenantError::InvalidWebhook => error_json(StatusCode::BAD_REQUEST, "invalid webhook"),
        TenantError::InvalidThresholds(_) => {
            error_json(StatusCode::BAD_REQUEST, "invalid thresholds")
        }
        TenantError::PathEscape => error_json(StatusCode::BAD_REQUEST, "invalid tenant id"),
        TenantError::NotFound => error_json(StatusCode::NOT_FOUND, "unknown tenant"),
        TenantError::Io(e) | TenantError::Corrupt(e) | TenantError::Store(e) => {
            warn!(error = %e, "tenant store failure");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn handle_config_get(
    tenant_id: String,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) = ctx.check_rate("config", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    match ctx.tenants.get(&tenant_id, true).await {
        Ok(config) if config.banned => Ok(error_json(StatusCode::FORBIDDEN, "forbidden")),
        Ok(config) => Ok(ok_json(&redacted_config(&config))),
        Err(e) => Ok(tenant_error_reply(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigUpdateBody {
    channels: Option<ChannelMap>,
    roles: Option<RoleMap>,
    price_brackets: Option<PriceBrackets>,
    min_tier_name: Option<String>,
    tier_roles: Option<std::collections::BTreeMap<String, TierRoleSetting>>,
    alert_thresholds: Option<AlertThresholds>,
    enabled: Option<bool>,
}

async fn handle_config_post(
    tenant_id: String,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
    body: ConfigUpdateBody,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    let current = match ctx.tenants.get(&tenant_id, true).await {
        Ok(config) => config,
        Err(e) => return Ok(tenant_error_reply(e)),
    };
    if current.banned {
        return Ok(error_json(StatusCode::FORBIDDEN, "forbidden"));
    }

    let mut updated = (*current).clone();
    if let Some(channels) = body.channels {
        updated.channels = channels;
    }
    if let Some(roles) = body.roles {
        updated.roles = roles;
    }
    if let Some(brackets) = body.price_brackets {
        updated.price_brackets = brackets;
    }
    if let Some(min_tier) = body.min_tier_name {
        updated.min_tier_name = if min_tier.is_empty() {
            None
        } else {
            Some(min_tier)
        };
    }
    if let Some(tier_roles) = body.tier_roles {
        updated.tier_roles = tier_roles;
    }
    if let Some(thresholds) = body.alert_thresholds {
        updated.alert_thresholds = thresholds;
    }
    if let Some(enabled) = body.enabled {
        updated.enabled = enabled;
    }

    match ctx.tenants.put(&tenant_id, updated).await {
        Ok(()) => match ctx.tenants.get(&tenant_id, false).await {
            Ok(config) => Ok(ok_json(&redacted_config(&config))),
            Err(e) => Ok(tenant_error_reply(e)),
        },
        Err(e) => Ok(tenant_error_reply(e)),
    }
}

async fn handle_config_delete(
    tenant_id: String,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    match ctx.tenants.delete(&tenant_id).await {
        Ok(()) => Ok(ok_json(&json!({ "deleted": tenant_id }))),
        Err(e) => Ok(tenant_error_reply(e)),
    }
}

async fn handle_watchlist_get(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    params: HashMap<String, String>,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) =
        ctx.check_rate("watchlist", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    let Some(guild_id) = params.get("guild_id") else {
        return Ok(error_json(StatusCode::BAD_REQUEST, "guild_id is required"));
    };
    if !validate::is_valid_tenant_id(guild_id) {
        return Ok(error_json(StatusCode::BAD_REQUEST, "invalid tenant id"));
    }
    match ctx
        .db
        .watchlist(guild_id, params.get("user_id").map(String::as_str))
        .await
    {
        Ok(entries) => Ok(ok_json(&json!({ "entries": entries }))),
        Err(e) => {
            warn!(error = %e, "watchlist read failed");
            Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct WatchlistBody {
    guild_id: String,
    user_id: Option<String>,
    item_id: i64,
}

async fn handle_watchlist_add(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    body: WatchlistBody,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) =
        ctx.check_rate("watchlist", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    if !validate::is_valid_tenant_id(&body.guild_id) {
        return Ok(error_json(StatusCode::BAD_REQUEST, "invalid tenant id"));
    }
    let Some(meta) = ctx.catalog.get(body.item_id) else {
        return Ok(error_json(StatusCode::NOT_FOUND, "unknown item"));
    };
    match ctx
        .db
        .watchlist_add(&body.guild_id, body.user_id.as_deref(), body.item_id, &meta.name)
        .await
    {
        Ok(added) => Ok(ok_json(&json!({ "added": added, "item_name": meta.name }))),
        Err(e) => {
            warn!(error = %e, "watchlist write failed");
            Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

async fn handle_watchlist_remove(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    body: WatchlistBody,
) -> Result<ApiReply, Infallible> {
    if let Some(limited) =
        ctx.check_rate("watchlist", &addr, ctx.quotas().default_per_minute)
    {
        return Ok(limited);
    }
    if !validate::is_valid_tenant_id(&body.guild_id) {
        return Ok(error_json(StatusCode::BAD_REQUEST, "invalid tenant id"));
    }
    match ctx
        .db
        .watchlist_remove(&body.guild_id, body.user_id.as_deref(), body.item_id)
        .await
    {
        Ok(removed) => Ok(ok_json(&json!({ "removed": removed }))),
        Err(e) => {
            warn!(error = %e, "watchlist write failed");
            Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct BackfillBody {
    hours: Option<i64>,
}

async fn handle_admin_backfill(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
    body: BackfillBody,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    if let Some(limited) = ctx.check_rate("admin", &addr, ctx.quotas().admin_per_minute) {
        return Ok(limited);
    }
    let hours = body.hours.unwrap_or(24);
    if !(1..=24).contains(&hours) {
        return Ok(error_json(StatusCode::BAD_REQUEST, "hours must be within 1..=24"));
    }

    let upstream = ctx.upstream.clone();
    let db = ctx.db.clone();
    tokio::spawn(async move {
        if let Err(e) = crate::poller::backfill_recent(upstream, db, hours).await {
            warn!(error = %e, "backfill task failed");
        }
    });
    info!(hours, "historical backfill scheduled");
    Ok(status_json(
        StatusCode::ACCEPTED,
        &json!({ "status": "scheduled", "hours": hours }),
    ))
}

async fn handle_admin_prune(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    if let Some(limited) = ctx.check_rate("admin", &addr, ctx.quotas().admin_per_minute) {
        return Ok(limited);
    }
    match ctx.db.prune(ctx.config.get().retention_seconds()).await {
        Ok(removed) => Ok(ok_json(&json!({ "rows_removed": removed }))),
        Err(e) => {
            warn!(error = %e, "manual prune failed");
            Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

async fn handle_admin_db_health(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    match ctx.db.health().await {
        Ok(health) => Ok(ok_json(&health)),
        Err(e) => {
            warn!(error = %e, "db health check failed");
            Ok(error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

async fn handle_admin_ban(
    tenant_id: String,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    match ctx.tenants.ban(&tenant_id).await {
        Ok(()) => Ok(ok_json(&json!({ "banned": tenant_id }))),
        Err(e) => Ok(tenant_error_reply(e)),
    }
}

async fn handle_admin_unban(
    tenant_id: String,
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    match ctx.tenants.unban(&tenant_id).await {
        Ok(()) => Ok(ok_json(&json!({ "unbanned": tenant_id }))),
        Err(e) => Ok(tenant_error_reply(e)),
    }
}

/// Re-read the process config file and swap the shared handle. Values that
/// loops captured at startup (periods, bind address) keep their old values
/// until restart; quotas, keys, and origins take effect immediately.
async fn handle_admin_config_reload(
    ctx: ApiContext,
    addr: Option<SocketAddr>,
    admin_key: Option<String>,
) -> Result<ApiReply, Infallible> {
    if let Some(denied) = ctx.admin_guard(&addr, &admin_key) {
        return Ok(denied);
    }
    match AppConfig::load(ctx.config_path.as_deref()) {
        Ok(config) => {
            ctx.config.replace(config);
            info!("process configuration reloaded");
            Ok(ok_json(&json!({ "reloaded": true })))
        }
        Err(e) => {
            warn!(error = %e, "config reload rejected");
            Ok(error_json(StatusCode::BAD_REQUEST, "config reload failed"))
        }
    }
}
