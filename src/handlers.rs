// =============================================================================
// DATAGO — HTTP handler layer
// =============================================================================
// Marshals query strings and JSON bodies into calls on the core components
// and emits ApiEnvelope responses with rate-limit and cache headers. Numeric
// query parameters are parsed by hand so malformed input surfaces as an
// envelope-grade VALIDATION_ERROR instead of a framework rejection.
// =============================================================================

use crate::cache::CacheType;
use crate::coord::{normalize_point, Point, PointRepr, SystemCode};
use crate::envelope::ApiEnvelope;
use crate::error::GatewayError;
use crate::ratelimit::{RateLimitDecision, Tier};
use crate::state::AppState;
use crate::upstream::cache_key;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{instrument, warn};

const MAX_BATCH_POINTS: usize = 100;
const ADDRESS_SEARCH_ENDPOINT: &str = "/1611000/addrlink/addrLinkApi";
/// Coordinates the address portal returns for building entrances.
const ADDRESS_POINT_SYSTEM: SystemCode = SystemCode::Grs80Central;

// Health "degraded" thresholds are policy numbers, not invariants.
const HEALTH_MEMORY_PCT: f64 = 90.0;
const HEALTH_BLOCK_RATE_PCT: f64 = 50.0;
const HEALTH_SUCCESS_RATE_PCT: f64 = 70.0;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/coordinate/transform", get(transform_get).post(transform_post))
        .route("/api/address", get(address_search))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
}

// -----------------------------------------------------------------------------
// Shared response plumbing
// -----------------------------------------------------------------------------

/// X-Forwarded-For first hop when present, else the socket peer. A stable,
/// non-secret identifier for inbound admission.
fn client_identifier(headers: &HeaderMap, peer: Option<&SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", header_num(decision.limit));
    headers.insert("X-RateLimit-Remaining", header_num(decision.remaining));
    headers.insert("X-RateLimit-Reset", header_num(decision.reset));
    if let Some(retry) = decision.retry_after {
        headers.insert("Retry-After", header_num(retry));
    }
    headers
}

fn header_num(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).expect("numeric header value")
}

fn cacheable_header(ty: CacheType) -> HeaderValue {
    HeaderValue::from_str(&format!("public, max-age={}", ty.ttl().as_secs()))
        .expect("cache-control value")
}

fn error_response(
    state: &AppState,
    err: &GatewayError,
    decision: Option<&RateLimitDecision>,
) -> Response {
    let mut headers = decision.map(rate_limit_headers).unwrap_or_default();
    if !headers.contains_key("Retry-After") {
        if let GatewayError::RateLimit { retry_after_secs, .. } = err {
            headers.insert("Retry-After", header_num(*retry_after_secs));
        }
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let envelope = ApiEnvelope::<Value>::failure(err, state.config.production);
    (err.status(), headers, Json(envelope)).into_response()
}

fn admission_denied(state: &AppState, decision: &RateLimitDecision, identifier: &str) -> Response {
    warn!(identifier = %identifier, "request_rate_limited");
    let err = GatewayError::RateLimit {
        message: "rate limit exceeded, slow down".to_string(),
        limit: decision.limit,
        retry_after_secs: decision.retry_after.unwrap_or(1),
    };
    error_response(state, &err, Some(decision))
}

// -----------------------------------------------------------------------------
// Query parsing (string-typed so bad input becomes VALIDATION_ERROR)
// -----------------------------------------------------------------------------

fn parse_system(raw: Option<&str>, field: &str) -> Result<SystemCode, GatewayError> {
    let raw = raw.ok_or_else(|| GatewayError::validation(format!("'{}' is required", field)))?;
    SystemCode::from_str(raw).map_err(|_| {
        GatewayError::validation_with(
            format!("'{}' is not a supported coordinate system", raw),
            serde_json::json!({
                "field": field,
                "supported": SystemCode::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            }),
        )
    })
}

fn parse_number(raw: Option<&str>, field: &str) -> Result<f64, GatewayError> {
    let raw = raw.ok_or_else(|| GatewayError::validation(format!("'{}' is required", field)))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| GatewayError::validation(format!("'{}' must be a number, got '{}'", field, raw)))?;
    if !value.is_finite() {
        return Err(GatewayError::validation(format!("'{}' must be finite", field)));
    }
    Ok(value)
}

// -----------------------------------------------------------------------------
// GET /api/coordinate/transform — anonymous tier, cached by parameter tuple
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TransformGetQuery {
    from: Option<String>,
    to: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransformData {
    from: SystemCode,
    to: SystemCode,
    original: Point,
    transformed: Point,
    accuracy: &'static str,
}

#[instrument(skip_all)]
async fn transform_get(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<TransformGetQuery>,
) -> Response {
    let started = Instant::now();
    let identifier = client_identifier(&headers, peer.as_ref().map(|c| &c.0));
    let decision = state.limiter.check_limit(&identifier, Tier::Anonymous);
    if !decision.allowed {
        return admission_denied(&state, &decision, &identifier);
    }

    let parsed = (|| {
        let from = parse_system(query.from.as_deref(), "from")?;
        let to = match query.to.as_deref() {
            Some(raw) => parse_system(Some(raw), "to")?,
            None => SystemCode::Wgs84,
        };
        let x = parse_number(query.x.as_deref(), "x")?;
        let y = parse_number(query.y.as_deref(), "y")?;
        Ok::<_, GatewayError>((from, to, x, y))
    })();
    let (from, to, x, y) = match parsed {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };

    let key = format!("{}:{}:{}:{}", from, to, x, y);
    let lookup = state.cache.get(CacheType::Coordinate, &key);
    if lookup.hit {
        if let Ok(mut envelope) =
            serde_json::from_value::<ApiEnvelope<Value>>(lookup.value.expect("hit carries value"))
        {
            envelope.metadata.cached = Some(true);
            let mut response_headers = rate_limit_headers(&decision);
            response_headers
                .insert(header::CACHE_CONTROL, cacheable_header(CacheType::Coordinate));
            return (StatusCode::OK, response_headers, Json(envelope)).into_response();
        }
        // A corrupt entry falls through to a fresh transform.
        state.cache.delete(CacheType::Coordinate, &key);
    }

    let report = match state.engine.transform_with_metadata(Point::new(x, y), from, to) {
        Ok(report) => report,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };
    let data = TransformData {
        from,
        to,
        original: report.input.point,
        transformed: report.output.point,
        accuracy: report.accuracy,
    };
    let envelope = ApiEnvelope::success(serde_json::to_value(&data).expect("transform data"))
        .with_cached(false)
        .with_processing_time(started.elapsed().as_millis() as u64);
    if let Ok(stored) = serde_json::to_value(&envelope) {
        state.cache.set(CacheType::Coordinate, &key, stored, None);
    }

    let mut response_headers = rate_limit_headers(&decision);
    response_headers.insert(header::CACHE_CONTROL, cacheable_header(CacheType::Coordinate));
    (StatusCode::OK, response_headers, Json(envelope)).into_response()
}

// -----------------------------------------------------------------------------
// POST /api/coordinate/transform — authenticated tier, batch of 1..=100
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TransformBatchBody {
    from: String,
    to: Option<String>,
    points: Vec<PointRepr>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransformBatchData {
    from: SystemCode,
    to: SystemCode,
    count: usize,
    transformed: Vec<Point>,
}

#[instrument(skip_all)]
async fn transform_post(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let started = Instant::now();
    let identifier = client_identifier(&headers, peer.as_ref().map(|c| &c.0));
    let decision = state.limiter.check_limit(&identifier, Tier::Authenticated);
    if !decision.allowed {
        return admission_denied(&state, &decision, &identifier);
    }

    let Json(raw) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            let err = GatewayError::validation(format!("body is not valid JSON: {}", rejection));
            return error_response(&state, &err, Some(&decision));
        }
    };
    let body: TransformBatchBody = match serde_json::from_value(raw) {
        Ok(body) => body,
        Err(err) => {
            let err = GatewayError::SchemaValidation {
                message: format!("body does not match the batch transform shape: {}", err),
                details: None,
            };
            return error_response(&state, &err, Some(&decision));
        }
    };

    let parsed = (|| {
        let from = parse_system(Some(&body.from), "from")?;
        let to = match body.to.as_deref() {
            Some(raw) => parse_system(Some(raw), "to")?,
            None => SystemCode::Wgs84,
        };
        if body.points.is_empty() || body.points.len() > MAX_BATCH_POINTS {
            return Err(GatewayError::validation(format!(
                "'points' must contain between 1 and {} entries, got {}",
                MAX_BATCH_POINTS,
                body.points.len()
            )));
        }
        Ok::<_, GatewayError>((from, to))
    })();
    let (from, to) = match parsed {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };

    let points: Vec<Point> = body.points.iter().map(normalize_point).collect();
    let transformed = match state.engine.transform_batch(&points, from, to) {
        Ok(points) => points,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };
    let data = TransformBatchData { from, to, count: transformed.len(), transformed };
    let envelope = ApiEnvelope::success(serde_json::to_value(&data).expect("batch data"))
        .with_cached(false)
        .with_processing_time(started.elapsed().as_millis() as u64);

    let mut response_headers = rate_limit_headers(&decision);
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (StatusCode::OK, response_headers, Json(envelope)).into_response()
}

// -----------------------------------------------------------------------------
// GET /api/address — authenticated tier, upstream search through the cache
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressQuery {
    keyword: Option<String>,
    page_no: Option<String>,
    num_of_rows: Option<String>,
    convert_coordinate: Option<String>,
    target_system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortalAddressBody {
    results: PortalAddressResults,
}

#[derive(Debug, Deserialize)]
struct PortalAddressResults {
    common: PortalCommon,
    #[serde(default)]
    juso: Vec<PortalJuso>,
}

#[derive(Debug, Deserialize)]
struct PortalCommon {
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(rename = "errorMessage", default)]
    error_message: String,
    #[serde(rename = "totalCount", default)]
    total_count: String,
}

#[derive(Debug, Deserialize)]
struct PortalJuso {
    #[serde(rename = "roadAddr", default)]
    road_addr: String,
    #[serde(rename = "jibunAddr", default)]
    jibun_addr: String,
    #[serde(rename = "zipNo", default)]
    zip_no: String,
    #[serde(rename = "bdNm", default)]
    building_name: String,
    #[serde(rename = "entX", default)]
    ent_x: Option<String>,
    #[serde(rename = "entY", default)]
    ent_y: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressPoint {
    x: f64,
    y: f64,
    system: SystemCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressItem {
    road_address: String,
    jibun_address: String,
    zip_code: String,
    building_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    point: Option<AddressPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    current_page: u32,
    num_of_rows: u32,
    total_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressData {
    items: Vec<AddressItem>,
    pagination: Pagination,
}

#[instrument(skip_all)]
async fn address_search(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<AddressQuery>,
) -> Response {
    let identifier = client_identifier(&headers, peer.as_ref().map(|c| &c.0));
    let decision = state.limiter.check_limit(&identifier, Tier::Authenticated);
    if !decision.allowed {
        return admission_denied(&state, &decision, &identifier);
    }

    let parsed = (|| {
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| k.chars().count() >= 2)
            .ok_or_else(|| GatewayError::validation("'keyword' must be at least 2 characters"))?
            .to_string();
        let page_no = match query.page_no.as_deref() {
            None => 1u32,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|&p| p >= 1)
                .ok_or_else(|| GatewayError::validation("'pageNo' must be a positive integer"))?,
        };
        let num_of_rows = match query.num_of_rows.as_deref() {
            None => 10u32,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|&n| (1..=100).contains(&n))
                .ok_or_else(|| GatewayError::validation("'numOfRows' must be in [1, 100]"))?,
        };
        let convert = query.convert_coordinate.as_deref() == Some("true");
        let target = match query.target_system.as_deref() {
            Some(raw) => parse_system(Some(raw), "targetSystem")?,
            None => SystemCode::Wgs84,
        };
        Ok::<_, GatewayError>((keyword, page_no, num_of_rows, convert, target))
    })();
    let (keyword, page_no, num_of_rows, convert, target) = match parsed {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };

    let params: Vec<(String, String)> = vec![
        ("keyword".to_string(), keyword),
        ("currentPage".to_string(), page_no.to_string()),
        ("countPerPage".to_string(), num_of_rows.to_string()),
        ("resultType".to_string(), "json".to_string()),
    ];
    let upstream_envelope = match state
        .upstream
        .get_cached(CacheType::Address, ADDRESS_SEARCH_ENDPOINT, &params)
        .await
    {
        Ok(envelope) => envelope,
        Err(err) => return error_response(&state, &err, Some(&decision)),
    };

    let raw = upstream_envelope.data.clone().unwrap_or(Value::Null);
    let portal: PortalAddressBody = match serde_json::from_value(raw) {
        Ok(portal) => portal,
        Err(err) => {
            let err = GatewayError::ExternalApi {
                message: format!("unexpected address payload: {}", err),
                status: None,
            };
            return error_response(&state, &err, Some(&decision));
        }
    };
    if portal.results.common.error_code != "0" {
        // Do not keep an upstream application error around for a day.
        state
            .cache
            .delete(CacheType::Address, &cache_key(ADDRESS_SEARCH_ENDPOINT, &params));
        let err = GatewayError::ExternalApi {
            message: format!(
                "address portal error {}: {}",
                portal.results.common.error_code, portal.results.common.error_message
            ),
            status: None,
        };
        return error_response(&state, &err, Some(&decision));
    }

    let items = portal
        .results
        .juso
        .iter()
        .map(|juso| address_item(&state, juso, convert, target))
        .collect();
    let data = AddressData {
        items,
        pagination: Pagination {
            current_page: page_no,
            num_of_rows,
            total_count: portal.results.common.total_count.parse().unwrap_or(0),
        },
    };
    // Reuse the upstream envelope's metadata so a cached replay produces an
    // identical body, cached flag included.
    let envelope = ApiEnvelope {
        success: true,
        data: Some(serde_json::to_value(&data).expect("address data")),
        error: None,
        metadata: upstream_envelope.metadata,
    };

    let mut response_headers = rate_limit_headers(&decision);
    response_headers.insert(header::CACHE_CONTROL, cacheable_header(CacheType::Address));
    (StatusCode::OK, response_headers, Json(envelope)).into_response()
}

fn address_item(
    state: &AppState,
    juso: &PortalJuso,
    convert: bool,
    target: SystemCode,
) -> AddressItem {
    let parsed_point = match (&juso.ent_x, &juso.ent_y) {
        (Some(x), Some(y)) => match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(x), Ok(y)) => Some(Point::new(x, y)),
            _ => None,
        },
        _ => None,
    };
    let point = parsed_point.and_then(|p| {
        if !convert {
            return Some(AddressPoint { x: p.x, y: p.y, system: ADDRESS_POINT_SYSTEM });
        }
        match state.engine.transform(p, ADDRESS_POINT_SYSTEM, target) {
            Ok(out) => Some(AddressPoint { x: out.x, y: out.y, system: target }),
            Err(err) => {
                warn!(code = err.code(), road = %juso.road_addr, "address_point_unconvertible");
                None
            }
        }
    });
    AddressItem {
        road_address: juso.road_addr.clone(),
        jibun_address: juso.jibun_addr.clone(),
        zip_code: juso.zip_no.clone(),
        building_name: juso.building_name.clone(),
        point,
    }
}

// -----------------------------------------------------------------------------
// GET /api/health
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HealthQuery {
    detailed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Degraded,
    Down,
}

#[instrument(skip_all)]
async fn health(State(state): State<AppState>, Query(query): Query<HealthQuery>) -> Response {
    let key_stats = state.keys.stats();
    let limiter_stats = state.limiter.stats();
    let memory = state.cache.memory_usage();
    let upstream_stats = state.upstream.stats();

    let key_status = if key_stats.active_keys == 0 {
        ComponentStatus::Down
    } else if key_stats.expiring_soon > 0 {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    let limiter_status = if limiter_stats.block_rate > HEALTH_BLOCK_RATE_PCT {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    let cache_status = if memory.percentage > HEALTH_MEMORY_PCT {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    let upstream_status = if upstream_stats.total_requests > 0
        && upstream_stats.success_rate < HEALTH_SUCCESS_RATE_PCT
    {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };

    let overall = [key_status, limiter_status, cache_status, upstream_status]
        .into_iter()
        .max()
        .expect("four components");

    let detailed = query.detailed.as_deref() == Some("true");
    let mut components = serde_json::json!({
        "apiKeys": { "status": key_status },
        "rateLimiter": { "status": limiter_status },
        "cache": { "status": cache_status },
        "upstreamClient": { "status": upstream_status },
    });
    if detailed {
        components["apiKeys"]["stats"] = serde_json::to_value(key_stats).expect("key stats");
        components["rateLimiter"]["stats"] =
            serde_json::to_value(&limiter_stats).expect("limiter stats");
        components["cache"]["stats"] =
            serde_json::to_value(state.cache.detailed_stats()).expect("cache stats");
        components["cache"]["memory"] = serde_json::to_value(memory).expect("cache memory");
        components["upstreamClient"]["stats"] =
            serde_json::to_value(upstream_stats).expect("upstream stats");
    }
    let report = serde_json::json!({ "status": overall, "components": components });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );

    if overall == ComponentStatus::Down {
        let err = GatewayError::Unavailable("one or more components are down".into());
        let mut envelope = ApiEnvelope::<Value>::failure(&err, state.config.production);
        if let Some(info) = envelope.error.as_mut() {
            info.details = Some(report);
        }
        return (StatusCode::SERVICE_UNAVAILABLE, headers, Json(envelope)).into_response();
    }
    (StatusCode::OK, headers, Json(ApiEnvelope::success(report))).into_response()
}
