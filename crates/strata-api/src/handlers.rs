//! REST API handlers.
//!
//! Each handler delegates to the pool manager, the evict batcher or the
//! SMD service and returns JSON. A non-zero engine status is a successful
//! HTTP exchange; it is reported in the `status` field of the data.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use strata_core::Rank;
use strata_dispatch::{DispatchError, SmdManageOp, SmdQueryReq};
use strata_pool::*;
use strata_state::StateError;
use tracing::warn;
use uuid::Uuid;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Error mapping ──────────────────────────────────────────────

fn state_error_status(err: &StateError) -> StatusCode {
    match err {
        StateError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StateError::PoolExists(_) | StateError::LabelExists { .. } => StatusCode::CONFLICT,
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::FaultDomain(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn dispatch_error_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Engine(e) if e.is_transport() => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Engine(_) => StatusCode::BAD_GATEWAY,
        DispatchError::NoReadyEngine => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::DevicesNotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::InvalidDeviceId(_)
        | DispatchError::NoTransportAddress(_)
        | DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

fn pool_error_status(err: &PoolError) -> StatusCode {
    match err {
        _ if err.is_unreachable() => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::Batched(inner) => pool_error_status(inner),
        PoolError::State(e) => state_error_status(e),
        PoolError::Dispatch(e) => dispatch_error_status(e),
        PoolError::Engine(_) => StatusCode::BAD_GATEWAY,
        PoolError::BatcherClosed => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::PoolNotFound(_) => StatusCode::NOT_FOUND,
        PoolError::DuplicateLabel { .. } | PoolError::NotReady { .. } => StatusCode::CONFLICT,
        PoolError::InvalidId(_)
        | PoolError::InvalidUuid
        | PoolError::LabelRequired
        | PoolError::InvalidRanks(_)
        | PoolError::NoRanks
        | PoolError::NotEnoughRanks { .. }
        | PoolError::TooManySvcReps { .. }
        | PoolError::ZeroTargetCount
        | PoolError::ScmTooSmall { .. }
        | PoolError::NvmeTooSmall { .. }
        | PoolError::InvalidSize(_)
        | PoolError::Property(_)
        | PoolError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

fn pool_error(err: &PoolError) -> Response {
    let status = pool_error_status(err);
    if status.is_server_error() {
        warn!(error = %err, %status, "pool request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

fn dispatch_error(err: &DispatchError) -> Response {
    let status = dispatch_error_status(err);
    if status.is_server_error() {
        warn!(error = %err, %status, "smd request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

fn respond<T: serde::Serialize>(result: PoolResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => pool_error(&e),
    }
}

fn pool_id(raw: &str) -> Result<PoolId, Response> {
    raw.parse().map_err(|e: PoolError| pool_error(&e))
}

// ── Pools ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub all: bool,
}

/// GET /api/v1/pools
pub async fn list_pools(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    respond(state.pools.list(params.all))
}

/// POST /api/v1/pools
pub async fn create_pool(
    State(state): State<ApiState>,
    Json(req): Json<PoolCreateRequest>,
) -> impl IntoResponse {
    match state.pools.create(req).await {
        Ok(resp) if resp.status.is_success() => {
            (StatusCode::CREATED, ApiResponse::ok(resp)).into_response()
        }
        Ok(resp) => ApiResponse::ok(resp).into_response(),
        Err(e) => pool_error(&e),
    }
}

/// GET /api/v1/pools/{id}
pub async fn query_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.pools.query(&id).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct DestroyParams {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub recursive: bool,
}

/// DELETE /api/v1/pools/{id}
pub async fn destroy_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<DestroyParams>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolDestroyRequest {
        id,
        force: params.force,
        recursive: params.recursive,
    };
    respond(state.pools.destroy(&req).await)
}

/// Extend request body.
#[derive(Debug, Deserialize)]
pub struct ExtendBody {
    pub ranks: Vec<Rank>,
}

/// POST /api/v1/pools/{id}/extend
pub async fn extend_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<ExtendBody>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.pools.extend(&PoolExtendRequest { id, ranks: body.ranks }).await)
}

/// Evict request body. No handles means every handle.
#[derive(Debug, Default, Deserialize)]
pub struct EvictBody {
    #[serde(default)]
    pub handles: Vec<Uuid>,
}

/// POST /api/v1/pools/{id}/evict
pub async fn evict_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<EvictBody>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolEvictRequest {
        id,
        handles: body.handles,
    };
    respond(state.evictions.evict(req).await)
}

/// Target state change body.
#[derive(Debug, Deserialize)]
pub struct TargetsBody {
    pub rank: Rank,
    #[serde(default)]
    pub target_idx: Vec<u32>,
}

async fn rank_targets(state: ApiState, op: TargetOp, id: &str, body: TargetsBody) -> Response {
    let id = match pool_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolRankTargetsRequest {
        id,
        rank: body.rank,
        target_idx: body.target_idx,
    };
    let result = match op {
        TargetOp::Exclude => state.pools.exclude(&req).await,
        TargetOp::Drain => state.pools.drain(&req).await,
        TargetOp::Reintegrate => state.pools.reintegrate(&req).await,
    };
    respond(result)
}

/// POST /api/v1/pools/{id}/exclude
pub async fn exclude_targets(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TargetsBody>,
) -> impl IntoResponse {
    rank_targets(state, TargetOp::Exclude, &id, body).await
}

/// POST /api/v1/pools/{id}/drain
pub async fn drain_targets(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TargetsBody>,
) -> impl IntoResponse {
    rank_targets(state, TargetOp::Drain, &id, body).await
}

/// POST /api/v1/pools/{id}/reintegrate
pub async fn reintegrate_targets(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TargetsBody>,
) -> impl IntoResponse {
    rank_targets(state, TargetOp::Reintegrate, &id, body).await
}

// ── Properties ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PropParams {
    /// Comma-separated property names; empty means all.
    #[serde(default)]
    pub names: Option<String>,
}

/// GET /api/v1/pools/{id}/props
pub async fn get_props(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<PropParams>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let names = params
        .names
        .as_deref()
        .map(|n| {
            n.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    respond(state.pools.get_prop(&PoolGetPropRequest { id, names }).await)
}

/// Set-prop request body.
#[derive(Debug, Deserialize)]
pub struct SetPropsBody {
    pub properties: Vec<PropertyArg>,
}

/// POST /api/v1/pools/{id}/props
pub async fn set_props(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<SetPropsBody>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolSetPropRequest {
        id,
        properties: body.properties,
    };
    respond(state.pools.set_prop(&req).await)
}

// ── Access control ─────────────────────────────────────────────

/// GET /api/v1/pools/{id}/acl
pub async fn get_acl(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.pools.get_acl(&id).await)
}

/// ACL entries for overwrite and update.
#[derive(Debug, Default, Deserialize)]
pub struct AclBody {
    #[serde(default)]
    pub acl: Vec<String>,
}

/// PUT /api/v1/pools/{id}/acl
pub async fn overwrite_acl(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<AclBody>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolModifyAclRequest { id, acl: body.acl };
    respond(state.pools.overwrite_acl(&req).await)
}

/// POST /api/v1/pools/{id}/acl
pub async fn update_acl(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<AclBody>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolModifyAclRequest { id, acl: body.acl };
    respond(state.pools.update_acl(&req).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct AclParams {
    #[serde(default)]
    pub principal: String,
}

/// DELETE /api/v1/pools/{id}/acl?principal=u:user@
pub async fn delete_acl(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<AclParams>,
) -> impl IntoResponse {
    let id = match pool_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let req = PoolDeleteAclRequest {
        id,
        principal: params.principal,
    };
    respond(state.pools.delete_acl(&req).await)
}

// ── SMD ────────────────────────────────────────────────────────

/// GET /api/v1/smd
pub async fn smd_query(
    State(state): State<ApiState>,
    Query(req): Query<SmdQueryReq>,
) -> impl IntoResponse {
    match state.smd.query(&req).await {
        Ok(infos) => ApiResponse::ok(infos).into_response(),
        Err(e) => dispatch_error(&e),
    }
}

/// POST /api/v1/smd/manage
pub async fn smd_manage(
    State(state): State<ApiState>,
    Json(op): Json<SmdManageOp>,
) -> impl IntoResponse {
    match state.smd.manage(&op).await {
        Ok(results) => ApiResponse::ok(results).into_response(),
        Err(e) => dispatch_error(&e),
    }
}

// ── Members ────────────────────────────────────────────────────

/// GET /api/v1/members
pub async fn list_members(State(state): State<ApiState>) -> impl IntoResponse {
    match state.pools.sysdb().all_members() {
        Ok(members) => ApiResponse::ok(members).into_response(),
        Err(e) => error_response(&e.to_string(), state_error_status(&e)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use strata_core::Status;
    use strata_core::config::PoolConfig;
    use strata_dispatch::{Dispatcher, RetryPolicy, SmdService};
    use strata_engine::rpc::{
        ListSmdDevicesResp, PoolAclResp, PoolCreateResp, PoolEvictResp, SmdDevice, SmdPoolsResp, StatusResp,
    };
    use strata_engine::{Engine, EngineSet, Method, MockEngine};
    use strata_state::{StateStore, SystemDb};
    use tokio::sync::watch;

    use super::*;

    const GIB: u64 = 1 << 30;

    struct Harness {
        state: ApiState,
        engine: Arc<MockEngine>,
        _shutdown: watch::Sender<bool>,
    }

    async fn test_state(ranks: u32) -> Harness {
        let sysdb = SystemDb::new(StateStore::open_in_memory().unwrap());
        for i in 0..ranks {
            sysdb
                .join(Uuid::from_u128(u128::from(i) + 1), &format!("host{i}:10001"), None)
                .await
                .unwrap();
        }
        let engine = Arc::new(MockEngine::new(0).with_rank(Rank(0)));
        let set: EngineSet = [Arc::clone(&engine) as Arc<dyn Engine>].into_iter().collect();
        let dispatcher = Dispatcher::new(set);
        let pools = PoolManager::new(sysdb, dispatcher.clone(), PoolConfig::default(), "strata_test");
        let (tx, rx) = watch::channel(false);
        let (evictions, _task) = EvictBatcher::spawn(pools.clone(), Duration::from_millis(5), rx);
        let smd = SmdService::new(dispatcher, RetryPolicy::none());
        Harness {
            state: ApiState {
                pools,
                evictions,
                smd,
            },
            engine,
            _shutdown: tx,
        }
    }

    fn create_req(n: u128, label: &str) -> PoolCreateRequest {
        PoolCreateRequest {
            uuid: Uuid::from_u128(n),
            label: Some(label.to_string()),
            tier_bytes: vec![10 * GIB, 100 * GIB],
            ..Default::default()
        }
    }

    async fn create_tank(h: &Harness) {
        h.engine.push_response(
            Method::PoolCreate,
            &PoolCreateResp {
                status: Status::Success,
                svc_reps: vec![0],
                tgt_ranks: vec![0],
                tier_bytes: vec![10 * GIB, 100 * GIB],
            },
        );
        let resp = create_pool(State(h.state.clone()), Json(create_req(1, "tank")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_pools_empty() {
        let h = test_state(1).await;
        let resp = list_pools(State(h.state), Query(ListParams::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_then_list() {
        let h = test_state(1).await;
        create_tank(&h).await;

        let resp = list_pools(State(h.state), Query(ListParams::default()))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"][0]["label"], "tank");
    }

    #[tokio::test]
    async fn create_without_label_is_bad_request() {
        let h = test_state(1).await;
        let mut req = create_req(1, "tank");
        req.label = None;
        let resp = create_pool(State(h.state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.engine.call_count(), 0);
    }

    #[tokio::test]
    async fn create_engine_status_is_reported_in_body() {
        let h = test_state(1).await;
        h.engine.push_response(
            Method::PoolCreate,
            &PoolCreateResp {
                status: Status::NoSpace,
                ..Default::default()
            },
        );
        let resp = create_pool(State(h.state), Json(create_req(1, "tank")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], serde_json::json!(Status::NoSpace));
    }

    #[tokio::test]
    async fn unknown_label_is_not_found() {
        let h = test_state(1).await;
        let resp = query_pool(State(h.state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn destroy_by_label() {
        let h = test_state(1).await;
        create_tank(&h).await;
        h.engine.push_response(Method::PoolEvict, &PoolEvictResp::default());
        h.engine.push_response(Method::PoolDestroy, &StatusResp::default());

        let resp = destroy_pool(
            State(h.state.clone()),
            Path("tank".to_string()),
            Query(DestroyParams::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(h.state.pools.list(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn evict_goes_through_batcher() {
        let h = test_state(1).await;
        create_tank(&h).await;
        h.engine.push_response(
            Method::PoolEvict,
            &PoolEvictResp {
                status: Status::Success,
                count: 2,
            },
        );

        let resp = evict_pool(
            State(h.state),
            Path(Uuid::from_u128(1).to_string()),
            Json(EvictBody::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["count"], 2);
    }

    #[tokio::test]
    async fn exclude_unknown_rank_is_bad_request() {
        let h = test_state(1).await;
        create_tank(&h).await;
        let body = TargetsBody {
            rank: Rank(7),
            target_idx: vec![0],
        };
        let resp = exclude_targets(State(h.state), Path("tank".to_string()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreachable_engine_is_service_unavailable() {
        let h = test_state(1).await;
        create_tank(&h).await;
        h.engine.set_ready(false);
        let resp = query_pool(State(h.state), Path("tank".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn acl_round_trip_by_label() {
        let h = test_state(1).await;
        create_tank(&h).await;
        h.engine.set_default(
            Method::PoolUpdateAcl,
            &PoolAclResp {
                status: Status::Success,
                acl: vec!["A::OWNER@:rw".into(), "A:g:GROUP@:r".into()],
                ..Default::default()
            },
        );
        h.engine.push_response(
            Method::PoolDeleteAcl,
            &PoolAclResp {
                status: Status::NoPermission,
                ..Default::default()
            },
        );

        let body = AclBody {
            acl: vec!["A:g:GROUP@:r".into()],
        };
        let resp = update_acl(State(h.state.clone()), Path("tank".to_string()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["acl"][1], "A:g:GROUP@:r");

        let params = AclParams {
            principal: "u:user@".into(),
        };
        let resp = delete_acl(State(h.state), Path("tank".to_string()), Query(params))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], serde_json::json!(Status::NoPermission));
    }

    #[tokio::test]
    async fn acl_bad_entry_is_bad_request() {
        let h = test_state(1).await;
        create_tank(&h).await;
        let body = AclBody {
            acl: vec!["garbage".into()],
        };
        let resp = overwrite_acl(State(h.state.clone()), Path("tank".to_string()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = delete_acl(State(h.state), Path("tank".to_string()), Query(AclParams::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.engine.calls_for(Method::PoolOverwriteAcl).is_empty());
    }

    #[tokio::test]
    async fn smd_query_lists_devices() {
        let h = test_state(1).await;
        h.engine.push_response(
            Method::ListSmdDevices,
            &ListSmdDevicesResp {
                status: Status::Success,
                devices: vec![SmdDevice {
                    uuid: Uuid::from_u128(0xd1),
                    ..Default::default()
                }],
            },
        );
        h.engine.push_response(Method::SmdPools, &SmdPoolsResp::default());

        let resp = smd_query(State(h.state), Query(SmdQueryReq::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"][0]["rank"], 0);
        assert_eq!(
            body["data"][0]["devices"][0]["uuid"],
            serde_json::json!(Uuid::from_u128(0xd1))
        );
    }

    #[tokio::test]
    async fn smd_manage_rejects_bad_identifier() {
        let h = test_state(1).await;
        let op = SmdManageOp::SetFaulty {
            ids: "not-a-device".to_string(),
        };
        let resp = smd_manage(State(h.state), Json(op)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_members_returns_joined_ranks() {
        let h = test_state(3).await;
        let resp = list_members(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }
}
