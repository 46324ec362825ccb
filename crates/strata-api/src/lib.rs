//! strata-api — admin REST API for Strata.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/pools` | List pools (`?all=true` includes non-ready records) |
//! | POST | `/api/v1/pools` | Create a pool |
//! | GET | `/api/v1/pools/{id}` | Query a pool by UUID or label |
//! | DELETE | `/api/v1/pools/{id}` | Destroy a pool (`?force=true&recursive=true`) |
//! | POST | `/api/v1/pools/{id}/extend` | Add ranks to a pool |
//! | POST | `/api/v1/pools/{id}/evict` | Evict open handles |
//! | POST | `/api/v1/pools/{id}/exclude` | Exclude targets on a rank |
//! | POST | `/api/v1/pools/{id}/drain` | Drain targets on a rank |
//! | POST | `/api/v1/pools/{id}/reintegrate` | Reintegrate targets on a rank |
//! | GET | `/api/v1/pools/{id}/props` | Get properties (`?names=label,reclaim`) |
//! | POST | `/api/v1/pools/{id}/props` | Set properties |
//! | GET | `/api/v1/pools/{id}/acl` | Get the pool ACL |
//! | PUT | `/api/v1/pools/{id}/acl` | Overwrite the pool ACL |
//! | POST | `/api/v1/pools/{id}/acl` | Add or replace ACL entries |
//! | DELETE | `/api/v1/pools/{id}/acl` | Remove a principal's entry (`?principal=u:user@`) |
//! | GET | `/api/v1/smd` | SMD device and pool inventory |
//! | POST | `/api/v1/smd/manage` | Replace, set-faulty or LED management |
//! | GET | `/api/v1/members` | List system members |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use strata_dispatch::SmdService;
use strata_pool::{EvictBatcher, PoolManager};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pools: PoolManager,
    pub evictions: EvictBatcher,
    pub smd: SmdService,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/pools", get(handlers::list_pools).post(handlers::create_pool))
        .route("/pools/{id}", get(handlers::query_pool).delete(handlers::destroy_pool))
        .route("/pools/{id}/extend", post(handlers::extend_pool))
        .route("/pools/{id}/evict", post(handlers::evict_pool))
        .route("/pools/{id}/exclude", post(handlers::exclude_targets))
        .route("/pools/{id}/drain", post(handlers::drain_targets))
        .route("/pools/{id}/reintegrate", post(handlers::reintegrate_targets))
        .route("/pools/{id}/props", get(handlers::get_props).post(handlers::set_props))
        .route(
            "/pools/{id}/acl",
            get(handlers::get_acl)
                .put(handlers::overwrite_acl)
                .post(handlers::update_acl)
                .delete(handlers::delete_acl),
        )
        .route("/smd", get(handlers::smd_query))
        .route("/smd/manage", post(handlers::smd_manage))
        .route("/members", get(handlers::list_members))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
