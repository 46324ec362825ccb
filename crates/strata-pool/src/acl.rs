//! Pool access control lists.
//!
//! The engine owns the ACL; the control plane checks entry syntax, routes
//! the call to the pool's service replicas and passes the resulting ACL
//! back. An entry reads `type:flags:principal:perms`, e.g. `A:g:GROUP@:r`.

use strata_core::Status;
use strata_core::rank::ranks_to_u32;
use strata_engine::Method;
use strata_engine::rpc::{PoolAclResp, PoolDeleteAclReq, PoolGetAclReq, PoolModifyAclReq};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PoolError, PoolResult};
use crate::manager::PoolManager;
use crate::types::*;

/// Allow, audit and alarm.
const ACE_TYPES: &[char] = &['A', 'U', 'L'];

fn invalid_ace(ace: &str) -> PoolError {
    PoolError::InvalidRequest(format!("invalid ACL entry {ace:?}"))
}

/// Check a principal: `OWNER@`, `GROUP@`, `EVERYONE@`, or a user or
/// group name ending in `@`, optionally prefixed with `u:` or `g:`.
fn check_principal(principal: &str) -> bool {
    let name = principal
        .strip_prefix("u:")
        .or_else(|| principal.strip_prefix("g:"))
        .unwrap_or(principal);
    name.len() > 1 && name.contains('@') && !name.contains(':')
}

pub(crate) fn check_ace(ace: &str) -> PoolResult<()> {
    let fields: Vec<&str> = ace.split(':').collect();
    let [kind, flags, principal, perms] = fields.as_slice() else {
        return Err(invalid_ace(ace));
    };
    let mut kinds = kind.chars();
    let kind_ok = matches!((kinds.next(), kinds.next()), (Some(c), None) if ACE_TYPES.contains(&c));
    let flags_ok = flags.chars().all(|c| c.is_ascii_alphabetic());
    if !kind_ok || !flags_ok || perms.is_empty() || !check_principal(principal) {
        return Err(invalid_ace(ace));
    }
    Ok(())
}

fn acl_response(resp: PoolAclResp) -> PoolAclResponse {
    PoolAclResponse {
        status: resp.status,
        acl: resp.acl,
        owner_user: resp.owner_user,
        owner_group: resp.owner_group,
    }
}

impl PoolManager {
    pub async fn get_acl(&self, id: &PoolId) -> PoolResult<PoolAclResponse> {
        self.sysdb.check_leader()?;
        let uuid = self.resolve_uuid(id)?;
        let ps = self.ready_pool(uuid)?;

        let req = PoolGetAclReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
        };
        let resp: PoolAclResp = self.dispatcher.call_local(Method::PoolGetAcl, &req).await?;
        if !resp.status.is_success() {
            warn!(pool = %uuid, status = %resp.status, "pool get-acl failed");
            return Ok(resp.status.into());
        }
        debug!(pool = %uuid, entries = resp.acl.len(), "pool ACL fetched");
        Ok(acl_response(resp))
    }

    /// Replace the whole ACL. An empty list clears it.
    pub async fn overwrite_acl(&self, req: &PoolModifyAclRequest) -> PoolResult<PoolAclResponse> {
        self.modify_acl(Method::PoolOverwriteAcl, req).await
    }

    /// Add entries, replacing any existing entry for the same principal.
    pub async fn update_acl(&self, req: &PoolModifyAclRequest) -> PoolResult<PoolAclResponse> {
        if req.acl.is_empty() {
            return Err(PoolError::InvalidRequest("no ACL entries given".to_string()));
        }
        self.modify_acl(Method::PoolUpdateAcl, req).await
    }

    async fn modify_acl(&self, method: Method, req: &PoolModifyAclRequest) -> PoolResult<PoolAclResponse> {
        req.acl.iter().try_for_each(|ace| check_ace(ace))?;
        let uuid = self.resolve_uuid(&req.id)?;
        let _lock = self.sysdb.lock_pool(uuid).await?;
        let ps = self.ready_pool(uuid)?;

        let engine_req = PoolModifyAclReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            acl: req.acl.clone(),
        };
        let resp: PoolAclResp = self.dispatcher.call_local(method, &engine_req).await?;
        log_outcome(uuid, method, resp.status);
        if !resp.status.is_success() {
            return Ok(resp.status.into());
        }
        Ok(acl_response(resp))
    }

    /// Remove the entry for one principal.
    pub async fn delete_acl(&self, req: &PoolDeleteAclRequest) -> PoolResult<PoolAclResponse> {
        let principal = req.principal.trim();
        if !check_principal(principal) {
            return Err(PoolError::InvalidRequest(format!(
                "invalid ACL principal {:?}",
                req.principal
            )));
        }
        let uuid = self.resolve_uuid(&req.id)?;
        let _lock = self.sysdb.lock_pool(uuid).await?;
        let ps = self.ready_pool(uuid)?;

        let engine_req = PoolDeleteAclReq {
            uuid,
            sys: self.system.clone(),
            svc_ranks: ranks_to_u32(&ps.replicas),
            principal: principal.to_string(),
        };
        let resp: PoolAclResp = self
            .dispatcher
            .call_local(Method::PoolDeleteAcl, &engine_req)
            .await?;
        log_outcome(uuid, Method::PoolDeleteAcl, resp.status);
        if !resp.status.is_success() {
            return Ok(resp.status.into());
        }
        Ok(acl_response(resp))
    }
}

fn log_outcome(uuid: Uuid, method: Method, status: Status) {
    if status.is_success() {
        info!(pool = %uuid, %method, "pool ACL changed");
    } else {
        warn!(pool = %uuid, %method, %status, "pool ACL change failed");
    }
}
