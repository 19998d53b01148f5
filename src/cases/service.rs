//! Owner-driven case actions: create, cancel, close, history.
//!
//! Cancel and close are single-row transitions, but the status check and the
//! write still happen under the row lock so they cannot lose an update
//! against a concurrent settlement.

use tracing::{info, warn};

use super::models::{Case, CaseStatus, NewCase};
use super::repository::CaseRepository;
use crate::audit::{self, AuditTrail, HistoryAction, HistoryEntry};
use crate::core_types::{Actor, CaseId, Role};
use crate::db::Database;
use crate::error::{MarketError, MarketResult};

pub struct CaseService {
    db: Database,
    audit: AuditTrail,
}

impl CaseService {
    pub fn new(db: Database, audit: AuditTrail) -> Self {
        Self { db, audit }
    }

    /// Client posts a new case (status OPEN)
    pub async fn create(&self, actor: &Actor, input: NewCase) -> MarketResult<Case> {
        if actor.role != Role::Client {
            return Err(MarketError::forbidden("only clients can post cases"));
        }

        let mut tx = self.db.pool().begin().await?;
        let case = CaseRepository::create(&mut tx, actor.id, &input).await?;
        let deferred = self
            .audit
            .record(
                &mut tx,
                HistoryEntry::new(
                    case.id,
                    actor.id,
                    HistoryAction::Created,
                    None,
                    CaseStatus::Open,
                    "case created",
                ),
            )
            .await;
        tx.commit().await?;
        self.audit.defer(deferred);

        info!(case_id = %case.id, client_id = %actor.id, "Case created");
        Ok(case)
    }

    pub async fn get(&self, case_id: CaseId) -> MarketResult<Case> {
        let mut conn = self.db.pool().acquire().await?;
        CaseRepository::get(&mut conn, case_id)
            .await?
            .ok_or_else(|| MarketError::not_found("case not found"))
    }

    /// OPEN -> CANCELLED, owner only
    pub async fn cancel(&self, case_id: CaseId, actor: &Actor, comment: &str) -> MarketResult<Case> {
        self.owner_transition(
            case_id,
            actor,
            CaseStatus::Open,
            CaseStatus::Cancelled,
            HistoryAction::Cancelled,
            comment,
            "case cannot be cancelled",
        )
        .await
    }

    /// ENGAGED -> CLOSED, owner only
    pub async fn close(&self, case_id: CaseId, actor: &Actor, comment: &str) -> MarketResult<Case> {
        self.owner_transition(
            case_id,
            actor,
            CaseStatus::Engaged,
            CaseStatus::Closed,
            HistoryAction::Closed,
            comment,
            "only engaged cases can be closed",
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn owner_transition(
        &self,
        case_id: CaseId,
        actor: &Actor,
        from: CaseStatus,
        to: CaseStatus,
        action: HistoryAction,
        comment: &str,
        conflict_msg: &str,
    ) -> MarketResult<Case> {
        let mut tx = self.db.pool().begin().await?;

        let mut case = CaseRepository::lock(&mut tx, case_id)
            .await?
            .ok_or_else(|| MarketError::not_found("case not found"))?;

        if actor.role != Role::Client || !case.is_owned_by(actor.id) {
            return Err(MarketError::forbidden("not the case owner"));
        }
        if case.status != from {
            warn!(
                case_id = %case_id,
                status = %case.status,
                wanted = %to,
                "Rejected case transition"
            );
            return Err(MarketError::conflict(conflict_msg));
        }

        if !CaseRepository::transition(&mut tx, case_id, from, to).await? {
            // Row is locked and was just read as `from`; anything else is a bug
            return Err(MarketError::internal(format!(
                "case {} changed status under lock",
                case_id
            )));
        }

        let deferred = self
            .audit
            .record(
                &mut tx,
                HistoryEntry::transition(case_id, actor.id, action, from, to, comment),
            )
            .await;
        tx.commit().await?;
        self.audit.defer(deferred);

        info!(case_id = %case_id, from = %from, to = %to, "Case status changed");
        case.status = to;
        Ok(case)
    }

    /// History visible to the owner (client) or the accepted lawyer
    pub async fn list_history(
        &self,
        case_id: CaseId,
        actor: &Actor,
    ) -> MarketResult<Vec<HistoryEntry>> {
        let case = self.get(case_id).await?;

        let allowed = match actor.role {
            Role::Client => case.is_owned_by(actor.id),
            Role::Lawyer => case.status.has_winner() && case.accepted_lawyer_id == Some(actor.id),
        };
        if !allowed {
            return Err(MarketError::forbidden("no access to case history"));
        }

        audit::writer::list_for_case(self.db.pool(), case_id).await
    }
}
