//! End-to-end lifecycle over the SQLite backend: provisioning, stamping,
//! reassignment, corruption repair, and chat capability checks.

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use axon_directory::{
    AffiliationPropagator, AgentDirectory, DriftRepair, IntegrityAuditor, NewAgentRequest,
};
use axon_room_access::{resolve, OwnerRole, RoomType};
use axon_store::{DirectoryStore, SqliteDirectoryStore};
use axon_types::{AgentCode, AgentTier, CodeSpace};

fn request(tier: AgentTier, parent_id: Option<u64>) -> NewAgentRequest {
    NewAgentRequest {
        tier,
        parent_id,
        region: None,
    }
}

#[test]
fn provisioning_reassignment_and_audit_survive_a_restart() -> Result<()> {
    let temp = tempdir()?;
    let db_path = temp.path().join("axon.sqlite");

    let integrated_id;
    let ceo_id;
    let user_id;
    {
        let store: Arc<dyn DirectoryStore> = Arc::new(SqliteDirectoryStore::open(&db_path)?);
        let directory = AgentDirectory::new(Arc::clone(&store));
        let propagator = AffiliationPropagator::new(Arc::clone(&store));

        let integrated = directory.create_agent(request(AgentTier::Integrated, None))?;
        let ceo = directory.create_agent(request(AgentTier::Ceo, Some(integrated.id)))?;
        assert_eq!(integrated.affiliation_code, "INT001");
        assert_eq!(ceo.affiliation_code, "CEO001");

        let user = propagator.stamp_on_create(ceo.id)?;
        assert_eq!(user.affiliate_code, "CEO001");

        integrated_id = integrated.id;
        ceo_id = ceo.id;
        user_id = user.id;
    }

    // A fresh store over the same database sees the full tree.
    let store: Arc<dyn DirectoryStore> = Arc::new(SqliteDirectoryStore::open(&db_path)?);
    let directory = AgentDirectory::new(Arc::clone(&store));
    let propagator = AffiliationPropagator::new(Arc::clone(&store));
    let auditor = IntegrityAuditor::new(Arc::clone(&store));

    let lineage = directory.lineage(ceo_id)?;
    assert_eq!(lineage.len(), 2);
    assert_eq!(lineage[1].id, integrated_id);

    let outcome = propagator.reassign(user_id, integrated_id)?;
    assert!(outcome.changed);
    let user = store.get_user(user_id)?.expect("user present");
    assert_eq!(user.affiliate_code, "INT001");
    assert_eq!(user.manager_id, Some(integrated_id));

    let report = auditor.audit()?;
    assert!(report.is_clean());
    Ok(())
}

#[test]
fn code_regeneration_flows_into_bulk_reassignment() -> Result<()> {
    let temp = tempdir()?;
    let store: Arc<dyn DirectoryStore> =
        Arc::new(SqliteDirectoryStore::open(temp.path().join("axon.sqlite"))?);
    let directory = AgentDirectory::new(Arc::clone(&store));
    let propagator = AffiliationPropagator::new(Arc::clone(&store));
    let auditor = IntegrityAuditor::new(Arc::clone(&store));

    let ceo = directory.create_agent(request(AgentTier::Ceo, None))?;
    let first = propagator.stamp_on_create(ceo.id)?;
    let second = propagator.stamp_on_create(ceo.id)?;

    let regeneration = directory.regenerate_code(ceo.id, CodeSpace::Affiliation)?;
    assert_eq!(regeneration.old_code, "CEO001");
    assert!(AgentCode::is_well_formed(&regeneration.new_code));

    // Until a repair pass runs, both users are drifted but repairable.
    assert_eq!(auditor.find_drifted_users()?.len(), 2);
    let repaired = propagator.repair_drift(first.id)?;
    assert!(matches!(repaired, DriftRepair::Repaired { .. }));

    // Users still stamped with the retired code keep the same manager, so
    // bulk reassignment to that manager leaves them untouched by design.
    let bulk = propagator.reassign_all(&regeneration.old_code, ceo.id)?;
    assert_eq!(bulk.reassigned, 0);
    assert_eq!(bulk.already_assigned, 1);

    // The audit pass is what moves the stragglers onto the new code.
    let repair_pass = auditor.audit_and_repair()?;
    assert_eq!(repair_pass.repaired, 1);

    for user_id in [first.id, second.id] {
        let user = store.get_user(user_id)?.expect("user present");
        assert_eq!(user.affiliate_code, regeneration.new_code);
    }
    assert!(auditor.audit()?.is_clean());
    Ok(())
}

#[test]
fn chat_capabilities_follow_the_latest_role_snapshot() {
    // A promoted member gains the admin pair without gaining room control.
    let before = resolve(RoomType::OneToN, OwnerRole::Member);
    assert!(!before.can_send_message);
    assert!(!before.can_manage_members);

    let after = resolve(RoomType::OneToN, OwnerRole::ViceOwner);
    assert!(after.can_send_message);
    assert!(after.can_manage_members);
    assert!(!after.can_delete_room);

    let owner = resolve(RoomType::OneToN, OwnerRole::Owner);
    assert!(owner.can_edit_room && owner.can_delete_room);
}
