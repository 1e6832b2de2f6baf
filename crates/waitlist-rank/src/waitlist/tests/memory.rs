use super::common::*;

use chrono::Utc;

use crate::waitlist::domain::EntrantStatus;
use crate::waitlist::repository::{
    CounterIncrement, EntrantRepository, PositionAssignment, RankingBatch, RepositoryError,
    UniqueField,
};

#[test]
fn commit_rejects_positions_held_by_unmoved_entrants() {
    let (engine, repository) = build_engine(referral_settings(1));
    let campaign = campaign();
    let seeded = seed(&engine, &campaign, 3);

    let result = repository.bulk_set_positions(
        &campaign,
        &[PositionAssignment {
            entrant_id: seeded[2].id,
            position: 1,
        }],
    );

    assert!(matches!(
        result,
        Err(RepositoryError::Duplicate(UniqueField::Position))
    ));
    assert_eq!(position_of(repository.as_ref(), &seeded[2].id), 3);
}

#[test]
fn commit_checks_the_campaign_revision() {
    let (engine, repository) = build_engine(referral_settings(1));
    let campaign = campaign();
    let seeded = seed(&engine, &campaign, 2);
    let stats = repository.live_stats(&campaign).expect("stats");

    let swap = vec![
        PositionAssignment {
            entrant_id: seeded[0].id,
            position: 2,
        },
        PositionAssignment {
            entrant_id: seeded[1].id,
            position: 1,
        },
    ];
    let stale = RankingBatch::positions(campaign.clone(), Some(stats.revision + 1), swap.clone());
    assert!(matches!(
        repository.commit(stale),
        Err(RepositoryError::Conflict(_))
    ));

    let receipt = repository
        .commit(RankingBatch::positions(
            campaign.clone(),
            Some(stats.revision),
            swap,
        ))
        .expect("swap commits");
    assert_eq!(receipt.positions_written, 2);
    assert_eq!(receipt.revision, stats.revision + 1);
    assert_eq!(position_of(repository.as_ref(), &seeded[0].id), 2);
}

#[test]
fn failed_batches_leave_counters_untouched() {
    let (engine, repository) = build_engine(referral_settings(1));
    let campaign = campaign();
    let seeded = seed(&engine, &campaign, 2);

    let batch = RankingBatch {
        campaign_id: campaign.clone(),
        expected_revision: None,
        positions: vec![PositionAssignment {
            entrant_id: seeded[1].id,
            position: 0,
        }],
        counters: vec![CounterIncrement {
            entrant_id: seeded[0].id,
            referral: true,
            verified_referral: true,
        }],
        reward_marks: vec![seeded[1].id],
    };
    assert!(matches!(
        repository.commit(batch),
        Err(RepositoryError::Rejected(_))
    ));

    let referrer = repository
        .get_by_id(&seeded[0].id)
        .expect("lookup")
        .expect("present");
    assert_eq!(referrer.referral_count, 0);
    let referred = repository
        .get_by_id(&seeded[1].id)
        .expect("lookup")
        .expect("present");
    assert!(!referred.reward_applied);
}

#[test]
fn verified_count_never_exceeds_referral_count() {
    let (engine, repository) = build_engine(referral_settings(1));
    let seeded = seed(&engine, &campaign(), 1);

    assert!(matches!(
        repository.increment_counters(&seeded[0].id, false, true),
        Err(RepositoryError::Rejected(_))
    ));
    repository
        .increment_counters(&seeded[0].id, true, false)
        .expect("referral");
    repository
        .increment_counters(&seeded[0].id, false, true)
        .expect("verified referral");
}

#[test]
fn email_verification_flips_once() {
    let (engine, repository) = build_engine(referral_settings(1));
    let seeded = seed(&engine, &campaign(), 1);

    assert!(repository
        .mark_email_verified(&seeded[0].id)
        .expect("first"));
    assert!(!repository
        .mark_email_verified(&seeded[0].id)
        .expect("replay"));
    let stored = repository
        .get_by_id(&seeded[0].id)
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.status, EntrantStatus::Verified);
}

#[test]
fn blocked_entrants_cannot_be_readmitted_without_a_slot() {
    let (engine, repository) = build_engine(referral_settings(1));
    let seeded = seed(&engine, &campaign(), 2);
    repository
        .set_status(&seeded[0].id, EntrantStatus::Blocked)
        .expect("block");

    assert!(matches!(
        repository.set_status(&seeded[0].id, EntrantStatus::Pending),
        Err(RepositoryError::Rejected(_))
    ));
}

#[test]
fn soft_delete_is_idempotent_and_keeps_the_row() {
    let (engine, repository) = build_engine(referral_settings(1));
    let campaign = campaign();
    let seeded = seed(&engine, &campaign, 2);
    let first = repository
        .soft_delete(&seeded[0].id, Utc::now())
        .expect("delete");
    let second = repository
        .soft_delete(&seeded[0].id, Utc::now())
        .expect("repeat delete");

    assert_eq!(first.deleted_at, second.deleted_at);
    assert_eq!(repository.snapshot(&campaign).expect("snapshot").len(), 2);
    assert_eq!(repository.live_stats(&campaign).expect("stats").live_count, 1);
    assert!(repository
        .get_by_email(&campaign, &seeded[0].email)
        .expect("lookup")
        .is_some());
}
