use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use waitlist_rank::config::EngineConfig;
use waitlist_rank::waitlist::{
    CampaignId, CampaignSettings, Deadline, Entrant, EntrantDraft, EntrantRepository,
    InMemoryEntrantRepository, InMemorySettingsProvider, RankingEngine, ReferralSettings,
    RetryPolicy, RetryStrategy,
};

type Engine = RankingEngine<InMemoryEntrantRepository, InMemorySettingsProvider>;

const SEEDED: usize = 40;
const REFERRALS: usize = 60;

fn settings() -> Arc<InMemorySettingsProvider> {
    let referral = ReferralSettings {
        referrer_positions_to_jump: 3,
        positions_to_jump: 2,
        reward_referred: true,
        ..ReferralSettings::default()
    };
    Arc::new(
        InMemorySettingsProvider::with_fallback(CampaignSettings::from(referral))
            .expect("valid settings"),
    )
}

fn patient_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 200,
        strategy: RetryStrategy::Fixed {
            delay: std::time::Duration::from_millis(1),
        },
    }
}

/// Seed a campaign and sign up verified referrals spread over the seeded referrers.
fn prepare(engine: &Engine, campaign: &CampaignId) -> Vec<Entrant> {
    let referrers: Vec<Entrant> = (0..SEEDED)
        .map(|index| {
            engine
                .register_signup(campaign, EntrantDraft::new(format!("seed{index}@example.com")))
                .expect("seed signup")
        })
        .collect();

    (0..REFERRALS)
        .map(|index| {
            let referrer = &referrers[(index * 7) % SEEDED];
            let referred = engine
                .register_signup(
                    campaign,
                    EntrantDraft::new(format!("ref{index}@example.com")).referred_by(referrer.id),
                )
                .expect("referred signup");
            engine
                .mark_email_verified(&referred.id)
                .expect("verification");
            referred
        })
        .collect()
}

fn assert_dense_and_counted(repository: &InMemoryEntrantRepository, campaign: &CampaignId) {
    let live = repository.list_live_ordered(campaign).expect("list");
    let positions: Vec<u32> = live.iter().map(|entrant| entrant.position).collect();
    let expected: Vec<u32> = (1..=(SEEDED + REFERRALS) as u32).collect();
    assert_eq!(positions, expected, "positions must stay dense and unique");

    let referral_total: u32 = live.iter().map(|entrant| entrant.referral_count).sum();
    let verified_total: u32 = live
        .iter()
        .map(|entrant| entrant.verified_referral_count)
        .sum();
    assert_eq!(referral_total, REFERRALS as u32);
    assert_eq!(verified_total, REFERRALS as u32);
    assert!(live
        .iter()
        .filter(|entrant| entrant.referred_by.is_some())
        .all(|entrant| entrant.reward_applied));
}

#[test]
fn overlapping_rewards_keep_ranks_dense() {
    let repository = Arc::new(InMemoryEntrantRepository::new());
    let engine = Arc::new(RankingEngine::new(
        repository.clone(),
        settings(),
        EngineConfig::default(),
    ));
    let campaign = CampaignId::new("stress");
    let referred = prepare(&engine, &campaign);

    let handles: Vec<_> = referred
        .chunks(REFERRALS / 6)
        .map(|chunk| {
            let engine = engine.clone();
            let campaign = campaign.clone();
            let ids: Vec<_> = chunk.iter().map(|entrant| entrant.id).collect();
            thread::spawn(move || {
                for id in ids {
                    // Every event is delivered twice; the replay must be a no-op.
                    for _ in 0..2 {
                        engine
                            .apply_referral_reward(&campaign, &id, Deadline::none())
                            .expect("reward");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker joins");
    }

    assert_dense_and_counted(&repository, &campaign);
}

#[test]
fn engines_sharing_a_store_resolve_conflicts_through_revisions() {
    let repository = Arc::new(InMemoryEntrantRepository::new());
    let engines: Vec<Arc<Engine>> = (0..3)
        .map(|_| {
            Arc::new(
                RankingEngine::new(repository.clone(), settings(), EngineConfig::default())
                    .with_policy(patient_policy()),
            )
        })
        .collect();
    let campaign = CampaignId::new("shared");
    let referred = prepare(&engines[0], &campaign);

    let handles: Vec<_> = engines
        .iter()
        .cloned()
        .enumerate()
        .map(|(offset, engine)| {
            let campaign = campaign.clone();
            let ids: Vec<_> = referred.iter().map(|entrant| entrant.id).collect();
            thread::spawn(move || {
                let mut applied = 0usize;
                for id in ids.iter().skip(offset).chain(ids.iter().take(offset)) {
                    let outcome = engine
                        .apply_referral_reward(&campaign, id, Deadline::none())
                        .expect("reward eventually commits");
                    applied += usize::from(outcome.is_applied());
                }
                applied
            })
        })
        .collect();

    let applied: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker joins"))
        .sum();

    assert_eq!(applied, REFERRALS, "each reward commits exactly once");
    assert_dense_and_counted(&repository, &campaign);
    let codes: HashSet<_> = repository
        .snapshot(&campaign)
        .expect("snapshot")
        .into_iter()
        .map(|entrant| entrant.referral_code)
        .collect();
    assert_eq!(codes.len(), SEEDED + REFERRALS);
}

#[test]
fn verification_racing_a_signup_reward_is_credited_once() {
    const REFERRERS: usize = 8;
    const ROUNDS: usize = 48;

    let referral = ReferralSettings {
        referrer_positions_to_jump: 2,
        verified_only: false,
        ..ReferralSettings::default()
    };
    let repository = Arc::new(InMemoryEntrantRepository::new());
    let engine = Arc::new(RankingEngine::new(
        repository.clone(),
        Arc::new(
            InMemorySettingsProvider::with_fallback(CampaignSettings::from(referral))
                .expect("valid settings"),
        ),
        EngineConfig::default(),
    ));
    let campaign = CampaignId::new("ungated");
    let referrers: Vec<Entrant> = (0..REFERRERS)
        .map(|index| {
            engine
                .register_signup(&campaign, EntrantDraft::new(format!("host{index}@example.com")))
                .expect("seed signup")
        })
        .collect();

    for round in 0..ROUNDS {
        let referred = engine
            .register_signup(
                &campaign,
                EntrantDraft::new(format!("guest{round}@example.com"))
                    .referred_by(referrers[round % REFERRERS].id),
            )
            .expect("referred signup")
            .id;
        let start = Arc::new(Barrier::new(2));

        let signup_side = {
            let (engine, campaign, start) = (engine.clone(), campaign.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                engine
                    .apply_referral_reward(&campaign, &referred, Deadline::none())
                    .expect("signup reward")
            })
        };
        let verify_side = {
            let (engine, start) = (engine.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                engine
                    .verify_and_reward(&referred, Deadline::none())
                    .expect("verification")
            })
        };

        let signup_reward = signup_side.join().expect("signup side joins");
        let verification = verify_side.join().expect("verify side joins");
        assert!(verification.newly_verified);
        let verification_applied = verification
            .reward
            .as_ref()
            .is_some_and(|reward| reward.is_applied());
        assert!(
            signup_reward.is_applied() ^ verification_applied,
            "exactly one side applies the reward in round {round}"
        );
    }

    for referrer in &referrers {
        let stored = repository
            .get_by_id(&referrer.id)
            .expect("lookup")
            .expect("present");
        let per_referrer = (ROUNDS / REFERRERS) as u32;
        assert_eq!(
            (stored.referral_count, stored.verified_referral_count),
            (per_referrer, per_referrer),
            "counters of {}",
            stored.email
        );
    }
    let positions: Vec<u32> = repository
        .list_live_ordered(&campaign)
        .expect("list")
        .iter()
        .map(|entrant| entrant.position)
        .collect();
    assert_eq!(positions, (1..=(REFERRERS + ROUNDS) as u32).collect::<Vec<_>>());
}
