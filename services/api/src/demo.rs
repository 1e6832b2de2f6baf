use crate::infra::{in_memory_service, MemoryService};
use clap::Args;
use std::path::PathBuf;
use waitlist_rank::config::EngineConfig;
use waitlist_rank::error::AppError;
use waitlist_rank::waitlist::{
    CampaignId, ReferralSettings, ReplayError, ReplaySummary, ServiceError, SignupReplay,
    SignupRequest,
};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Signup export to replay (columns: email, referred_by_email, verified).
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
    /// Campaign the demo entrants join.
    #[arg(long, default_value = "demo")]
    pub(crate) campaign: String,
    /// Ranks a referrer advances per verified referral.
    #[arg(long, default_value_t = 1)]
    pub(crate) referrer_jump: u32,
    /// Ranks the referred entrant advances; zero leaves it at the tail.
    #[arg(long, default_value_t = 0)]
    pub(crate) referred_jump: u32,
    /// Leaderboard rows to print.
    #[arg(long, default_value_t = 10)]
    pub(crate) top: usize,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        csv,
        campaign,
        referrer_jump,
        referred_jump,
        top,
    } = args;

    let referral = ReferralSettings {
        referrer_positions_to_jump: referrer_jump,
        positions_to_jump: referred_jump,
        reward_referred: referred_jump > 0,
        ..ReferralSettings::default()
    };
    let (service, _) = in_memory_service(EngineConfig::default(), referral)?;
    let campaign = CampaignId::new(campaign);

    println!("Waitlist ranking demo (campaign {campaign})");
    let summary = match csv {
        Some(path) => {
            println!("Data source: {}", path.display());
            SignupReplay::from_path(&path)?.run(&service, &campaign)?
        }
        None => {
            println!("Data source: synthetic campaign");
            synthetic_campaign(&service, &campaign).map_err(ReplayError::from)?
        }
    };
    render_summary(&summary);
    render_ranking(&service, &campaign, top).map_err(ReplayError::from)?;
    Ok(())
}

/// Twelve signups where two early entrants recruit friends and one referral never verifies.
fn synthetic_campaign(
    service: &MemoryService,
    campaign: &CampaignId,
) -> Result<ReplaySummary, ServiceError> {
    let mut summary = ReplaySummary::default();
    let mut entrants = Vec::new();
    for index in 0..8 {
        let receipt = service.signup(
            campaign,
            SignupRequest::new(format!("founder{index}@example.com")),
        )?;
        summary.signups += 1;
        entrants.push(receipt.entrant);
    }

    let recruiters = [&entrants[6], &entrants[6], &entrants[3], &entrants[6]];
    for (index, recruiter) in recruiters.iter().enumerate() {
        let receipt = service.signup(
            campaign,
            SignupRequest::new(format!("friend{index}@example.com"))
                .with_referral_code(recruiter.referral_code.as_str()),
        )?;
        summary.signups += 1;
        if index == 3 {
            continue;
        }
        let verification = service.entrant_verified(&receipt.entrant.id)?;
        summary.verifications += 1;
        if verification.reward.as_ref().is_some_and(|reward| reward.is_applied()) {
            summary.rewards_applied += 1;
        }
    }
    Ok(summary)
}

fn render_summary(summary: &ReplaySummary) {
    println!(
        "- {} signups | {} rejected | {} referrals without a known referrer",
        summary.signups, summary.rejected, summary.unattributed_referrals
    );
    println!(
        "- {} verifications | {} referral rewards applied",
        summary.verifications, summary.rewards_applied
    );
}

fn render_ranking(
    service: &MemoryService,
    campaign: &CampaignId,
    top: usize,
) -> Result<(), ServiceError> {
    println!("\nLeaderboard");
    for entry in service.leaderboard(campaign, Some(top))? {
        println!(
            "  {:>3}. {:<28} position {:>3} | {} referrals",
            entry.rank, entry.display_email, entry.position, entry.referral_count
        );
    }

    let report = service.audit(campaign)?;
    if report.is_dense() {
        println!(
            "\nAudit: {} live entrants ranked 1..={}",
            report.live_count, report.live_count
        );
    } else {
        println!(
            "\nAudit: {} gaps and {} duplicate ranks; run a recompute",
            report.gap_count,
            report.duplicates.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use waitlist_rank::waitlist::EntrantRepository;

    #[test]
    fn synthetic_campaign_promotes_recruiters() {
        let (service, repository) =
            in_memory_service(EngineConfig::default(), ReferralSettings::default())
                .expect("service builds");
        let campaign = CampaignId::new("demo");

        let summary = synthetic_campaign(&service, &campaign).expect("demo runs");

        assert_eq!(summary.signups, 12);
        assert_eq!(summary.verifications, 3);
        assert_eq!(summary.rewards_applied, 3);
        let busiest = repository
            .get_by_email(&campaign, "founder6@example.com")
            .expect("lookup")
            .expect("registered");
        assert_eq!((busiest.position, busiest.referral_count), (5, 2));
        let second = repository
            .get_by_email(&campaign, "founder3@example.com")
            .expect("lookup")
            .expect("registered");
        assert_eq!((second.position, second.referral_count), (3, 1));
        assert!(service.audit(&campaign).expect("audit").is_dense());
    }
}
