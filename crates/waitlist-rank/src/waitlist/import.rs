//! Replays signup exports (`email,referred_by_email,verified`) through the service.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::domain::{normalize_email, CampaignId, EntrantId, ReferralCode};
use super::ranking::ErrorKind;
use super::repository::EntrantRepository;
use super::service::{ServiceError, SignupRequest, WaitlistService};
use super::settings::SettingsProvider;

#[derive(Debug)]
pub enum ReplayError {
    Io(std::io::Error),
    Csv(csv::Error),
    Service(ServiceError),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io(err) => write!(f, "failed to read signup export: {}", err),
            ReplayError::Csv(err) => write!(f, "invalid signup CSV data: {}", err),
            ReplayError::Service(err) => write!(f, "could not replay signup: {}", err),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io(err) => Some(err),
            ReplayError::Csv(err) => Some(err),
            ReplayError::Service(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ReplayError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<ServiceError> for ReplayError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayRow {
    pub email: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub referred_by_email: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub verified: bool,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => Ok(false),
        "1" | "true" | "yes" | "y" => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "'{other}' is not a verification flag"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub signups: usize,
    /// Rows rejected as duplicates or malformed addresses.
    pub rejected: usize,
    pub unattributed_referrals: usize,
    pub verifications: usize,
    pub rewards_applied: usize,
}

/// Parsed signup export, replayed as all signups first and then the verification events.
#[derive(Debug, Clone, Default)]
pub struct SignupReplay {
    rows: Vec<ReplayRow>,
}

impl SignupReplay {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<Rd: Read>(reader: Rd) -> Result<Self, ReplayError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rows = Vec::new();
        for record in csv_reader.deserialize::<ReplayRow>() {
            rows.push(record?);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[ReplayRow] {
        &self.rows
    }

    pub fn run<R, S>(
        &self,
        service: &WaitlistService<R, S>,
        campaign: &CampaignId,
    ) -> Result<ReplaySummary, ReplayError>
    where
        R: EntrantRepository + 'static,
        S: SettingsProvider + 'static,
    {
        let mut summary = ReplaySummary::default();
        let mut registered: HashMap<String, (EntrantId, ReferralCode)> = HashMap::new();

        for row in &self.rows {
            let mut request = SignupRequest::new(row.email.clone());
            if let Some(referrer_email) = &row.referred_by_email {
                match registered.get(&normalize_email(referrer_email)) {
                    Some((_, code)) => request = request.with_referral_code(code.as_str()),
                    None => {
                        warn!(campaign = %campaign, referrer = %referrer_email, "referrer not yet registered");
                        summary.unattributed_referrals += 1;
                    }
                }
            }

            match service.signup(campaign, request) {
                Ok(receipt) => {
                    summary.signups += 1;
                    if receipt.reward.as_ref().is_some_and(|reward| reward.is_applied()) {
                        summary.rewards_applied += 1;
                    }
                    registered.insert(
                        receipt.entrant.email.clone(),
                        (receipt.entrant.id, receipt.entrant.referral_code.clone()),
                    );
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::AlreadyRegistered | ErrorKind::InvalidInput
                    ) =>
                {
                    warn!(campaign = %campaign, email = %row.email, error = %err, "row rejected");
                    summary.rejected += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        for row in self.rows.iter().filter(|row| row.verified) {
            let Some((id, _)) = registered.get(&normalize_email(&row.email)) else {
                continue;
            };
            let outcome = service.entrant_verified(id)?;
            if outcome.newly_verified {
                summary.verifications += 1;
            }
            if outcome.reward.as_ref().is_some_and(|reward| reward.is_applied()) {
                summary.rewards_applied += 1;
            }
        }

        info!(
            campaign = %campaign,
            signups = summary.signups,
            rewards = summary.rewards_applied,
            "signup replay finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_optional_columns() {
        let data = "email,referred_by_email,verified\n\
                    ada@example.com,,true\n\
                    grace@example.com, ada@example.com ,no\n\
                    linus@example.com,,\n";
        let replay = SignupReplay::from_reader(data.as_bytes()).expect("valid csv");

        assert_eq!(replay.rows().len(), 3);
        assert!(replay.rows()[0].verified);
        assert_eq!(replay.rows()[0].referred_by_email, None);
        assert_eq!(
            replay.rows()[1].referred_by_email.as_deref(),
            Some("ada@example.com")
        );
        assert!(!replay.rows()[2].verified);
    }

    #[test]
    fn rejects_unknown_verification_flags() {
        let data = "email,referred_by_email,verified\nada@example.com,,maybe\n";
        let err = SignupReplay::from_reader(data.as_bytes()).expect_err("bad flag");
        assert!(matches!(err, ReplayError::Csv(_)));
    }
}
