use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::domain::{EntrantId, ReferralCode};
use super::repository::{EntrantRepository, RepositoryError, UniqueField};

const MIN_CODE_LENGTH: usize = 4;
const MAX_CODE_LENGTH: usize = 32;

/// Source of candidate referral codes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, length: usize) -> ReferralCode;
}

/// URL-safe alphanumeric codes drawn from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, length: usize) -> ReferralCode {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        ReferralCode(code)
    }
}

/// Trims caller input and checks it could have been issued by the registry.
pub fn parse_code(raw: &str) -> Option<ReferralCode> {
    let trimmed = raw.trim();
    let valid = (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&trimmed.len())
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ReferralCode(trimmed.to_string()))
}

/// Issues collision-checked referral codes and resolves them back to their owners.
pub struct ReferralCodeRegistry<R> {
    repository: Arc<R>,
    generator: Box<dyn CodeGenerator>,
    length: usize,
    max_attempts: u32,
}

impl<R> ReferralCodeRegistry<R>
where
    R: EntrantRepository + 'static,
{
    pub fn new(repository: Arc<R>, length: usize, max_attempts: u32) -> Self {
        Self::with_generator(repository, Box::new(RandomCodeGenerator), length, max_attempts)
    }

    pub fn with_generator(
        repository: Arc<R>,
        generator: Box<dyn CodeGenerator>,
        length: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            repository,
            generator,
            length: length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs `store` with fresh codes until one clears the unique constraint.
    ///
    /// Any failure other than a referral-code collision is returned unchanged.
    pub fn issue<T, F>(&self, mut store: F) -> Result<T, RegistryError>
    where
        F: FnMut(ReferralCode) -> Result<T, RepositoryError>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.generator.generate(self.length);
            match store(code) {
                Err(RepositoryError::Duplicate(UniqueField::ReferralCode)) => {
                    tracing::debug!(attempt, "referral code collision, regenerating");
                }
                other => return other.map_err(RegistryError::from),
            }
        }
        Err(RegistryError::Exhausted {
            attempts: self.max_attempts,
        })
    }

    /// Resolve a code to its live owner; deleted owners do not resolve.
    pub fn resolve(&self, code: &ReferralCode) -> Result<EntrantId, RegistryError> {
        match self.repository.get_by_referral_code(code)? {
            Some(entrant) if entrant.deleted_at.is_none() => Ok(entrant.id),
            _ => Err(RegistryError::NotFound(code.clone())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("referral code {0} does not resolve")]
    NotFound(ReferralCode),
    #[error("no unique referral code after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
