//! IV generation from prioritized randomness sources

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;

use crate::error::{ErrorCategory, ErrorKind, Result, StreamcryptError};

/// Trait for producing cryptographically secure random bytes
pub trait RandomSource: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Fill `dest` entirely with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// The operating system CSPRNG (`getrandom` and friends)
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn name(&self) -> &str {
        "os"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(dest).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Encrypt,
                ErrorKind::RandomnessUnavailable,
                "operating system randomness unavailable",
                e,
            )
        })
    }
}

/// rand's thread-local CSPRNG, periodically reseeded from the OS
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn name(&self) -> &str {
        "thread"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        rand::thread_rng().try_fill_bytes(dest).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Encrypt,
                ErrorKind::RandomnessUnavailable,
                "thread-local randomness unavailable",
                e,
            )
        })
    }
}

/// Repeats a fixed byte pattern, so every IV it produces is identical.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FixedRandom {
    pattern: Vec<u8>,
}

#[cfg(test)]
impl FixedRandom {
    pub(crate) fn new(pattern: Vec<u8>) -> Self {
        Self { pattern }
    }
}

#[cfg(test)]
impl RandomSource for FixedRandom {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        if self.pattern.is_empty() {
            return Err(StreamcryptError::with_kind(
                ErrorCategory::Encrypt,
                ErrorKind::RandomnessUnavailable,
                "fixed randomness pattern is empty",
            ));
        }
        for (d, s) in dest.iter_mut().zip(self.pattern.iter().cycle()) {
            *d = *s;
        }
        Ok(())
    }
}

/// Generates IVs from the first source in priority order that succeeds
///
/// Every failover is logged. If all sources fail the error of the last one
/// is returned; there is no fallback to a non-cryptographic generator.
#[derive(Clone)]
pub struct IvGenerator {
    sources: Vec<Arc<dyn RandomSource>>,
}

impl IvGenerator {
    /// Builds a generator over `sources`, highest priority first.
    pub fn new(sources: Vec<Arc<dyn RandomSource>>) -> Self {
        Self { sources }
    }

    /// Generate `len` random bytes.
    pub fn generate(&self, len: usize) -> Result<Vec<u8>> {
        let mut iv = vec![0u8; len];
        let mut last_err = None;

        for source in &self.sources {
            match source.fill(&mut iv) {
                Ok(()) => return Ok(iv),
                Err(e) => {
                    warn!(source = source.name(), "randomness source failed, trying next: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => e.with_context("no randomness source could generate an IV"),
            None => StreamcryptError::with_kind(
                ErrorCategory::Encrypt,
                ErrorKind::RandomnessUnavailable,
                "no randomness sources configured",
            ),
        })
    }
}

impl Default for IvGenerator {
    /// OS randomness first, then the thread-local CSPRNG.
    fn default() -> Self {
        Self::new(vec![Arc::new(OsRandom), Arc::new(ThreadRandom)])
    }
}

impl fmt::Debug for IvGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingRandom {
        calls: Arc<AtomicUsize>,
    }

    impl RandomSource for FailingRandom {
        fn name(&self) -> &str {
            "failing"
        }

        fn fill(&self, _dest: &mut [u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StreamcryptError::with_kind(
                ErrorCategory::Encrypt,
                ErrorKind::RandomnessUnavailable,
                "simulated failure",
            ))
        }
    }

    #[test]
    fn test_default_generates_requested_length() {
        let generator = IvGenerator::default();
        let a = generator.generate(16).unwrap();
        let b = generator.generate(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b, "two random IVs should differ");
    }

    #[test]
    fn test_fails_over_to_next_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = IvGenerator::new(vec![
            Arc::new(FailingRandom {
                calls: calls.clone(),
            }),
            Arc::new(FixedRandom::new(vec![0xAB])),
        ]);

        assert_eq!(generator.generate(4).unwrap(), vec![0xAB; 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prefers_first_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = IvGenerator::new(vec![
            Arc::new(FixedRandom::new(vec![1, 2])),
            Arc::new(FailingRandom {
                calls: calls.clone(),
            }),
        ]);

        assert_eq!(generator.generate(5).unwrap(), vec![1, 2, 1, 2, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_sources_failing() {
        let generator = IvGenerator::new(vec![Arc::new(FailingRandom {
            calls: Arc::new(AtomicUsize::new(0)),
        })]);

        let err = generator.generate(16).expect_err("expected failure");
        assert_eq!(err.category, ErrorCategory::Encrypt);
        assert_eq!(err.kind, Some(ErrorKind::RandomnessUnavailable));
    }

    #[test]
    fn test_no_sources() {
        let err = IvGenerator::new(Vec::new())
            .generate(16)
            .expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::RandomnessUnavailable));
    }
}
