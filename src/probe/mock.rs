use super::{ActivityProbe, ProbeReading};
use crate::error::ProbeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Scripted probe for tests.
///
/// Each query pops the next scripted result; once the script is exhausted
/// the fallback result is returned forever.
pub struct MockActivityProbe {
    inner: Mutex<MockProbeState>,
}

struct MockProbeState {
    script: VecDeque<Result<u32, ProbeError>>,
    fallback: Result<u32, ProbeError>,
    queries: usize,
}

impl MockActivityProbe {
    /// Always reports `count` active users
    pub fn constant(count: u32) -> Self {
        Self::scripted(Vec::new(), Ok(count))
    }

    /// Always fails
    pub fn unreachable() -> Self {
        Self::scripted(
            Vec::new(),
            Err(ProbeError::Unavailable {
                details: "mock probe unreachable".to_string(),
            }),
        )
    }

    /// Report the given counts in order, then keep reporting the last one
    pub fn sequence(counts: &[u32]) -> Self {
        let fallback = counts.last().copied().unwrap_or(0);
        Self::scripted(counts.iter().map(|c| Ok(*c)).collect(), Ok(fallback))
    }

    pub fn scripted(
        script: Vec<Result<u32, ProbeError>>,
        fallback: Result<u32, ProbeError>,
    ) -> Self {
        Self {
            inner: Mutex::new(MockProbeState {
                script: script.into(),
                fallback,
                queries: 0,
            }),
        }
    }

    /// Replace whatever remains of the script
    pub fn set_fallback(&self, fallback: Result<u32, ProbeError>) {
        let mut inner = self.inner.lock();
        inner.script.clear();
        inner.fallback = fallback;
    }

    pub fn query_count(&self) -> usize {
        self.inner.lock().queries
    }
}

#[async_trait]
impl ActivityProbe for MockActivityProbe {
    async fn query(&self) -> Result<ProbeReading, ProbeError> {
        let mut inner = self.inner.lock();
        inner.queries += 1;
        let next = match inner.script.pop_front() {
            Some(result) => result,
            None => inner.fallback.clone(),
        };
        next.map(|active_count| ProbeReading { active_count })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_reading() {
        let probe = MockActivityProbe::sequence(&[2, 0]);

        assert_eq!(probe.query().await.unwrap().active_count, 2);
        assert_eq!(probe.query().await.unwrap().active_count, 0);
        assert_eq!(probe.query().await.unwrap().active_count, 0);
        assert_eq!(probe.query_count(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_probe_fails() {
        let probe = MockActivityProbe::unreachable();
        assert!(probe.query().await.is_err());
    }
}
