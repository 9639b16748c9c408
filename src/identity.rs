use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

const DEFAULT_AGENTS: [&str; 10] = [
    // Mobile Safari
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.5 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Mobile/15E148 Safari/604.1",
    // Chrome mobile
    "Mozilla/5.0 (Linux; Android 12; SM-G975F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/103.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/102.0.0.0 Mobile Safari/537.36",
    // Desktop Chrome
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/103.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/103.0.0.0 Safari/537.36",
    // Desktop Safari
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.5 Safari/605.1.15",
    // Firefox
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:102.0) Gecko/20100101 Firefox/102.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:102.0) Gecko/20100101 Firefox/102.0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// Always hand out the first identity.
    Fixed,
    RoundRobin,
    Random,
}

/// Hands out outbound user-agent strings. Safe to share between requests.
#[derive(Debug)]
pub struct IdentityRotator {
    agents: Vec<String>,
    cursor: AtomicUsize,
    mode: RotationMode,
}

impl IdentityRotator {
    pub fn new(mode: RotationMode) -> Self {
        Self::with_agents(DEFAULT_AGENTS.iter().map(ToString::to_string).collect(), mode)
    }

    /// An empty list falls back to the built-in pool.
    pub fn with_agents(agents: Vec<String>, mode: RotationMode) -> Self {
        let agents = if agents.is_empty() {
            DEFAULT_AGENTS.iter().map(ToString::to_string).collect()
        } else {
            agents
        };

        Self {
            agents,
            cursor: AtomicUsize::new(0),
            mode,
        }
    }

    pub fn from_flags(rotate: bool, random: bool) -> Self {
        let mode = match (rotate, random) {
            (false, _) => RotationMode::Fixed,
            (true, true) => RotationMode::Random,
            (true, false) => RotationMode::RoundRobin,
        };
        Self::new(mode)
    }

    pub fn next(&self) -> String {
        let index = match self.mode {
            RotationMode::Fixed => 0,
            RotationMode::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len()
            }
            RotationMode::Random => rand::thread_rng().gen_range(0..self.agents.len()),
        };
        self.agents[index].clone()
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn mode(&self) -> RotationMode {
        self.mode
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        Self::new(RotationMode::Random)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    fn agents(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let rotator = IdentityRotator::with_agents(agents(&["a", "b", "c"]), RotationMode::RoundRobin);
        let seen: Vec<_> = (0..7).map(|_| rotator.next()).collect();
        assert_eq!(seen, ["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn random_stays_within_pool() {
        let rotator = IdentityRotator::with_agents(agents(&["a", "b"]), RotationMode::Random);
        for _ in 0..50 {
            let agent = rotator.next();
            assert!(agent == "a" || agent == "b");
        }
    }

    #[test]
    fn fixed_mode_never_rotates() {
        let rotator = IdentityRotator::from_flags(false, true);
        assert_eq!(rotator.mode(), RotationMode::Fixed);
        let first = rotator.next();
        assert!((0..5).all(|_| rotator.next() == first));
    }

    #[test]
    fn empty_pool_uses_defaults() {
        let rotator = IdentityRotator::with_agents(Vec::new(), RotationMode::RoundRobin);
        assert_eq!(rotator.agents().len(), DEFAULT_AGENTS.len());
    }

    #[test]
    fn concurrent_round_robin_hands_out_every_agent() {
        let rotator = Arc::new(IdentityRotator::with_agents(
            agents(&["a", "b", "c", "d"]),
            RotationMode::RoundRobin,
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || rotator.next())
            })
            .collect();

        let seen: HashSet<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(seen.len(), 4);
    }
}
