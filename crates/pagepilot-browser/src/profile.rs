//! Fingerprint profile rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

use pagepilot_core::FingerprintProfile;

/// Round-robin rotation over the configured fingerprint profiles.
///
/// One profile is handed out per context acquisition so consecutive tasks
/// do not present identical browser fingerprints.
pub struct ProfileRotation {
    profiles: Vec<FingerprintProfile>,
    cursor: AtomicUsize,
}

impl ProfileRotation {
    /// Build a rotation; an empty list falls back to the built-in profiles.
    pub fn new(profiles: Vec<FingerprintProfile>) -> Self {
        let profiles = if profiles.is_empty() {
            default_profiles()
        } else {
            profiles
        };
        Self {
            profiles,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next profile in rotation.
    pub fn next(&self) -> FingerprintProfile {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.profiles.len();
        self.profiles[index].clone()
    }

    /// Number of distinct profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Built-in desktop profiles used when none are configured.
pub fn default_profiles() -> Vec<FingerprintProfile> {
    vec![
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        },
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1440,
            viewport_height: 900,
        },
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1366,
            viewport_height: 768,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_wraps() {
        let rotation = ProfileRotation::new(default_profiles());
        let n = rotation.len();
        let first = rotation.next().user_agent;
        for _ in 1..n {
            rotation.next();
        }
        // After a full cycle the same profile comes back.
        assert_eq!(rotation.next().user_agent, first);
    }

    #[test]
    fn test_empty_falls_back_to_defaults() {
        let rotation = ProfileRotation::new(Vec::new());
        assert!(!rotation.is_empty());
        assert_eq!(rotation.len(), 3);
    }

    #[test]
    fn test_configured_profiles_used() {
        let rotation = ProfileRotation::new(vec![FingerprintProfile {
            user_agent: "custom".to_string(),
            viewport_width: 800,
            viewport_height: 600,
        }]);
        assert_eq!(rotation.next().user_agent, "custom");
        assert_eq!(rotation.next().user_agent, "custom");
    }
}
