//! TTL policy resolution by status class and request path

use crate::config::{CacheConfig, TtlOverrides, TtlPolicy};
use regex::Regex;
use tracing::{debug, warn};

/// Status-code class used for TTL selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Ok,
    Redirects,
    ClientError,
    ServerError,
}

impl StatusClass {
    fn from_status(status: u16) -> Self {
        match status / 100 {
            2 => StatusClass::Ok,
            3 => StatusClass::Redirects,
            4 => StatusClass::ClientError,
            // 1xx and out-of-range codes take the server-error class,
            // the shortest-lived TTL
            _ => StatusClass::ServerError,
        }
    }
}

impl TtlOverrides {
    fn for_class(&self, class: StatusClass) -> Option<u32> {
        match class {
            StatusClass::Ok => self.ok,
            StatusClass::Redirects => self.redirects,
            StatusClass::ClientError => self.client_error,
            StatusClass::ServerError => self.server_error,
        }
    }
}

impl TtlPolicy {
    fn for_class(&self, class: StatusClass) -> u32 {
        match class {
            StatusClass::Ok => self.ok,
            StatusClass::Redirects => self.redirects,
            StatusClass::ClientError => self.client_error,
            StatusClass::ServerError => self.server_error,
        }
    }
}

/// A profile with its path patterns compiled
struct CompiledProfile {
    name: String,
    patterns: Vec<Regex>,
    ttl: TtlOverrides,
}

/// Resolves a TTL in seconds from an HTTP status and a request path
///
/// Resolution order: first profile whose regex matches the path (profiles
/// in declaration order, patterns in order within a profile), then the
/// `default` profile, then the global policy whose field defaults are the
/// hardcoded floors (`ok=300, redirects=300, client_error=60,
/// server_error=10`).
pub struct TtlResolver {
    profiles: Vec<CompiledProfile>,
    default_profile: Option<TtlOverrides>,
    global: TtlPolicy,
}

impl TtlResolver {
    /// Build a resolver from configuration, compiling profile regexes
    ///
    /// A profile pattern that fails to compile is skipped with a warning;
    /// it never prevents startup.
    pub fn new(config: &CacheConfig) -> Self {
        let mut profiles = Vec::new();
        let mut default_profile = None;

        for profile in &config.profiles {
            if profile.name == "default" {
                // The default profile is a fallback, never matched by path
                default_profile = Some(profile.ttl);
                continue;
            }

            let mut patterns = Vec::new();
            for pattern in &profile.patterns {
                match Regex::new(pattern) {
                    Ok(re) => patterns.push(re),
                    Err(e) => {
                        warn!(
                            "Skipping invalid pattern '{}' in TTL profile '{}': {}",
                            pattern, profile.name, e
                        );
                    }
                }
            }

            if patterns.is_empty() {
                warn!(
                    "TTL profile '{}' has no usable patterns and will never match",
                    profile.name
                );
            }

            profiles.push(CompiledProfile {
                name: profile.name.clone(),
                patterns,
                ttl: profile.ttl,
            });
        }

        TtlResolver {
            profiles,
            default_profile,
            global: config.ttl,
        }
    }

    /// Resolve the TTL in seconds for a response status and request path
    pub fn resolve(&self, status: u16, path: &str) -> u32 {
        let class = StatusClass::from_status(status);

        if let Some(profile) = self.match_profile(path) {
            if let Some(ttl) = profile.ttl.for_class(class) {
                debug!(
                    "TTL {}s from profile '{}' for status={} path={}",
                    ttl, profile.name, status, path
                );
                return ttl;
            }
        }

        if let Some(ttl) = self.default_profile.and_then(|d| d.for_class(class)) {
            debug!(
                "TTL {}s from default profile for status={} path={}",
                ttl, status, path
            );
            return ttl;
        }

        let ttl = self.global.for_class(class);
        debug!(
            "TTL {}s from global policy for status={} path={}",
            ttl, status, path
        );
        ttl
    }

    fn match_profile(&self, path: &str) -> Option<&CompiledProfile> {
        self.profiles
            .iter()
            .find(|p| p.patterns.iter().any(|re| re.is_match(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlProfileConfig;

    fn config_with_profiles(profiles: Vec<TtlProfileConfig>) -> CacheConfig {
        CacheConfig {
            profiles,
            ..Default::default()
        }
    }

    #[test]
    fn test_global_policy_by_status_class() {
        let resolver = TtlResolver::new(&CacheConfig::default());
        assert_eq!(resolver.resolve(200, "/a"), 300);
        assert_eq!(resolver.resolve(301, "/a"), 300);
        assert_eq!(resolver.resolve(404, "/a"), 60);
        assert_eq!(resolver.resolve(503, "/a"), 10);
    }

    #[test]
    fn test_profile_override_wins() {
        let config = config_with_profiles(vec![TtlProfileConfig {
            name: "video".to_string(),
            patterns: vec!["^/video/".to_string()],
            ttl: TtlOverrides {
                ok: Some(86400),
                ..Default::default()
            },
        }]);
        let resolver = TtlResolver::new(&config);

        assert_eq!(resolver.resolve(200, "/video/clip.mp4"), 86400);
        // Unmatched path falls through to the global policy
        assert_eq!(resolver.resolve(200, "/images/photo.jpg"), 300);
        // Class the profile does not override falls through as well
        assert_eq!(resolver.resolve(404, "/video/clip.mp4"), 60);
    }

    #[test]
    fn test_first_matching_profile_wins() {
        let config = config_with_profiles(vec![
            TtlProfileConfig {
                name: "specific".to_string(),
                patterns: vec!["^/media/hot/".to_string()],
                ttl: TtlOverrides {
                    ok: Some(30),
                    ..Default::default()
                },
            },
            TtlProfileConfig {
                name: "broad".to_string(),
                patterns: vec!["^/media/".to_string()],
                ttl: TtlOverrides {
                    ok: Some(3600),
                    ..Default::default()
                },
            },
        ]);
        let resolver = TtlResolver::new(&config);

        assert_eq!(resolver.resolve(200, "/media/hot/live.mp4"), 30);
        assert_eq!(resolver.resolve(200, "/media/cold/old.mp4"), 3600);
    }

    #[test]
    fn test_default_profile_fallback() {
        let config = config_with_profiles(vec![TtlProfileConfig {
            name: "default".to_string(),
            patterns: Vec::new(),
            ttl: TtlOverrides {
                ok: Some(1200),
                ..Default::default()
            },
        }]);
        let resolver = TtlResolver::new(&config);

        assert_eq!(resolver.resolve(200, "/anything"), 1200);
        // The default profile is never matched by path patterns
        assert_eq!(resolver.resolve(404, "/anything"), 60);
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let config = config_with_profiles(vec![TtlProfileConfig {
            name: "broken".to_string(),
            patterns: vec!["[unclosed".to_string(), "^/ok/".to_string()],
            ttl: TtlOverrides {
                ok: Some(99),
                ..Default::default()
            },
        }]);
        let resolver = TtlResolver::new(&config);

        // The valid pattern still works after the invalid one is skipped
        assert_eq!(resolver.resolve(200, "/ok/file.mp4"), 99);
        assert_eq!(resolver.resolve(200, "/other"), 300);
    }

    #[test]
    fn test_error_status_gets_short_ttl() {
        let config = CacheConfig {
            ttl: TtlPolicy {
                ok: 300,
                client_error: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        let resolver = TtlResolver::new(&config);
        assert_eq!(resolver.resolve(404, "/thumb.jpg"), 60);
        assert_eq!(resolver.resolve(200, "/thumb.jpg"), 300);
    }

    #[test]
    fn test_informational_status_takes_server_error_ttl() {
        let config = CacheConfig::default();
        let resolver = TtlResolver::new(&config);
        assert_eq!(resolver.resolve(100, "/clip.mp4"), resolver.resolve(500, "/clip.mp4"));
    }
}
