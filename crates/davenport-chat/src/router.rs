//! Reasoning level to backend profile routing.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use davenport_core::config::RouterConfig;
use davenport_core::types::ReasoningLevel;

/// Opaque identifier of a pre-configured agent on the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps caller-supplied reasoning labels to backend profiles.
///
/// `resolve` is total: absent, mistyped or legacy labels all land on the
/// default profile.
#[derive(Debug, Clone)]
pub struct BackendRouter {
    profiles: HashMap<ReasoningLevel, ProfileId>,
    default: ProfileId,
}

impl BackendRouter {
    pub fn new(
        profiles: impl IntoIterator<Item = (ReasoningLevel, ProfileId)>,
        default: ProfileId,
    ) -> Self {
        Self {
            profiles: profiles.into_iter().collect(),
            default,
        }
    }

    /// Build from the `[router]` config section. Table keys that are not a
    /// known reasoning level are skipped.
    pub fn from_config(config: &RouterConfig) -> Self {
        let mut profiles = HashMap::new();
        for (label, id) in &config.profiles {
            match label.parse::<ReasoningLevel>() {
                Ok(level) => {
                    profiles.insert(level, ProfileId::new(id.clone()));
                }
                Err(e) => warn!(label = %label, "Ignoring router profile: {}", e),
            }
        }
        Self {
            profiles,
            default: ProfileId::new(config.default_profile.clone()),
        }
    }

    pub fn resolve(&self, label: Option<&str>) -> ProfileId {
        label
            .and_then(|l| l.parse::<ReasoningLevel>().ok())
            .and_then(|level| self.profiles.get(&level))
            .unwrap_or(&self.default)
            .clone()
    }

    pub fn default_profile(&self) -> &ProfileId {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> BackendRouter {
        BackendRouter::from_config(&RouterConfig::default())
    }

    #[test]
    fn test_known_labels_resolve() {
        let router = router();
        assert_eq!(router.resolve(Some("fast")).as_str(), "davenport-fast");
        assert_eq!(router.resolve(Some("balanced")).as_str(), "davenport-balanced");
        assert_eq!(router.resolve(Some("thorough")).as_str(), "davenport-assistant");
        assert_eq!(router.resolve(Some("direct")).as_str(), "davenport-direct-v1");
    }

    #[test]
    fn test_labels_are_case_insensitive() {
        assert_eq!(router().resolve(Some(" FAST ")).as_str(), "davenport-fast");
    }

    #[test]
    fn test_absent_label_uses_default() {
        assert_eq!(router().resolve(None).as_str(), "davenport-assistant");
    }

    #[test]
    fn test_unknown_labels_use_default() {
        let router = router();
        for label in ["", "medium", "minimal", "turbo", "fast!", "\u{1f680}"] {
            assert_eq!(
                router.resolve(Some(label)),
                *router.default_profile(),
                "label {:?}",
                label
            );
        }
    }

    #[test]
    fn test_level_without_profile_uses_default() {
        let router = BackendRouter::new(
            [(ReasoningLevel::Fast, ProfileId::new("agent-fast"))],
            ProfileId::new("agent-default"),
        );
        assert_eq!(router.resolve(Some("fast")).as_str(), "agent-fast");
        assert_eq!(router.resolve(Some("direct")).as_str(), "agent-default");
    }

    #[test]
    fn test_unknown_config_keys_are_skipped() {
        let mut config = RouterConfig::default();
        config
            .profiles
            .insert("quick".to_string(), "agent-quick".to_string());
        let router = BackendRouter::from_config(&config);
        assert_eq!(router.resolve(Some("quick")).as_str(), "davenport-assistant");
    }
}
