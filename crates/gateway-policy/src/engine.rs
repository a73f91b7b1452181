use gateway_schemas::{PolicyAction, PolicyDecision};
use serde::{Deserialize, Serialize};

/// Governance settings for one project. `known_shared_spaces` covers spaces
/// that are neither `private:` nor `team:` prefixed but are still allowed
/// (e.g. a project-wide shared space with a bare name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub project_key: String,
    pub team_write_enabled: bool,
    #[serde(default)]
    pub known_shared_spaces: Vec<String>,
}

/// Ordered, pure policy evaluation — the only component that decides
/// `final_space`. First matching rule wins; no IO, no wall-clock.
///
/// 1. `team:`-prefixed space with team writes disabled redirects to the
///    actor's private space.
/// 2. `private:`/`team:`-prefixed or a known shared space is allowed as-is.
/// 3. Anything else is rejected — default-deny for unrecognized space
///    syntax.
pub fn decide(
    actor: &str,
    target_space: &str,
    settings: &Settings,
    private_space_prefix: &str,
) -> PolicyDecision {
    if target_space.starts_with("team:") && !settings.team_write_enabled {
        return PolicyDecision {
            action: PolicyAction::Redirect,
            final_space: format!("{private_space_prefix}{actor}"),
            reason: Some("policy:team_write_disabled".to_string()),
        };
    }

    if target_space.starts_with("private:")
        || target_space.starts_with("team:")
        || settings
            .known_shared_spaces
            .iter()
            .any(|s| s == target_space)
    {
        return PolicyDecision {
            action: PolicyAction::Allow,
            final_space: target_space.to_string(),
            reason: None,
        };
    }

    PolicyDecision {
        action: PolicyAction::Reject,
        final_space: target_space.to_string(),
        reason: Some("unknown_space_type".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            project_key: "proj-1".to_string(),
            team_write_enabled: true,
            known_shared_spaces: vec![],
        }
    }

    #[test]
    fn allows_team_space_when_team_write_enabled() {
        let d = decide("alice", "team:alpha", &settings(), "private:");
        assert_eq!(d.action, PolicyAction::Allow);
        assert_eq!(d.final_space, "team:alpha");
    }

    #[test]
    fn allows_private_space() {
        let d = decide("alice", "private:alice", &settings(), "private:");
        assert_eq!(d.action, PolicyAction::Allow);
        assert_eq!(d.final_space, "private:alice");
    }

    #[test]
    fn allows_known_shared_space() {
        let mut s = settings();
        s.known_shared_spaces.push("shared-docs".to_string());
        let d = decide("alice", "shared-docs", &s, "private:");
        assert_eq!(d.action, PolicyAction::Allow);
    }

    #[test]
    fn unknown_space_type_is_rejected_by_default() {
        let d = decide("alice", "scratch/alice", &settings(), "private:");
        assert_eq!(d.action, PolicyAction::Reject);
        assert_eq!(d.reason.as_deref(), Some("unknown_space_type"));
    }

    #[test]
    fn team_write_disabled_redirects_to_private_space_with_configured_prefix() {
        let mut s = settings();
        s.team_write_enabled = false;
        let d = decide("alice", "team:restricted", &s, "private:");
        assert_eq!(d.action, PolicyAction::Redirect);
        assert_eq!(d.final_space, "private:alice");
        assert_eq!(d.reason.as_deref(), Some("policy:team_write_disabled"));
    }

    #[test]
    fn team_write_disabled_does_not_affect_private_space() {
        let mut s = settings();
        s.team_write_enabled = false;
        let d = decide("alice", "private:alice", &s, "private:");
        assert_eq!(d.action, PolicyAction::Allow);
    }

    #[test]
    fn private_space_prefix_is_configurable() {
        let mut s = settings();
        s.team_write_enabled = false;
        let d = decide("alice", "team:restricted", &s, "scratch:");
        assert_eq!(d.final_space, "scratch:alice");
    }
}
