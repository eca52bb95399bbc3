//! Profile - Named polling presets for common resource transitions

use std::time::Duration;

use serde::Serialize;

use crate::config::{NotFoundPolicy, PollConfig};

/// A reusable, named [`PollConfig`]
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    /// Lookup key (e.g., "cluster-available")
    pub name: &'static str,
    pub description: &'static str,
    pub config: PollConfig,
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn mins(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// All built-in profiles
pub fn builtin_profiles() -> Vec<Profile> {
    vec![
        Profile {
            name: "cluster-available",
            description: "Kubernetes cluster finished provisioning",
            config: PollConfig::new(["normal"])
                .with_pending(["retry", "provisioning"])
                .with_failure(["critical", "failed"])
                .with_timeout(mins(90))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(10)),
        },
        Profile {
            name: "cluster-deleted",
            description: "Cluster deletion finished; a missing cluster counts as deleted",
            config: PollConfig::new(["deleted"])
                .with_pending(["deleting"])
                .with_timeout(mins(45))
                .with_initial_delay(secs(60))
                .with_poll_interval(secs(60))
                .with_min_poll_interval(secs(10))
                .with_not_found(NotFoundPolicy::Succeed),
        },
        Profile {
            name: "vpc-cluster-master-ready",
            description: "Cluster master reports Ready on five consecutive polls",
            config: PollConfig::new(["Ready"])
                .with_pending(["Deploy requested", "Deploy in progress"])
                .with_timeout(mins(90))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(5))
                .with_continuous_success_count(5),
        },
        Profile {
            name: "worker-ready",
            description: "Worker node finished provisioning",
            config: PollConfig::new(["normal"])
                .with_pending(["retry", "provisioning"])
                .with_failure(["critical", "provision_failed"])
                .with_timeout(mins(90))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(10)),
        },
        Profile {
            name: "worker-deleted",
            description: "Worker node removed; a missing worker counts as deleted",
            config: PollConfig::new(["deleted"])
                .with_pending(["deleting"])
                .with_timeout(mins(45))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(10))
                .with_not_found(NotFoundPolicy::Succeed),
        },
        Profile {
            name: "version-update",
            description: "Cluster version update settled on five consecutive polls",
            config: PollConfig::new(["normal"])
                .with_pending(["retry", "updating"])
                .with_failure(["update_failed"])
                .with_timeout(mins(90))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(10))
                .with_continuous_success_count(5),
        },
        Profile {
            name: "bare-metal-provisioned",
            description: "Bare-metal server provisioned; tolerates a day of not-found answers",
            config: PollConfig::new(["provisioned"])
                .with_pending(["retry", "pending"])
                .with_timeout(Duration::from_secs(24 * 60 * 60))
                .with_initial_delay(secs(10))
                .with_poll_interval(mins(1))
                .with_not_found(NotFoundPolicy::Tolerate(24 * 60)),
        },
        Profile {
            name: "device-active",
            description: "Bare-metal device reached active",
            config: PollConfig::new(["active"])
                .with_pending(["queued", "provisioning", "reinstalling"])
                .with_failure(["failed"])
                .with_timeout(mins(60))
                .with_initial_delay(secs(10))
                .with_poll_interval(secs(3))
                .with_backoff(crate::backoff::Backoff::new(2.0, secs(10))),
        },
        Profile {
            name: "volume-attached",
            description: "Block volume attached to its instance",
            config: PollConfig::new(["attached"])
                .with_pending(["attaching", "pending"])
                .with_failure(["failed", "error"])
                .with_timeout(mins(10))
                .with_initial_delay(secs(5))
                .with_poll_interval(secs(5)),
        },
        Profile {
            name: "volume-detached",
            description: "Block volume detached; a missing attachment counts as detached",
            config: PollConfig::new(["detached"])
                .with_pending(["detaching", "attached"])
                .with_failure(["failed", "error"])
                .with_timeout(mins(10))
                .with_initial_delay(secs(5))
                .with_poll_interval(secs(5))
                .with_not_found(NotFoundPolicy::Succeed),
        },
    ]
}

/// Look up a built-in profile by name
pub fn find_profile(name: &str) -> Option<Profile> {
    builtin_profiles().into_iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_builtin_validates() {
        for profile in builtin_profiles() {
            assert!(
                profile.config.validate().is_ok(),
                "profile {} is invalid: {:?}",
                profile.name,
                profile.config.validate()
            );
        }
    }

    #[test]
    fn names_are_unique() {
        let profiles = builtin_profiles();
        let names: HashSet<_> = profiles.iter().map(|p| p.name).collect();
        assert_eq!(names.len(), profiles.len());
    }

    #[test]
    fn find_by_name() {
        let profile = find_profile("vpc-cluster-master-ready").unwrap();
        assert_eq!(profile.config.continuous_success_count, 5);
        assert!(profile.config.is_pending("Deploy in progress"));

        let deleted = find_profile("cluster-deleted").unwrap();
        assert_eq!(deleted.config.not_found, NotFoundPolicy::Succeed);

        assert!(find_profile("database-ready").is_none());
    }

    #[test]
    fn profiles_serialize_for_listing() {
        let json = serde_json::to_value(find_profile("volume-attached").unwrap()).unwrap();
        assert_eq!(json["name"], "volume-attached");
        assert_eq!(json["config"]["timeout"], "10m");
    }
}
