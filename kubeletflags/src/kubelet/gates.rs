use semver::Version;

/// A minimum Kubernetes version, inclusive
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MinVersion(pub u64, pub u64);

impl MinVersion {
  pub fn matches(&self, ver: &Version) -> bool {
    crate::utils::is_version_ge(ver, self.0, self.1, 0)
  }
}

/// `--rotate-certificates` and the server certificate feature gate are supported from here
pub const ROTATE_CERTIFICATES: MinVersion = MinVersion(1, 11);

/// `--cadvisor-port` was removed from kubelet
pub const CADVISOR_PORT_REMOVED: MinVersion = MinVersion(1, 12);

/// Device plugins superseded the `Accelerators` gate
pub const ACCELERATORS_REMOVED: MinVersion = MinVersion(1, 11);
pub const ACCELERATORS: MinVersion = MinVersion(1, 6);

/// Feature gates enabled on every node, by the version that introduced them
const FEATURE_GATES: &[(MinVersion, &str)] = &[
  (MinVersion(1, 8), "PodPriority=true"),
  (ROTATE_CERTIFICATES, "RotateKubeletServerCertificate=true"),
];

/// The feature gate tokens enabled by default for the given version
pub fn feature_gates(ver: &Version) -> Vec<&'static str> {
  FEATURE_GATES
    .iter()
    .filter(|(min, _)| min.matches(ver))
    .map(|(_, token)| *token)
    .collect()
}

/// Components whose image tag or setting is pinned per release
#[derive(Debug, PartialEq, Eq)]
pub struct Components {
  /// Pause (pod infrastructure) image, relative to the image base
  pub pause: &'static str,
  /// `--node-status-update-frequency`
  pub node_status_update_frequency: &'static str,
}

/// Sorted ascending; the last entry at or below a version applies to it
const COMPONENTS: &[(MinVersion, Components)] = &[
  (
    MinVersion(1, 6),
    Components {
      pause: "pause-amd64:3.0",
      node_status_update_frequency: "10s",
    },
  ),
  (
    MinVersion(1, 8),
    Components {
      pause: "pause-amd64:3.1",
      node_status_update_frequency: "10s",
    },
  ),
];

/// The pinned components for a version; `None` for releases older than the table
pub fn components(ver: &Version) -> Option<&'static Components> {
  COMPONENTS
    .iter()
    .rev()
    .find(|(min, _)| min.matches(ver))
    .map(|(_, components)| components)
}
