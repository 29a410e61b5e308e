use phf::phf_map;

use super::flags::EMPTY_VALUE;

/// Kubelet flags that replace the cluster-wide values on Windows nodes
///
/// Paths are relative to the `c:\k` directory the Windows node bootstrap script installs into
pub static OVERRIDES: phf::Map<&'static str, &'static str> = phf_map! {
  "--azure-container-registry-config" => r"c:\k\azure.json",
  "--pod-infra-container-image" => "kubletwin/pause",
  "--kubeconfig" => r"c:\k\config",
  "--cloud-config" => r"c:\k\azure.json",
  "--cgroups-per-qos" => "false",
  "--enforce-node-allocatable" => EMPTY_VALUE,
  "--system-reserved" => "memory=2Gi",
  "--hairpin-mode" => "promiscuous-bridge",
  "--image-pull-progress-deadline" => "20m",
  "--resolv-conf" => EMPTY_VALUE,
  "--eviction-hard" => EMPTY_VALUE,
};

/// Client CA bundle used to authenticate requests to a secure kubelet
pub const CLIENT_CA_FILE: &str = r"c:\k\ca.crt";

/// Linux-only flags that are never passed to a Windows kubelet
pub const UNSUPPORTED: &[&str] = &["--pod-manifest-path", "--protect-kernel-defaults"];
