use std::{fs, path::Path};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::kubelet::FlagMap;

/// Name of the add-on that runs the IP masquerade agent on every node
pub const IP_MASQ_AGENT_ADDON_NAME: &str = "ip-masq-agent";

/// Name of the add-on that exposes NVIDIA GPUs as an extended resource
pub const NVIDIA_DEVICE_PLUGIN_ADDON_NAME: &str = "nvidia-device-plugin";

/// ClusterSpec is the declarative description of a cluster that kubelet flags are derived from
///
/// Only the fields that influence the kubelet flags are modeled; everything else in a
/// cluster definition is carried through untouched so it is written back out as it was read
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
  /// The Kubernetes release the cluster runs (i.e. `1.14.1`)
  #[serde(default)]
  pub orchestrator_version: String,

  /// Cluster-wide Kubernetes settings, including the cluster-wide kubelet flags
  #[serde(default)]
  pub kubernetes_config: KubernetesConfig,

  /// Settings for control plane nodes, when the control plane is self-managed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub master_profile: Option<MasterProfile>,

  /// Settings for each pool of worker nodes
  #[serde(default)]
  pub agent_pool_profiles: Vec<AgentPoolProfile>,

  /// Present when the control plane is hosted by the platform
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hosted_master_profile: Option<HostedMasterProfile>,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

impl ClusterSpec {
  /// Read a cluster specification from a JSON, YAML, or TOML file
  ///
  /// The format is selected by the file extension
  pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!("Read {} bytes from {}", contents.len(), path.display());

    let spec = match path.extension().and_then(|ext| ext.to_str()) {
      Some("json") => serde_json::from_str(&contents)?,
      Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
      Some("toml") => toml::from_str(&contents)?,
      _ => bail!(
        "Unsupported cluster specification format for {}; expected .json, .yaml, .yml, or .toml",
        path.display()
      ),
    };

    Ok(spec)
  }

  /// Returns the add-on with the given name, if declared
  pub fn addon(&self, name: &str) -> Option<&Addon> {
    self.kubernetes_config.addons.iter().find(|addon| addon.name == name)
  }

  /// Determines whether the IP masquerade agent has been turned off
  ///
  /// A hosted control plane carries its own setting which takes precedence over the
  /// add-on; an add-on that is declared without an explicit state counts as enabled
  pub fn is_ip_masq_agent_disabled(&self) -> bool {
    if let Some(hosted) = &self.hosted_master_profile {
      return !hosted.ip_masq_agent;
    }

    matches!(
      self.addon(IP_MASQ_AGENT_ADDON_NAME),
      Some(Addon { enabled: Some(false), .. })
    )
  }

  /// Determines whether the NVIDIA device plugin add-on has been turned on
  pub fn is_nvidia_device_plugin_enabled(&self) -> bool {
    matches!(
      self.addon(NVIDIA_DEVICE_PLUGIN_ADDON_NAME),
      Some(Addon { enabled: Some(true), .. })
    )
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
  /// The network plugin nodes use to wire pods into the cluster network
  #[serde(skip_serializing_if = "Option::is_none")]
  pub network_plugin: Option<NetworkPlugin>,

  /// The network policy engine, if any
  #[serde(skip_serializing_if = "Option::is_none")]
  pub network_policy: Option<NetworkPolicy>,

  /// Run the cloud provider integration out of tree in the cloud-controller-manager
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_cloud_controller_manager: Option<bool>,

  /// Require authenticated and authorized access to the kubelet API
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enable_secure_kubelet: Option<bool>,

  /// The CIDR from which pod IPs are allocated
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cluster_subnet: Option<String>,

  /// The cluster IP of the DNS service
  #[serde(rename = "dnsServiceIP", skip_serializing_if = "Option::is_none")]
  pub dns_service_ip: Option<String>,

  /// Registry (and optional repository path) that control plane images are pulled from
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kubernetes_image_base: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub addons: Vec<Addon>,

  /// Cluster-wide kubelet flags; user supplied values survive defaulting
  #[serde(default)]
  pub kubelet_config: FlagMap,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterProfile {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub distro: Option<Distro>,

  /// Kubelet flags for control plane nodes
  #[serde(default)]
  pub kubelet_config: FlagMap,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
  pub name: String,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub vm_size: Option<String>,

  #[serde(default)]
  pub os_type: OsType,

  /// Only meaningful for Linux pools
  #[serde(skip_serializing_if = "Option::is_none")]
  pub distro: Option<Distro>,

  /// Kubelet flags for the nodes of this pool
  #[serde(default)]
  pub kubelet_config: FlagMap,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

impl AgentPoolProfile {
  /// N-series VM sizes carry NVIDIA GPUs
  pub fn is_gpu(&self) -> bool {
    self.vm_size.as_deref().map_or(false, |size| size.contains("Standard_N"))
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedMasterProfile {
  /// The IP masquerade agent runs on the nodes
  #[serde(default)]
  pub ip_masq_agent: bool,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
  pub name: String,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,

  /// Add-on settings that do not affect kubelet flags (containers, config, ...)
  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
  #[default]
  Linux,
  Windows,
}

/// Values that are not recognized are kept verbatim so they round-trip
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkPlugin {
  Kubenet,
  /// Azure VNET CNI; pods receive addresses from the virtual network
  Azure,
  Flannel,
  Cilium,
  Unknown(String),
}

impl NetworkPlugin {
  pub fn as_str(&self) -> &str {
    match self {
      NetworkPlugin::Kubenet => "kubenet",
      NetworkPlugin::Azure => "azure",
      NetworkPlugin::Flannel => "flannel",
      NetworkPlugin::Cilium => "cilium",
      NetworkPlugin::Unknown(plugin) => plugin,
    }
  }

  /// The value kubelet expects for `--network-plugin`
  pub fn kubelet_plugin(&self) -> Option<&'static str> {
    match self {
      NetworkPlugin::Kubenet => Some("kubenet"),
      NetworkPlugin::Azure | NetworkPlugin::Flannel | NetworkPlugin::Cilium => Some("cni"),
      NetworkPlugin::Unknown(_) => None,
    }
  }
}

impl From<String> for NetworkPlugin {
  fn from(plugin: String) -> Self {
    match plugin.as_str() {
      "kubenet" => NetworkPlugin::Kubenet,
      "azure" => NetworkPlugin::Azure,
      "flannel" => NetworkPlugin::Flannel,
      "cilium" => NetworkPlugin::Cilium,
      _ => NetworkPlugin::Unknown(plugin),
    }
  }
}

impl From<NetworkPlugin> for String {
  fn from(plugin: NetworkPlugin) -> Self {
    match plugin {
      NetworkPlugin::Unknown(plugin) => plugin,
      known => known.as_str().to_owned(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkPolicy {
  Calico,
  Cilium,
  Azure,
  Unknown(String),
}

impl NetworkPolicy {
  pub fn as_str(&self) -> &str {
    match self {
      NetworkPolicy::Calico => "calico",
      NetworkPolicy::Cilium => "cilium",
      NetworkPolicy::Azure => "azure",
      NetworkPolicy::Unknown(policy) => policy,
    }
  }
}

impl From<String> for NetworkPolicy {
  fn from(policy: String) -> Self {
    match policy.as_str() {
      "calico" => NetworkPolicy::Calico,
      "cilium" => NetworkPolicy::Cilium,
      "azure" => NetworkPolicy::Azure,
      _ => NetworkPolicy::Unknown(policy),
    }
  }
}

impl From<NetworkPolicy> for String {
  fn from(policy: NetworkPolicy) -> Self {
    match policy {
      NetworkPolicy::Unknown(policy) => policy,
      known => known.as_str().to_owned(),
    }
  }
}

/// Supported Linux distributions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Distro {
  Ubuntu,
  Ubuntu1804,
  /// Hardened Ubuntu 16.04 image
  AksUbuntu1604,
  /// Hardened Ubuntu 18.04 image
  AksUbuntu1804,
  /// Confidential compute Ubuntu 16.04 image
  Acc1604,
  CoreOs,
  Unknown(String),
}

impl Distro {
  pub fn as_str(&self) -> &str {
    match self {
      Distro::Ubuntu => "ubuntu",
      Distro::Ubuntu1804 => "ubuntu-18.04",
      Distro::AksUbuntu1604 => "aks",
      Distro::AksUbuntu1804 => "aks-1804",
      Distro::Acc1604 => "acc-16.04",
      Distro::CoreOs => "coreos",
      Distro::Unknown(distro) => distro,
    }
  }

  /// Hardened images ship kernel tunables that kubelet is able to protect
  pub fn is_hardened(&self) -> bool {
    matches!(self, Distro::AksUbuntu1604 | Distro::AksUbuntu1804)
  }
}

impl From<String> for Distro {
  fn from(distro: String) -> Self {
    match distro.as_str() {
      "ubuntu" => Distro::Ubuntu,
      "ubuntu-18.04" => Distro::Ubuntu1804,
      "aks" => Distro::AksUbuntu1604,
      "aks-1804" => Distro::AksUbuntu1804,
      "acc-16.04" => Distro::Acc1604,
      "coreos" => Distro::CoreOs,
      _ => Distro::Unknown(distro),
    }
  }
}

impl From<Distro> for String {
  fn from(distro: Distro) -> Self {
    match distro {
      Distro::Unknown(distro) => distro,
      known => known.as_str().to_owned(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use rstest::*;
  use tempfile::Builder;

  use super::*;

  #[rstest]
  #[case(None, None, false)]
  #[case(Some(false), None, true)]
  #[case(Some(true), None, false)]
  #[case(None, Some(false), true)]
  #[case(None, Some(true), false)]
  #[case(Some(true), Some(false), true)]
  #[case(Some(false), Some(true), false)]
  fn ip_masq_agent_disabled_test(
    #[case] addon_enabled: Option<bool>,
    #[case] hosted_ip_masq_agent: Option<bool>,
    #[case] expected: bool,
  ) {
    let mut spec = ClusterSpec::default();
    if let Some(enabled) = addon_enabled {
      spec.kubernetes_config.addons.push(Addon {
        name: IP_MASQ_AGENT_ADDON_NAME.to_string(),
        enabled: Some(enabled),
        ..Addon::default()
      });
    }
    spec.hosted_master_profile = hosted_ip_masq_agent.map(|ip_masq_agent| HostedMasterProfile {
      ip_masq_agent,
      ..HostedMasterProfile::default()
    });

    assert_eq!(spec.is_ip_masq_agent_disabled(), expected);
  }

  #[test]
  fn it_treats_undeclared_addon_state_as_enabled() {
    let mut spec = ClusterSpec::default();
    spec.kubernetes_config.addons.push(Addon {
      name: IP_MASQ_AGENT_ADDON_NAME.to_string(),
      enabled: None,
      ..Addon::default()
    });

    assert!(!spec.is_ip_masq_agent_disabled());
  }

  #[rstest]
  #[case("\"aks\"", Distro::AksUbuntu1604, true)]
  #[case("\"aks-1804\"", Distro::AksUbuntu1804, true)]
  #[case("\"ubuntu\"", Distro::Ubuntu, false)]
  #[case("\"ubuntu-18.04\"", Distro::Ubuntu1804, false)]
  #[case("\"acc-16.04\"", Distro::Acc1604, false)]
  #[case("\"coreos\"", Distro::CoreOs, false)]
  #[case("\"rhel\"", Distro::Unknown("rhel".to_string()), false)]
  fn distro_test(#[case] input: &str, #[case] expected: Distro, #[case] hardened: bool) {
    let distro: Distro = serde_json::from_str(input).unwrap();
    assert_eq!(distro, expected);
    assert_eq!(distro.is_hardened(), hardened);
    assert_eq!(serde_json::to_string(&distro).unwrap(), input);
  }

  #[rstest]
  #[case("\"kubenet\"", Some("kubenet"))]
  #[case("\"azure\"", Some("cni"))]
  #[case("\"cilium\"", Some("cni"))]
  #[case("\"weave\"", None)]
  fn network_plugin_test(#[case] input: &str, #[case] expected: Option<&str>) {
    let plugin: NetworkPlugin = serde_json::from_str(input).unwrap();
    assert_eq!(plugin.kubelet_plugin(), expected);
    assert_eq!(serde_json::to_string(&plugin).unwrap(), input);
  }

  #[test]
  fn it_reads_yaml_spec() {
    let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
    file
      .write_all(
        br#"
orchestratorVersion: 1.14.1
kubernetesConfig:
  networkPlugin: azure
  enableSecureKubelet: false
  clusterSubnet: 10.244.0.0/16
  addons:
    - name: ip-masq-agent
      enabled: false
  kubeletConfig:
    --max-pods: "50"
agentPoolProfiles:
  - name: linuxpool
    distro: aks
  - name: winpool
    osType: Windows
"#,
      )
      .unwrap();

    let spec = ClusterSpec::read(file.path()).unwrap();
    assert_eq!(spec.orchestrator_version, "1.14.1");
    assert_eq!(spec.kubernetes_config.network_plugin, Some(NetworkPlugin::Azure));
    assert_eq!(spec.kubernetes_config.enable_secure_kubelet, Some(false));
    assert_eq!(spec.kubernetes_config.use_cloud_controller_manager, None);
    assert_eq!(spec.kubernetes_config.kubelet_config["--max-pods"], "50");
    assert_eq!(spec.agent_pool_profiles[0].os_type, OsType::Linux);
    assert_eq!(spec.agent_pool_profiles[0].distro, Some(Distro::AksUbuntu1604));
    assert_eq!(spec.agent_pool_profiles[1].os_type, OsType::Windows);
    assert!(spec.is_ip_masq_agent_disabled());
  }

  #[test]
  fn it_reads_json_spec() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    file
      .write_all(
        br#"{
          "orchestratorVersion": "1.11.10",
          "kubernetesConfig": { "useCloudControllerManager": true },
          "hostedMasterProfile": { "ipMasqAgent": true },
          "agentPoolProfiles": [{ "name": "gpu", "vmSize": "Standard_NC6" }]
        }"#,
      )
      .unwrap();

    let spec = ClusterSpec::read(file.path()).unwrap();
    assert_eq!(spec.kubernetes_config.use_cloud_controller_manager, Some(true));
    assert!(spec.master_profile.is_none());
    assert!(spec.agent_pool_profiles[0].is_gpu());
    assert!(!spec.is_ip_masq_agent_disabled());
  }

  #[test]
  fn it_reads_toml_spec() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    file
      .write_all(
        br#"
orchestratorVersion = "1.8.15"

[kubernetesConfig]
networkPolicy = "calico"

[kubernetesConfig.kubeletConfig]
"--feature-gates" = "DynamicKubeletConfig=true"
"#,
      )
      .unwrap();

    let spec = ClusterSpec::read(file.path()).unwrap();
    assert_eq!(spec.kubernetes_config.network_policy, Some(NetworkPolicy::Calico));
    assert_eq!(
      spec.kubernetes_config.kubelet_config["--feature-gates"],
      "DynamicKubeletConfig=true"
    );
  }

  #[test]
  fn it_keeps_unmodeled_fields() {
    let spec: ClusterSpec = serde_json::from_str(
      r#"{
        "location": "westus2",
        "kubernetesConfig": { "networkPolicy": "antrea", "serviceCidr": "10.0.0.0/16" },
        "hostedMasterProfile": { "ipMasqAgent": true, "fqdn": "example.hcp.io" },
        "agentPoolProfiles": [{ "name": "p", "count": 3, "vnetSubnetID": "/sub/x" }]
      }"#,
    )
    .unwrap();

    assert_eq!(spec.other["location"], "westus2");
    assert_eq!(
      spec.kubernetes_config.network_policy,
      Some(NetworkPolicy::Unknown("antrea".to_string()))
    );
    assert_eq!(spec.kubernetes_config.other["serviceCidr"], "10.0.0.0/16");
    assert_eq!(spec.hosted_master_profile.as_ref().unwrap().other["fqdn"], "example.hcp.io");
    assert_eq!(spec.agent_pool_profiles[0].other["count"], 3);
    assert_eq!(spec.agent_pool_profiles[0].other["vnetSubnetID"], "/sub/x");
  }

  #[test]
  fn it_rejects_unknown_extension() {
    let file = Builder::new().suffix(".ini").tempfile().unwrap();
    assert!(ClusterSpec::read(file.path()).is_err());
  }
}
