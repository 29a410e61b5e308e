use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{api::ClusterSpec, kubelet};

#[derive(Copy, Clone, Debug, Default, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
  #[default]
  Json,
  Yaml,
}

/// Input arguments for the `apply` command
#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct ApplyInput {
  /// Path to the cluster specification (.json, .yaml, .yml, or .toml)
  #[arg(short, long, env = "KUBELETFLAGS_SPEC")]
  pub spec: PathBuf,

  /// Format used to print the result
  #[arg(short, long, value_enum, default_value_t)]
  pub output: OutputFormat,

  /// Only print the kubelet flags of one profile: `cluster`, `master`, or the name of an agent pool
  ///
  /// Without a profile, the entire cluster specification is printed with every profile defaulted
  #[arg(short, long)]
  pub profile: Option<String>,
}

impl ApplyInput {
  /// Read the cluster specification and default the kubelet flags of every profile
  pub fn defaulted(&self) -> Result<ClusterSpec> {
    let mut spec = ClusterSpec::read(&self.spec)?;
    debug!(
      "Cluster specification: version {}, {} agent pool(s)",
      spec.orchestrator_version,
      spec.agent_pool_profiles.len()
    );

    kubelet::set_kubelet_config(&mut spec);
    Ok(spec)
  }

  /// Look up the flags of a single profile
  fn select<'a>(spec: &'a ClusterSpec, profile: &str) -> Result<&'a kubelet::FlagMap> {
    match profile {
      "cluster" => Ok(&spec.kubernetes_config.kubelet_config),
      "master" => spec
        .master_profile
        .as_ref()
        .map(|master| &master.kubelet_config)
        .ok_or_else(|| anyhow!("Cluster specification does not define a master profile")),
      name => spec
        .agent_pool_profiles
        .iter()
        .find(|pool| pool.name == name)
        .map(|pool| &pool.kubelet_config)
        .ok_or_else(|| anyhow!("Agent pool {name} not found in cluster specification")),
    }
  }

  /// Render the requested output
  pub fn render(&self) -> Result<String> {
    let spec = self.defaulted()?;

    match &self.profile {
      Some(profile) => {
        let flags = Self::select(&spec, profile)?;
        match self.output {
          OutputFormat::Json => Ok(serde_json::to_string_pretty(flags)?),
          OutputFormat::Yaml => Ok(serde_yaml::to_string(flags)?),
        }
      }
      None => match self.output {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&spec)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&spec)?),
      },
    }
  }

  pub fn apply(&self) -> Result<()> {
    let result = self.render()?;

    println!("{result}");

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::{Builder, NamedTempFile};

  use super::*;
  use crate::kubelet::FlagMap;

  const SPEC: &str = r#"
orchestratorVersion: v1.14.1
kubernetesConfig:
  networkPlugin: azure
  kubeletConfig:
    --feature-gates: DynamicKubeletConfig=true
masterProfile:
  distro: aks
agentPoolProfiles:
  - name: linuxpool
  - name: winpool
    osType: Windows
"#;

  fn spec_file() -> NamedTempFile {
    let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(SPEC.as_bytes()).unwrap();
    file
  }

  fn input(file: &NamedTempFile, profile: Option<&str>) -> ApplyInput {
    ApplyInput {
      spec: file.path().to_path_buf(),
      output: OutputFormat::Json,
      profile: profile.map(str::to_string),
    }
  }

  #[test]
  fn it_renders_a_single_profile() {
    let file = spec_file();

    let rendered = input(&file, Some("winpool")).render().unwrap();
    let flags: FlagMap = serde_json::from_str(&rendered).unwrap();

    assert_eq!(flags["--kubeconfig"], "c:\\k\\config");
    assert_eq!(flags["--max-pods"], "30");
    assert_eq!(
      flags["--feature-gates"],
      "DynamicKubeletConfig=true,PodPriority=true,RotateKubeletServerCertificate=true"
    );
  }

  #[test]
  fn it_renders_the_master_profile() {
    let file = spec_file();

    let rendered = input(&file, Some("master")).render().unwrap();
    let flags: FlagMap = serde_json::from_str(&rendered).unwrap();

    assert_eq!(flags["--protect-kernel-defaults"], "true");
    assert_eq!(flags["--network-plugin"], "cni");
  }

  #[test]
  fn it_renders_the_whole_spec() {
    let file = spec_file();

    let mut input = input(&file, None);
    input.output = OutputFormat::Yaml;
    let spec: ClusterSpec = serde_yaml::from_str(&input.render().unwrap()).unwrap();

    assert_eq!(spec.agent_pool_profiles.len(), 2);
    assert_eq!(spec.agent_pool_profiles[0].kubelet_config["--cgroups-per-qos"], "true");
    assert_eq!(spec.agent_pool_profiles[1].kubelet_config["--cgroups-per-qos"], "false");
  }

  #[test]
  fn it_writes_back_what_it_does_not_model() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    file
      .write_all(
        br#"{
          "orchestratorVersion": "1.14.1",
          "kubernetesConfig": { "networkPlugin": "weave", "kubernetesImageBase": "" },
          "agentPoolProfiles": [{ "name": "p", "distro": "rhel", "count": 3, "vnetSubnetID": "/sub/x" }]
        }"#,
      )
      .unwrap();

    let rendered = input(&file, None).render().unwrap();
    let spec: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(spec["kubernetesConfig"]["networkPlugin"], "weave");
    assert_eq!(
      spec["kubernetesConfig"]["kubeletConfig"]["--pod-infra-container-image"],
      "pause-amd64:3.1"
    );
    assert!(spec["kubernetesConfig"]["kubeletConfig"]
      .get("--network-plugin")
      .is_none());

    let pool = &spec["agentPoolProfiles"][0];
    assert_eq!(pool["distro"], "rhel");
    assert_eq!(pool["count"], 3);
    assert_eq!(pool["vnetSubnetID"], "/sub/x");
  }

  #[test]
  fn it_rejects_unknown_profiles() {
    let file = spec_file();

    let err = input(&file, Some("gpupool")).render().unwrap_err();
    assert_eq!(err.to_string(), "Agent pool gpupool not found in cluster specification");
  }
}
