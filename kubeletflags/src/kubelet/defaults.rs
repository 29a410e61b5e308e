use semver::Version;
use tracing::{debug, info, warn};

use super::{
  flags::{self, FlagMap},
  gates::{self, MinVersion},
  windows,
};
use crate::{
  api::{AgentPoolProfile, ClusterSpec, Distro, MasterProfile, NetworkPlugin, NetworkPolicy, OsType},
  utils,
};

pub const DEFAULT_DNS_SERVICE_IP: &str = "10.0.0.10";
pub const DEFAULT_KUBERNETES_IMAGE_BASE: &str = "k8s.gcr.io/";
pub const DEFAULT_NON_MASQUERADE_CIDR: &str = "0.0.0.0/0";
pub const DEFAULT_HARD_EVICTION_THRESHOLD: &str = "memory.available<750Mi,nodefs.available<10%,nodefs.inodesFree<5%";
pub const DEFAULT_EVENT_QPS: &str = "0";
pub const DEFAULT_GC_HIGH_THRESHOLD: u32 = 85;
pub const DEFAULT_GC_LOW_THRESHOLD: u32 = 80;
pub const DEFAULT_POD_MAX_PIDS: u32 = 100;
pub const DEFAULT_MAX_PODS: u32 = 110;
/// Pods draw addresses from the VNET under Azure CNI, which caps density per node
pub const DEFAULT_MAX_PODS_VNET_INTEGRATED: u32 = 30;
pub const CLIENT_CA_FILE: &str = "/etc/kubernetes/certs/ca.crt";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProfileKind {
  Cluster,
  Master,
  Agent,
}

/// The node profile a flag map is defaulted for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
  pub kind: ProfileKind,
  pub os_type: OsType,
  pub distro: Option<Distro>,
  /// Nodes carry NVIDIA GPUs
  pub gpu: bool,
}

impl Profile {
  /// The cluster-wide defaults that every other profile starts from
  pub fn cluster() -> Self {
    Profile {
      kind: ProfileKind::Cluster,
      os_type: OsType::Linux,
      distro: None,
      gpu: false,
    }
  }

  pub fn master(master: &MasterProfile) -> Self {
    Profile {
      kind: ProfileKind::Master,
      os_type: OsType::Linux,
      distro: master.distro.clone(),
      gpu: false,
    }
  }

  pub fn agent(pool: &AgentPoolProfile) -> Self {
    Profile {
      kind: ProfileKind::Agent,
      os_type: pool.os_type,
      distro: pool.distro.clone(),
      gpu: pool.is_gpu(),
    }
  }

  pub fn is_windows(&self) -> bool {
    self.os_type == OsType::Windows
  }
}

/// Everything a rule may consult
struct Context<'a> {
  spec: &'a ClusterSpec,
  version: Option<&'a Version>,
  profile: &'a Profile,
}

impl Context<'_> {
  /// An unparseable version satisfies no gate
  fn version_ge(&self, min: MinVersion) -> bool {
    self.version.map_or(false, |ver| min.matches(ver))
  }

  /// Secure unless turned off; Windows nodes are only secured on request
  fn secure(&self) -> bool {
    self
      .spec
      .kubernetes_config
      .enable_secure_kubelet
      .unwrap_or(!self.profile.is_windows())
  }
}

enum Action {
  /// Insert the literal when the flag is absent
  Static(&'static str),
  /// Insert the computed value when the flag is absent; `None` leaves the flag unset
  Derived(fn(&Context) -> Option<String>),
  /// Union the tokens into the comma-joined list held by the flag
  Merge(fn(&Context) -> Vec<&'static str>),
  /// Delete the flag, whoever supplied it
  Remove,
}

struct Rule {
  flag: &'static str,
  when: fn(&Context) -> bool,
  action: Action,
}

const fn rule(flag: &'static str, when: fn(&Context) -> bool, action: Action) -> Rule {
  Rule { flag, when, action }
}

fn always(_: &Context) -> bool {
  true
}

fn is_linux(ctx: &Context) -> bool {
  !ctx.profile.is_windows()
}

fn is_secure(ctx: &Context) -> bool {
  ctx.secure()
}

fn is_insecure(ctx: &Context) -> bool {
  !ctx.secure()
}

fn is_version_known(ctx: &Context) -> bool {
  ctx.version.is_some()
}

fn supports_rotate_certificates(ctx: &Context) -> bool {
  ctx.version_ge(gates::ROTATE_CERTIFICATES)
}

fn cadvisor_port_removed(ctx: &Context) -> bool {
  ctx.version_ge(gates::CADVISOR_PORT_REMOVED)
}

fn is_hardened_linux(ctx: &Context) -> bool {
  is_linux(ctx) && ctx.profile.distro.as_ref().map_or(false, Distro::is_hardened)
}

/// GPU pools on releases that predate device plugins, unless the device plugin is deployed anyway
fn needs_accelerators(ctx: &Context) -> bool {
  ctx.profile.kind == ProfileKind::Agent
    && ctx.profile.gpu
    && !ctx.spec.is_nvidia_device_plugin_enabled()
    && ctx.version_ge(gates::ACCELERATORS)
    && !ctx.version_ge(gates::ACCELERATORS_REMOVED)
}

fn cluster_dns(ctx: &Context) -> Option<String> {
  let ip = ctx.spec.kubernetes_config.dns_service_ip.as_deref();
  Some(ip.unwrap_or(DEFAULT_DNS_SERVICE_IP).to_owned())
}

fn pod_infra_container_image(ctx: &Context) -> Option<String> {
  let components = gates::components(ctx.version?)?;
  let base = ctx
    .spec
    .kubernetes_config
    .kubernetes_image_base
    .as_deref()
    .unwrap_or(DEFAULT_KUBERNETES_IMAGE_BASE);

  if base.is_empty() {
    return Some(components.pause.to_owned());
  }
  Some(format!("{}/{}", base.trim_end_matches('/'), components.pause))
}

fn node_status_update_frequency(ctx: &Context) -> Option<String> {
  gates::components(ctx.version?).map(|components| components.node_status_update_frequency.to_owned())
}

fn cloud_provider(ctx: &Context) -> Option<String> {
  let provider = match ctx.spec.kubernetes_config.use_cloud_controller_manager {
    Some(true) => "external",
    _ => "azure",
  };
  Some(provider.to_owned())
}

fn network_plugin(ctx: &Context) -> Option<String> {
  let config = &ctx.spec.kubernetes_config;
  if config.network_policy == Some(NetworkPolicy::Calico) {
    return Some("cni".to_owned());
  }

  match &config.network_plugin {
    Some(plugin) => plugin.kubelet_plugin().map(str::to_owned),
    None => NetworkPlugin::Kubenet.kubelet_plugin().map(str::to_owned),
  }
}

fn max_pods(ctx: &Context) -> Option<String> {
  let max_pods = match ctx.spec.kubernetes_config.network_plugin {
    Some(NetworkPlugin::Azure) => DEFAULT_MAX_PODS_VNET_INTEGRATED,
    _ => DEFAULT_MAX_PODS,
  };
  Some(max_pods.to_string())
}

fn non_masquerade_cidr(ctx: &Context) -> Option<String> {
  if !ctx.spec.is_ip_masq_agent_disabled() {
    return Some(DEFAULT_NON_MASQUERADE_CIDR.to_owned());
  }

  let subnet = ctx.spec.kubernetes_config.cluster_subnet.clone();
  if subnet.is_none() {
    debug!("IP masquerade agent is disabled but no cluster subnet is set; leaving --non-masquerade-cidr unset");
  }
  subnet
}

fn gc_high_threshold(_: &Context) -> Option<String> {
  Some(DEFAULT_GC_HIGH_THRESHOLD.to_string())
}

fn gc_low_threshold(_: &Context) -> Option<String> {
  Some(DEFAULT_GC_LOW_THRESHOLD.to_string())
}

fn pod_max_pids(_: &Context) -> Option<String> {
  Some(DEFAULT_POD_MAX_PIDS.to_string())
}

fn default_feature_gates(ctx: &Context) -> Vec<&'static str> {
  ctx.version.map(gates::feature_gates).unwrap_or_default()
}

fn accelerators(_: &Context) -> Vec<&'static str> {
  vec!["Accelerators=true"]
}

/// Evaluated top to bottom against every profile; Windows overrides are layered on afterwards
const RULES: &[Rule] = &[
  rule("--address", always, Action::Static("0.0.0.0")),
  rule("--allow-privileged", always, Action::Static("true")),
  rule("--cgroups-per-qos", always, Action::Static("true")),
  rule("--pod-manifest-path", always, Action::Static("/etc/kubernetes/manifests")),
  rule("--kubeconfig", always, Action::Static("/var/lib/kubelet/kubeconfig")),
  rule("--keep-terminated-pod-volumes", always, Action::Static("false")),
  rule("--cluster-dns", always, Action::Derived(cluster_dns)),
  rule("--cluster-domain", always, Action::Static("cluster.local")),
  rule("--event-qps", always, Action::Static(DEFAULT_EVENT_QPS)),
  rule("--eviction-hard", always, Action::Static(DEFAULT_HARD_EVICTION_THRESHOLD)),
  rule("--image-gc-high-threshold", always, Action::Derived(gc_high_threshold)),
  rule("--image-gc-low-threshold", always, Action::Derived(gc_low_threshold)),
  rule("--image-pull-progress-deadline", always, Action::Static("30m")),
  rule("--pod-infra-container-image", always, Action::Derived(pod_infra_container_image)),
  rule("--pod-max-pids", always, Action::Derived(pod_max_pids)),
  rule("--streaming-connection-idle-timeout", always, Action::Static("5m")),
  rule("--cloud-config", always, Action::Static("/etc/kubernetes/azure.json")),
  rule("--azure-container-registry-config", always, Action::Static("/etc/kubernetes/azure.json")),
  rule("--node-status-update-frequency", always, Action::Derived(node_status_update_frequency)),
  // Secure kubelet
  rule("--anonymous-auth", is_secure, Action::Static("false")),
  rule("--authorization-mode", is_secure, Action::Static("Webhook")),
  rule("--client-ca-file", is_secure, Action::Static(CLIENT_CA_FILE)),
  rule("--anonymous-auth", is_insecure, Action::Remove),
  rule("--authorization-mode", is_insecure, Action::Remove),
  rule("--client-ca-file", is_insecure, Action::Remove),
  // Cloud provider and networking
  rule("--cloud-provider", always, Action::Derived(cloud_provider)),
  rule("--network-plugin", always, Action::Derived(network_plugin)),
  rule("--max-pods", always, Action::Derived(max_pods)),
  // Version gated
  rule("--cadvisor-port", cadvisor_port_removed, Action::Remove),
  rule("--rotate-certificates", supports_rotate_certificates, Action::Static("true")),
  rule("--feature-gates", is_version_known, Action::Merge(default_feature_gates)),
  rule("--feature-gates", needs_accelerators, Action::Merge(accelerators)),
  // OS and distro
  rule("--protect-kernel-defaults", is_hardened_linux, Action::Static("true")),
  rule("--enforce-node-allocatable", is_linux, Action::Static("pods")),
  rule("--non-masquerade-cidr", always, Action::Derived(non_masquerade_cidr)),
];

/// Fills kubelet flag maps for the profiles of a cluster
pub struct Defaulter<'a> {
  spec: &'a ClusterSpec,
  version: Option<Version>,
}

impl<'a> Defaulter<'a> {
  pub fn new(spec: &'a ClusterSpec) -> Self {
    let version = match utils::get_semver(&spec.orchestrator_version) {
      Ok(version) => Some(version),
      Err(err) => {
        warn!("{err}; no version gated kubelet flags will be applied");
        None
      }
    };

    Defaulter { spec, version }
  }

  /// Apply every default for `profile` to `flags`
  ///
  /// Flags already present are treated as user overrides and kept, with the exception of
  /// `--feature-gates` which is merged and the flags a rule deliberately removes
  pub fn apply(&self, profile: &Profile, flags: &mut FlagMap) {
    let user = flags.clone();
    self.layer(profile, flags, &user);
  }

  /// Default a master or agent pool map on top of the already defaulted cluster-wide map
  ///
  /// Flags set on the profile itself win over the cluster-wide values, which in turn win
  /// over the profile defaults, except for OS overrides which replace cluster-wide values
  pub fn inherit(&self, profile: &Profile, flags: &mut FlagMap, cluster: &FlagMap) {
    let user = flags.clone();
    flags::set_missing(flags, cluster);
    self.layer(profile, flags, &user);
  }

  fn layer(&self, profile: &Profile, flags: &mut FlagMap, user: &FlagMap) {
    let ctx = Context {
      spec: self.spec,
      version: self.version.as_ref(),
      profile,
    };

    for rule in RULES.iter().filter(|rule| (rule.when)(&ctx)) {
      match &rule.action {
        Action::Static(value) => {
          if !flags.contains_key(rule.flag) {
            flags.insert(rule.flag.to_owned(), (*value).to_owned());
          }
        }
        Action::Derived(derive) => {
          if !flags.contains_key(rule.flag) {
            if let Some(value) = derive(&ctx) {
              flags.insert(rule.flag.to_owned(), value);
            }
          }
        }
        Action::Merge(tokens) => flags::merge_tokens(flags, rule.flag, tokens(&ctx).as_slice()),
        Action::Remove => {
          if flags.remove(rule.flag).is_some() {
            debug!("Removed {} from {:?} kubelet flags", rule.flag, profile.kind);
          }
        }
      }
    }

    if profile.is_windows() {
      self.layer_windows(&ctx, flags, user);
    }
  }

  fn layer_windows(&self, ctx: &Context, flags: &mut FlagMap, user: &FlagMap) {
    for (flag, value) in windows::OVERRIDES.entries() {
      if !user.contains_key(*flag) {
        flags.insert((*flag).to_owned(), (*value).to_owned());
      }
    }

    if ctx.secure() && !user.contains_key("--client-ca-file") {
      flags.insert("--client-ca-file".to_owned(), windows::CLIENT_CA_FILE.to_owned());
    }

    for flag in windows::UNSUPPORTED {
      flags.remove(*flag);
    }
  }
}

/// Apply the defaults for a single profile to its flag map
pub fn apply_defaults(spec: &ClusterSpec, profile: &Profile, flags: &mut FlagMap) {
  Defaulter::new(spec).apply(profile, flags);
}

/// Default the cluster-wide kubelet flags and propagate them into the master and every agent pool
///
/// Each profile ends up owning an independent copy of its flags
pub fn set_kubelet_config(spec: &mut ClusterSpec) {
  let mut cluster = std::mem::take(&mut spec.kubernetes_config.kubelet_config);

  let defaulter = Defaulter::new(spec);
  defaulter.apply(&Profile::cluster(), &mut cluster);

  let master = spec.master_profile.as_ref().map(|master| {
    let mut flags = master.kubelet_config.clone();
    defaulter.inherit(&Profile::master(master), &mut flags, &cluster);
    flags
  });

  let agents: Vec<FlagMap> = spec
    .agent_pool_profiles
    .iter()
    .map(|pool| {
      debug!("Defaulting kubelet flags for {:?} agent pool {}", pool.os_type, pool.name);
      let mut flags = pool.kubelet_config.clone();
      defaulter.inherit(&Profile::agent(pool), &mut flags, &cluster);
      flags
    })
    .collect();

  info!(
    "Defaulted kubelet flags for the cluster, {} master and {} agent pool profile(s)",
    usize::from(master.is_some()),
    agents.len()
  );

  spec.kubernetes_config.kubelet_config = cluster;
  if let (Some(profile), Some(flags)) = (spec.master_profile.as_mut(), master) {
    profile.kubelet_config = flags;
  }
  for (pool, flags) in spec.agent_pool_profiles.iter_mut().zip(agents) {
    pool.kubelet_config = flags;
  }
}
