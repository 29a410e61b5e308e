mod defaults;
mod flags;
pub mod gates;
mod windows;

pub use defaults::{
  apply_defaults, set_kubelet_config, Defaulter, Profile, ProfileKind, CLIENT_CA_FILE, DEFAULT_DNS_SERVICE_IP,
  DEFAULT_EVENT_QPS, DEFAULT_GC_HIGH_THRESHOLD, DEFAULT_GC_LOW_THRESHOLD, DEFAULT_HARD_EVICTION_THRESHOLD,
  DEFAULT_KUBERNETES_IMAGE_BASE, DEFAULT_MAX_PODS, DEFAULT_MAX_PODS_VNET_INTEGRATED, DEFAULT_NON_MASQUERADE_CIDR,
  DEFAULT_POD_MAX_PIDS,
};
pub use flags::{merge_tokens, set_missing, FlagMap, EMPTY_VALUE};
