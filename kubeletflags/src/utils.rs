use anyhow::{anyhow, Result};
use regex_lite::Regex;
use semver::Version;

/// Extract the semantic version from the version string provided
///
/// A leading `v` and a trailing `-` suffix (i.e. `v1.14.1-aks.3`) are ignored; anything
/// else around the `major.minor.patch` core makes the version unparseable
pub fn get_semver(ver: &str) -> Result<Version> {
  let re = Regex::new(r"^v?(\d+\.\d+\.\d+)(-.*)?$")?;
  match re.captures(ver).and_then(|cap| cap.get(1)) {
    Some(core) => Ok(Version::parse(core.as_str())?),
    None => Err(anyhow!("Unable to parse version from '{ver}'")),
  }
}

/// Returns true when `ver` is at or above `major.minor.patch`
pub fn is_version_ge(ver: &Version, major: u64, minor: u64, patch: u64) -> bool {
  *ver >= Version::new(major, minor, patch)
}
