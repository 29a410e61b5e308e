use std::collections::BTreeMap;

/// Kubelet command line flags keyed by flag name, leading dashes included (i.e. `--max-pods`)
///
/// Values are the literal strings placed on the kubelet command line. A key that is present
/// with an empty value is an explicit override and is distinct from a key that is absent
pub type FlagMap = BTreeMap<String, String>;

/// The empty value for flags that must be passed but left blank
///
/// The node bootstrap scripts quote every value, so an empty value is spelled as a
/// quoted empty string in its escaped form
pub const EMPTY_VALUE: &str = r#""""""#;

/// Copy every flag from `source` that is not already present in `target`
pub fn set_missing(target: &mut FlagMap, source: &FlagMap) {
  for (key, val) in source {
    if !target.contains_key(key) {
      target.insert(key.to_owned(), val.to_owned());
    }
  }
}

/// Key of a `key=value` token; the whole token when there is no `=`
fn token_key(token: &str) -> &str {
  token.split_once('=').map_or(token, |(key, _)| key)
}

/// Union `tokens` into the comma-joined `key=value` list stored under `flag`
///
/// Tokens are deduplicated by key with existing tokens winning, and the result is
/// serialized sorted so repeated merges are stable. Nothing is written when there are
/// no tokens to add, leaving an absent flag absent and an explicit value untouched
pub fn merge_tokens<S: AsRef<str>>(flags: &mut FlagMap, flag: &str, tokens: &[S]) {
  if tokens.is_empty() {
    return;
  }

  let mut merged: BTreeMap<String, String> = BTreeMap::new();
  if let Some(existing) = flags.get(flag) {
    for token in existing.split(',').map(str::trim).filter(|t| !t.is_empty()) {
      merged
        .entry(token_key(token).to_owned())
        .or_insert_with(|| token.to_owned());
    }
  }
  for token in tokens.iter().map(|t| t.as_ref().trim()).filter(|t| !t.is_empty()) {
    merged
      .entry(token_key(token).to_owned())
      .or_insert_with(|| token.to_owned());
  }

  let mut values: Vec<String> = merged.into_values().collect();
  values.sort();
  flags.insert(flag.to_owned(), values.join(","));
}
