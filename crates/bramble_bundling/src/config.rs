use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

/// Raw planner configuration as written by the user.
///
/// Schema validation happens at the serde layer; the planner itself only
/// ever sees the resolved form.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlannerConfig {
  /// The HTTP version bundles will be served over, which selects the default
  /// deployment limits below
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub http: Option<HttpVersion>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_bundles: Option<u32>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_bundle_size: Option<u64>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_parallel_requests: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum HttpVersion {
  Http1 = 1,
  #[default]
  Http2 = 2,
}

/// Deployment limits consulted during planning.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedPlannerConfig {
  /// Reserved; parsed from user config but not yet consulted by the planner.
  pub min_bundles: u32,

  /// Shared bundles smaller than this are merged back into their source
  /// bundles.
  pub min_bundle_size: u64,

  /// The maximum number of bundles loaded together in one bundle group.
  pub max_parallel_requests: u32,
}

impl Default for ResolvedPlannerConfig {
  fn default() -> Self {
    PlannerConfig::default().resolve()
  }
}

impl PlannerConfig {
  /// Resolves the user config against the defaults for the configured HTTP
  /// version. Individual overrides win over http-derived defaults.
  pub fn resolve(&self) -> ResolvedPlannerConfig {
    let defaults = match self.http.unwrap_or_default() {
      HttpVersion::Http1 => ResolvedPlannerConfig {
        min_bundles: 1,
        min_bundle_size: 30_000,
        max_parallel_requests: 6,
      },
      HttpVersion::Http2 => ResolvedPlannerConfig {
        min_bundles: 1,
        min_bundle_size: 20_000,
        max_parallel_requests: 25,
      },
    };

    ResolvedPlannerConfig {
      min_bundles: self.min_bundles.unwrap_or(defaults.min_bundles),
      min_bundle_size: self.min_bundle_size.unwrap_or(defaults.min_bundle_size),
      max_parallel_requests: self
        .max_parallel_requests
        .unwrap_or(defaults.max_parallel_requests),
    }
  }
}
