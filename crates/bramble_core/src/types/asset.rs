use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use super::bundle_behavior::MaybeBundleBehavior;
use super::environment::Environment;
use super::file_type::FileType;

pub type AssetId = String;

/// Statistics about an asset, gathered during transformation.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStats {
  pub size: u32,
  pub time: u32,
}

/// One compiled unit of source (a module) as supplied by the upstream asset
/// graph. Assets are immutable within a planning run and are identified by
/// their stable `id` string; never rely on pointer identity across graph
/// boundaries.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
  /// The main identifier of this asset, stable across runs
  pub id: AssetId,

  /// Controls the behavior of the bundle this asset is placed into
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the asset
  pub env: Arc<Environment>,

  /// The file path of the asset
  pub file_path: PathBuf,

  /// The file type of the asset, which may change during transformation
  pub file_type: FileType,

  /// Statistics about the asset
  pub stats: AssetStats,
}
