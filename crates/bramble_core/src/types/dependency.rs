use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

use crate::hash::IdentifierHasher;
use crate::types::AssetId;

use super::bundle_behavior::MaybeBundleBehavior;
use super::environment::Environment;
use super::target::Target;

/// A dependency denotes a connection between two assets.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  /// Controls the behavior of the bundle the resolved asset is placed into
  ///
  /// This option is used in combination with priority to determine when the
  /// bundle is loaded.
  pub bundle_behavior: MaybeBundleBehavior,

  /// The environment of the dependency
  pub env: Arc<Environment>,

  /// Whether the dependency is an entry
  pub is_entry: bool,

  /// Whether the resolved asset needs a stable output name
  ///
  /// This is true for entries and for targets of dependencies that are
  /// referenced by name at runtime, such as service worker registrations.
  pub needs_stable_name: bool,

  /// Determines when the dependency should be loaded
  pub priority: Priority,

  /// The id of the asset with this dependency
  pub source_asset_id: Option<AssetId>,

  /// The import or export specifier that connects two assets together
  pub specifier: String,

  /// The target associated with an entry, if any
  pub target: Option<Box<Target>>,
}

impl Dependency {
  pub fn entry(entry: String, target: Target) -> Dependency {
    Dependency {
      env: target.env.clone(),
      is_entry: true,
      needs_stable_name: true,
      specifier: entry,
      target: Some(Box::new(target)),
      ..Dependency::default()
    }
  }

  pub fn new(specifier: String, env: Arc<Environment>) -> Dependency {
    Dependency {
      env,
      specifier,
      ..Dependency::default()
    }
  }

  /// The stable identifier of this dependency, derived from its identity
  /// fields.
  pub fn id(&self) -> String {
    let mut hasher = IdentifierHasher::default();

    self.source_asset_id.hash(&mut hasher);
    self.specifier.hash(&mut hasher);
    self.env.hash(&mut hasher);
    self.priority.hash(&mut hasher);
    self.bundle_behavior.hash(&mut hasher);
    self.is_entry.hash(&mut hasher);
    self.target.as_ref().map(|target| &target.name).hash(&mut hasher);

    format!("{:016x}", hasher.finish())
  }
}

/// Determines when a dependency should load.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
#[derive(Default)]
pub enum Priority {
  /// Resolves the dependency synchronously, placing the resolved asset in
  /// the same bundle as the parent or another bundle that is already on the
  /// page
  #[default]
  Sync = 0,

  /// Places the dependency in a separate bundle loaded in parallel with the
  /// current bundle
  Parallel = 1,

  /// The dependency should be placed in a separate bundle that is loaded
  /// later
  Lazy = 2,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dependency_ids_are_stable() {
    let dependency = Dependency {
      source_asset_id: Some("entry_asset".into()),
      specifier: "./async.js".into(),
      priority: Priority::Lazy,
      ..Dependency::default()
    };

    assert_eq!(dependency.id(), dependency.clone().id());
    assert_eq!(dependency.id().len(), 16);
  }

  #[test]
  fn dependency_ids_depend_on_priority() {
    let sync = Dependency {
      source_asset_id: Some("entry_asset".into()),
      specifier: "./util.js".into(),
      ..Dependency::default()
    };
    let lazy = Dependency {
      priority: Priority::Lazy,
      ..sync.clone()
    };

    assert_ne!(sync.id(), lazy.id());
  }
}
