use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;

/// Controls how the bundle holding an asset relates to its surroundings.
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum BundleBehavior {
  /// The bundle's contents are inlined into the referencing bundle's output
  /// rather than shipped as a separate request.
  Inline = 0,

  /// The bundle is loaded in full isolation and may not share assets with
  /// its surroundings.
  Isolated = 1,
}

/// `None` means the default behavior: a regular, splittable bundle.
pub type MaybeBundleBehavior = Option<BundleBehavior>;
