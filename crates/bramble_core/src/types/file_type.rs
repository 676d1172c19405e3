use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

/// The file type of an asset, which determines the kind of output bundle it
/// can be placed into. Two assets may only share a bundle when their file
/// types match.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum FileType {
  Css,
  Html,
  #[default]
  Js,
  Json,
  Svg,
  Other(String),
}

impl FileType {
  pub fn extension(&self) -> &str {
    match self {
      FileType::Css => "css",
      FileType::Html => "html",
      FileType::Js => "js",
      FileType::Json => "json",
      FileType::Svg => "svg",
      FileType::Other(s) => s.as_str(),
    }
  }

  pub fn from_extension(extension: &str) -> Self {
    match extension {
      "css" => FileType::Css,
      "htm" | "html" => FileType::Html,
      "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => FileType::Js,
      "json" => FileType::Json,
      "svg" => FileType::Svg,
      other => FileType::Other(other.to_string()),
    }
  }

  pub fn from_path(path: &Path) -> Self {
    let extension = path
      .extension()
      .and_then(|extension| extension.to_str())
      .unwrap_or_default();

    Self::from_extension(extension)
  }
}

impl Serialize for FileType {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.extension().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FileType {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let extension = String::deserialize(deserializer)?;
    Ok(FileType::from_extension(&extension))
  }
}
