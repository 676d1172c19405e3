use serde::Deserialize;
use serde::Serialize;

/// The environment the output code will run in.
///
/// Bundles inherit the environment of their root asset, and assets may only
/// share a bundle when their environment contexts match.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
  pub context: EnvironmentContext,
}

impl Environment {
  /// Whether code in this environment runs isolated from its parent page,
  /// and so cannot share bundles with it.
  pub fn is_isolated(&self) -> bool {
    self.context.is_worker() || self.context == EnvironmentContext::Worklet
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
  #[default]
  Browser,
  ElectronMain,
  ElectronRenderer,
  Node,
  ServiceWorker,
  WebWorker,
  Worklet,
}

impl EnvironmentContext {
  pub fn is_node(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, Node | ElectronMain | ElectronRenderer)
  }

  pub fn is_browser(&self) -> bool {
    use EnvironmentContext::*;
    matches!(
      self,
      Browser | WebWorker | ServiceWorker | Worklet | ElectronRenderer
    )
  }

  pub fn is_worker(&self) -> bool {
    use EnvironmentContext::*;
    matches!(self, WebWorker | ServiceWorker)
  }

  pub fn as_str(&self) -> &'static str {
    use EnvironmentContext::*;
    match self {
      Browser => "browser",
      ElectronMain => "electron-main",
      ElectronRenderer => "electron-renderer",
      Node => "node",
      ServiceWorker => "service-worker",
      WebWorker => "web-worker",
      Worklet => "worklet",
    }
  }
}
