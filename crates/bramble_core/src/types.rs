pub use self::asset::*;
pub use self::bundle_behavior::*;
pub use self::dependency::*;
pub use self::environment::*;
pub use self::file_type::*;
pub use self::target::*;

mod asset;
mod bundle_behavior;
mod dependency;
mod environment;
mod file_type;
mod target;
