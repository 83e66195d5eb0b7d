pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ScriptStep, StubBackend};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractOptions};
