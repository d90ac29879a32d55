pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractYoloDetector;
