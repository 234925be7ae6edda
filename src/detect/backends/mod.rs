#[cfg(unix)]
pub mod eim;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(unix)]
pub use eim::EimBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
