//! Driver implementations.

#[cfg(feature = "mock")]
pub mod mock_driver;
#[cfg(feature = "gpu")]
pub mod wgpu_driver;

#[cfg(feature = "mock")]
pub use mock_driver::MockDriver;
#[cfg(feature = "gpu")]
pub use wgpu_driver::WgpuDriver;

#[cfg(not(any(feature = "mock", feature = "gpu")))]
compile_error!("No compute driver available. Enable the 'mock' or 'gpu' feature.");
