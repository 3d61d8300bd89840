pub mod dummy_delegate;
pub mod error;
pub mod traits;

pub use dummy_delegate::{DummyChannelHost, HostCall};
pub use error::DelegateError;
pub use traits::ChannelHost;
