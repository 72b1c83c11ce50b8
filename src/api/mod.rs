mod options;
mod subscriber;

pub use options::{ConnectOpts, ServerInfo};
pub use subscriber::{ConnectError, FetchError, Subscriber};
