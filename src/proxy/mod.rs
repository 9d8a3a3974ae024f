pub mod cache;
pub mod diagnostic;
pub mod dispatch;
pub mod host;
pub mod redirect;
pub mod request;

pub use cache::ProxyCache;
pub use dispatch::{dispatch, Tls};
pub use redirect::redirect_to_https;
