pub mod routes;

pub use routes::{Route, RouteTable};
