/* src/lib.rs */

pub mod certgen;
pub mod config;
pub mod discovery;
pub mod error;
pub mod locator;
pub mod models;
pub mod openssl;
pub mod path;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod server;
pub mod state;
pub mod tls;
pub mod validation;
