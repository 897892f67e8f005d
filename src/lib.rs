#[macro_use]
extern crate lazy_static;

use std::sync::Once;

mod atomic;
pub mod config;
pub mod directory;
pub mod errors;
pub mod ffi;
pub mod id;
pub mod registry;
pub mod thing;

pub use config::Config;
pub use directory::{Directory, FileDirectory, MemoryDirectory, Subscriptions};
pub use errors::{ErrorCode, Result, SafeThingError};
pub use id::ThingAddr;
pub use registry::{Handle, Registry};
pub use thing::{
    AccessType, ActionDef, SafeThing, ThingAttr, ThingEvent, ThingInfo,
    ThingStatus, Topic,
};

pub static INIT: Once = Once::new();

lazy_static! {
    /// Registry behind the C functions, publishing into the directory
    /// chosen by [`Config::load`].
    pub static ref REGISTRY: Registry = {
        let config = Config::load();
        Registry::new(config.directory())
    };
}

/// Set up logging once per process. Safe to call repeatedly.
pub fn initialize() {
    INIT.call_once(|| {
        let config = Config::load();
        let env = env_logger::Env::default()
            .default_filter_or(config.log_filter.as_str());
        // The host application may already own the logger.
        let _ = env_logger::Builder::from_env(env).try_init();
        log::info!("Initializing safe_thing");
    });
}
