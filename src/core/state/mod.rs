pub mod app_state;
pub mod lifecycle;

pub use app_state::{HostPaths, HostSettings, DATA_DIR_ENV};
pub use lifecycle::{
    EventStream, LifecycleController, LifecycleEvent, LifecycleState, NoticeLevel, Operation,
    Status,
};
