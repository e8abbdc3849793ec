pub mod callback;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod modules;
pub mod shared;

pub use callback::TestEventListener;
pub use config::{DriverConfig, IsolationStrategy};
pub use dispatch::{
    Action, ActionKind, ControllerArgs, ControllerFault, ControllerRegistry, Settings,
    TestController,
};
pub use driver::{Driver, DriverError, DriverPhase};
