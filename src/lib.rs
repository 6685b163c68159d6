#![cfg_attr(not(test), no_std)]

pub mod fifos;
pub mod memory;
pub mod message;
pub mod scheduler;
pub mod settings;
pub mod sink;
pub mod spi;

mod collector;
mod device;
mod error;
mod irq;

pub(crate) use memory::{impl_register, impl_to_from_u32, software_clearable, software_settable};

pub use device::{Statistics, MCP2517FD};
pub use memory::controller::configuration::OperationMode;
pub use error::{ConfigError, Error};
pub use message::rx::RxMessage;
pub use message::tx::TxMessage;
pub use sink::{BusState, ErrorEvent, EventSink, TxCompletion};
