//! Wire protocol spoken over a [`Port`](crate::port::Port).
//!
//! - [`command`]: short text commands and their replies
//! - [`transfer`]: image frames and firmware file pushes

pub mod command;
pub mod transfer;

pub use command::{Command, ExchangeConfig, HELLO_REPLY, exchange, send_command};
pub use transfer::{FileTransfer, FileTransferConfig, TransferSession, push_image};
