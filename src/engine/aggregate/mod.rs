//! Containers: placement policy, writing and reading.

mod packer;
mod reader;
mod writer;

pub use packer::{Packer, Slot};
pub use reader::ContainerReader;
pub use writer::{
    AggregateWriter, AppendOutcome, SealedContainer, remove_container_file, set_readonly,
};
