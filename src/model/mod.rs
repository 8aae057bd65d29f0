//! Model module: MobileNetV2 network and checkpoint persistence

pub mod checkpoint;
pub mod convert;
pub mod mobilenet;

pub use checkpoint::{load_checkpoint, load_metadata, save_checkpoint, CheckpointMetadata};
pub use convert::convert_torchvision;
pub use mobilenet::{MobileNetV2, MobileNetV2Config};
