// Model collaborators: device policy, downloads, frozen base model, LoRA adapter

pub mod adapter_meta;
pub mod base;
pub mod common;
pub mod download;
pub mod lora_impl;

pub use adapter_meta::{detect_base_model, read_adapter_meta, write_adapter_meta, AdapterMeta};
pub use base::{Backbone, BaseModel};
pub use common::DevicePolicy;
pub use download::{ModelDownloader, ModelFiles};
pub use lora_impl::{AdapterConfig, LoRAAdapter, LoRALayer};
