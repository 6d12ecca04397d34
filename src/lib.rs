// Followup - LoRA fine-tuning of small chat models to ask clinical follow-up questions
// Library exports

pub mod cli;
pub mod config;
pub mod corpus;
pub mod generators;
pub mod models;
pub mod training;
