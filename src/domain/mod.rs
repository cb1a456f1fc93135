//! Core domain types and logic.

pub mod config_validation;
pub mod definition;
pub mod definition_store;
pub mod definition_validation;
pub mod engine_config;
pub mod entity;
pub mod error;
pub mod expr;
pub mod expr_parser;
pub mod formula;
pub mod formula_eval;
pub mod function;
pub mod orchestrator;
pub mod post_process;
pub mod resolver;
pub mod series;
pub mod task;
pub mod value;
