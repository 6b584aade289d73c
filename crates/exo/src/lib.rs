#![doc = include_str!("../../../README.md")]

mod api;
mod builtins;
mod config;
mod error;
pub mod loop_ir;
mod memory;
mod parse;
pub mod past;
mod pattern;
mod printing;
pub mod scheduling;
mod scope;
mod srcinfo;
mod sym;
pub mod uast;
mod unquote;

pub use crate::{
    api::Procedure,
    builtins::BuiltIn,
    config::{Config, ConfigField},
    error::{ParseError, SchedulingError, ValidationError},
    memory::Memory,
    parse::{parse_config, parse_instr_proc, parse_proc, pattern, pattern_at},
    scope::{CaptureScope, HostFn, HostVal},
    srcinfo::{SourceAnchor, SrcInfo},
    sym::{Sym, reset_sym_counter},
};
