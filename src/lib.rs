//! tpuprof core library: TPU compiler log and per-core profile parsing.

mod cmd;
mod config;
mod error;
mod export;
mod fsutil;
mod kv;
mod layer;
mod lmem;
mod opgraph;
mod result;
mod segment;
mod stats;
mod tail;
mod timestep;
mod trace;

pub use cmd::*;
pub use config::*;
pub use error::*;
pub use export::*;
pub use fsutil::*;
pub use kv::*;
pub use layer::*;
pub use lmem::*;
pub use opgraph::*;
pub use result::*;
pub use segment::*;
pub use stats::*;
pub use tail::*;
pub use timestep::*;
pub use trace::*;
