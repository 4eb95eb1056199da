mod lmem_cmd;
mod profile_cmd;
mod schema;

pub use lmem_cmd::*;
pub use profile_cmd::*;
pub use schema::*;
