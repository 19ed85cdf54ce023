//! Chain identification: the critical chain and the chains feeding it.

mod critical;
mod feeding;

pub use critical::identify_critical_chain;
pub use feeding::identify_feeding_chains;
