pub mod config;
pub mod error;
pub mod lp;
pub mod net;
pub mod petri;
pub mod sim;

#[cfg(test)]
mod test;
