pub mod distribution;
pub mod excluded_addresses;
pub mod holders;
pub mod interpolation;
pub mod market_data;
pub mod participation;
pub mod pipeline;
pub mod proposals;
pub mod snapshots;
pub mod trends;
pub mod turnout;
