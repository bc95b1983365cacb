//! Data types shared between meters and the aggregation engine

pub mod profile;
pub mod section;
