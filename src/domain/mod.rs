// Domain layer - Pure business entities and rules
pub mod error;
pub mod granularity;
pub mod params;
pub mod reading;
pub mod series;
