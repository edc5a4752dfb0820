pub mod shipments;
pub mod utils;
