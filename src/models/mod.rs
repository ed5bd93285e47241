pub mod trip_record;

pub use trip_record::*;
