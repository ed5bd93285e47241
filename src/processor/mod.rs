pub mod deduplicator;
pub mod rule_normalizer;
pub mod validator;

pub use deduplicator::*;
pub use rule_normalizer::*;
pub use validator::*;
