pub mod php;

pub use php::parse_php;
