pub mod layout;
pub mod partition;
pub mod resolver;
pub mod table;
