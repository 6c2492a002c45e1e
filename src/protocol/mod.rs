pub mod canonical;
pub mod converse;
pub mod eventstream;
pub mod gateway;
pub mod mapping;
