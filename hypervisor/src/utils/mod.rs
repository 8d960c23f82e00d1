pub mod addresses;
pub mod alloc;
