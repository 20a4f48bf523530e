pub mod channels;
pub mod models;
pub mod system;
