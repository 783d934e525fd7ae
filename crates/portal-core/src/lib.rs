pub mod errors;
pub mod events;
pub mod gateway;
pub mod ids;
pub mod messages;
pub mod research;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod tools;
