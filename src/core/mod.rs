pub mod chain;
pub mod codec;
pub mod confirm;
pub mod params;
pub mod period;
pub mod preheaders;
pub mod types;
