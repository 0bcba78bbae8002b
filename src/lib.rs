pub mod capability;
pub mod channel;
pub mod config;
pub mod correlate;
pub mod device;
pub mod dvb;
pub mod error;
pub mod lock;
pub mod poll;
pub mod scan;
pub mod store;
pub mod tables;

#[cfg(test)]
mod testing;
