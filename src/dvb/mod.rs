//! Linux DVB v5 backend: frontend control and demux section filters.

pub mod demux;
pub mod frontend;
pub mod psi;

pub use demux::DemuxTables;
pub use frontend::DvbFrontend;
