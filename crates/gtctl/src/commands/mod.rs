pub mod cluster;
pub mod playground;
