pub mod cmd;
pub mod exec;
pub mod loopback;
pub mod luks2;
pub mod mkfs;
pub mod mount;
