pub mod buffered_log;
pub mod syslog;
