pub mod http_channel;
pub mod log_channel;
