pub mod http_server;
#[cfg(unix)]
pub mod stub_tool;
