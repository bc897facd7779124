//! Ambient configuration, read once at startup from the environment. No CLI
//! flags -- this broker is meant to run as a long-lived service configured
//! the way its surrounding infrastructure already configures things.

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub ws_path: String,
    /// Capacity of the dispatcher's internal event channel.
    pub queue_size: usize,
    /// Capacity of each session's own mailbox.
    pub mailbox_capacity: usize,
    pub allow_any_origin: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000);
        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                format!("{host}:{port}")
                    .parse()
                    .expect("HOST:PORT must form a valid socket address")
            });

        let ws_path = std::env::var("WS_PATH").unwrap_or_else(|_| "/webs".to_owned());

        let queue_size = std::env::var("QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4000);

        let mailbox_capacity = std::env::var("MAILBOX_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        let allow_any_origin = std::env::var("ALLOW_ANY_ORIGIN")
            .ok()
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
            .unwrap_or(true);

        Self {
            bind_addr,
            ws_path,
            queue_size,
            mailbox_capacity,
            allow_any_origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host_and_port_combine_into_a_valid_socket_addr() {
        let addr: SocketAddr = format!("{}:{}", "0.0.0.0", 8000u16).parse().unwrap();
        assert_eq!(addr.port(), 8000);
    }
}
