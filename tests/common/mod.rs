//! Test utilities and mocks for Socksify
//!
//! This module provides common test utilities used across integration tests.
//! In-memory sockets come from `socksify::transport::scripted`.

#![allow(dead_code)]

use socksify::config::parse_directives;
use socksify::RoutingTable;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A destination that is never local in the test configurations
pub fn remote_destination() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 7), 443)
}

/// Test configuration builder, producing directive text
pub struct TestConfigBuilder {
    server: String,
    port: Option<u16>,
    version: u8,
    user: Option<String>,
    pass: Option<String>,
    locals: Vec<String>,
    paths: Vec<(String, Vec<String>)>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            server: "10.0.0.1".to_string(),
            port: None,
            version: 5,
            user: None,
            pass: None,
            locals: vec!["10.0.0.0/255.0.0.0".to_string()],
            paths: Vec::new(),
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default server address
    pub fn server(mut self, server: &str) -> Self {
        self.server = server.to_string();
        self
    }

    /// Set the default server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the default server SOCKS version
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Set default credentials
    pub fn credentials(mut self, user: &str, pass: &str) -> Self {
        self.user = Some(user.to_string());
        self.pass = Some(pass.to_string());
        self
    }

    /// Add a local network
    pub fn local(mut self, network: &str) -> Self {
        self.locals.push(network.to_string());
        self
    }

    /// Add a path block
    pub fn path(mut self, server: &str, reaches: &[&str]) -> Self {
        self.paths.push((
            server.to_string(),
            reaches.iter().map(|r| r.to_string()).collect(),
        ));
        self
    }

    /// Render the directive file
    pub fn render(&self) -> String {
        let mut text = format!("server = {}\nserver_type = {}\n", self.server, self.version);
        if let Some(port) = self.port {
            text.push_str(&format!("server_port = {}\n", port));
        }
        if let Some(user) = &self.user {
            text.push_str(&format!("default_user = {}\n", user));
        }
        if let Some(pass) = &self.pass {
            text.push_str(&format!("default_pass = {}\n", pass));
        }
        for local in &self.locals {
            text.push_str(&format!("local = {}\n", local));
        }
        for (server, reaches) in &self.paths {
            text.push_str(&format!("path {{\n    server = {}\n", server));
            for reach in reaches {
                text.push_str(&format!("    reaches = {}\n", reach));
            }
            text.push_str("}\n");
        }
        text
    }

    /// Build the routing table
    pub fn build(self) -> RoutingTable {
        RoutingTable::new(parse_directives(&self.render()).unwrap())
    }
}

/// Successful SOCKS5 connect reply
pub const SOCKS5_CONNECT_OK: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddrV4) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(addr) => panic!("unexpected IPv6 listener {}", addr),
    };
    (listener, addr)
}

/// Spawn a SOCKS5 server that accepts one client
///
/// With `credentials` set, username/password authentication is demanded.
/// The task yields the CONNECT request it received.
pub async fn spawn_socks5_server(
    credentials: Option<(&'static str, &'static str)>,
) -> (SocketAddrV4, JoinHandle<io::Result<Vec<u8>>>) {
    let (listener, addr) = create_test_listener().await;

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;
        let mut methods = vec![0u8; header[1] as usize];
        stream.read_exact(&mut methods).await?;

        match credentials {
            None => stream.write_all(&[5, 0]).await?,
            Some((user, pass)) => {
                stream.write_all(&[5, 2]).await?;

                let mut version_and_len = [0u8; 2];
                stream.read_exact(&mut version_and_len).await?;
                let mut username = vec![0u8; version_and_len[1] as usize];
                stream.read_exact(&mut username).await?;
                let mut plen = [0u8; 1];
                stream.read_exact(&mut plen).await?;
                let mut password = vec![0u8; plen[0] as usize];
                stream.read_exact(&mut password).await?;

                if username != user.as_bytes() || password != pass.as_bytes() {
                    stream.write_all(&[1, 1]).await?;
                    return Ok(Vec::new());
                }
                stream.write_all(&[1, 0]).await?;
            }
        }

        let mut request = vec![0u8; 10];
        stream.read_exact(&mut request).await?;
        stream.write_all(&SOCKS5_CONNECT_OK).await?;
        stream.flush().await?;
        Ok(request)
    });

    (addr, task)
}

/// Spawn a SOCKS4 server that answers one client with `status`
///
/// The task yields the user id the client sent.
pub async fn spawn_socks4_server(status: u8) -> (SocketAddrV4, JoinHandle<io::Result<Vec<u8>>>) {
    let (listener, addr) = create_test_listener().await;

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;

        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await?;
        let mut user_id = Vec::new();
        loop {
            let byte = stream.read_u8().await?;
            if byte == 0 {
                break;
            }
            user_id.push(byte);
        }

        stream.write_all(&[0, status, 0, 0, 0, 0, 0, 0]).await?;
        stream.flush().await?;
        Ok(user_id)
    });

    (addr, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[test]
    fn test_config_builder() {
        let text = TestConfigBuilder::new()
            .server("10.0.0.2")
            .port(1081)
            .credentials("alice", "secret")
            .path("10.0.0.3", &["192.168.0.0/16"])
            .render();

        assert!(text.contains("server = 10.0.0.2\n"));
        assert!(text.contains("server_port = 1081\n"));
        assert!(text.contains("path {\n    server = 10.0.0.3\n    reaches = 192.168.0.0/16\n}\n"));
        assert!(parse_directives(&text).is_ok());
    }
}
