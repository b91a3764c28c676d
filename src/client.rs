//! Interactive Client
//!
//! Line-oriented REPL for a DenKV server. Requests are single lines;
//! responses are read until the NUL end marker so multi-line bodies
//! (such as HELP) arrive whole. `exit` quits locally without touching
//! the server.

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;

use crate::error::Result;

/// Interactive client for a DenKV server
pub struct Client {
    address: String,
}

impl Client {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{host}:{port}"),
        }
    }

    /// Connect and run the interactive loop until `exit` or EOF
    pub fn run(&self) -> Result<()> {
        let mut conn = TcpStream::connect(&self.address)?;
        println!(
            "Connected to DenKV at {}. Type 'help' or '?' for commands, 'exit' to quit.",
            self.address
        );

        let stdin = io::stdin();
        let mut input = String::new();
        loop {
            print!("> ");
            io::stdout().flush()?;

            input.clear();
            if stdin.lock().read_line(&mut input)? == 0 {
                break;
            }
            let line = input.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("exit") {
                println!("Goodbye!");
                break;
            }

            conn.write_all(format!("{line}\n").as_bytes())?;
            let response = read_response(&mut conn)?;
            print!("{response}");
        }

        Ok(())
    }
}

/// Read one full response, up to and including the end marker
fn read_response(conn: &mut TcpStream) -> Result<String> {
    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = conn.read(&mut buf)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed connection",
            )
            .into());
        }
        response.extend_from_slice(&buf[..read]);
        if buf[..read].contains(&0) {
            break;
        }
    }
    Ok(strip_end_marker(&response))
}

fn strip_end_marker(response: &[u8]) -> String {
    String::from_utf8_lossy(response)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_end_marker() {
        assert_eq!(strip_end_marker(b"OK\n\0"), "OK\n");
        assert_eq!(strip_end_marker(b"line one\nline two\n\0"), "line one\nline two\n");
        assert_eq!(strip_end_marker(b"\0"), "");
    }

    #[test]
    fn test_read_response_over_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            // response split across two writes, marker in the second
            socket.write_all(b"bar").unwrap();
            socket.write_all(b"\n\0").unwrap();
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        assert_eq!(read_response(&mut conn).unwrap(), "bar\n");
        server.join().unwrap();
    }
}
