//! AllyKV CLI Client
//!
//! Command-line interface for interacting with AllyKV.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::process;

use allykv::protocol::{read_response, write_command, Command, Status};
use clap::{Parser, Subcommand};

/// AllyKV CLI
#[derive(Parser, Debug)]
#[command(name = "allykv-cli")]
#[command(about = "CLI for AllyKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Store a key-value pair
    Put {
        /// The key to store
        key: String,

        /// The value to store (must not be empty)
        value: String,
    },

    /// Ping the server
    Ping,
}

fn main() {
    let args = Args::parse();

    let command = match args.command {
        Commands::Get { key } => Command::Get {
            key: key.into_bytes(),
        },
        Commands::Put { key, value } => Command::Put {
            key: key.into_bytes(),
            value: value.into_bytes(),
        },
        Commands::Ping => Command::Ping,
    };

    match send(&args.server, &command) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(2);
        }
    }
}

/// Send one command and print the response; returns the exit code
fn send(server: &str, command: &Command) -> allykv::Result<i32> {
    let stream = TcpStream::connect(server)?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut reader = BufReader::new(stream);

    write_command(&mut writer, command)?;
    let response = read_response(&mut reader)?;

    match response.status {
        Status::Ok => {
            match command {
                Command::Put { .. } => println!("OK"),
                _ => println!("{}", response.payload_text()),
            }
            Ok(0)
        }
        Status::NotFound => {
            println!("(not found)");
            Ok(1)
        }
        Status::Error => {
            eprintln!("server error: {}", response.payload_text());
            Ok(2)
        }
    }
}
