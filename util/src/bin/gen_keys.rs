//! Password/key generator for `sockd` deployments.
//!
//! A uniform sample over an allowed-character alphabet, written one per
//! line to an output file, with a derived-key preview alongside each one
//! so an operator can confirm two deployments were configured with the
//! same password without ever transmitting the password itself.

use std::fs;
use std::io::{LineWriter, Write};

use clap::Parser;
use rand::distributions::Uniform;
use rand::prelude::*;

use sockd_crypto::derive_key;

const ALLOWED_CHARS: &[u8] = b"123456789abcdefghijklmnopqrstuvwxyz";
const DEFAULT_KEY_LEN: usize = 24;

/// Generates random sockd passwords and previews their derived key.
#[derive(Parser, Debug)]
#[command(name = "gen_keys", version, about)]
struct Cli {
    /// Number of passwords to generate.
    count: usize,

    /// Optional file to append the generated passwords to, one per line.
    #[arg(long)]
    out_file: Option<String>,

    /// Length of each generated password.
    #[arg(long, default_value_t = DEFAULT_KEY_LEN)]
    key_len: usize,
}

fn make_key(rng: &mut ThreadRng, len: usize) -> String {
    let dist = Uniform::new(0, ALLOWED_CHARS.len());
    rng.sample_iter(&dist).take(len).map(|i| ALLOWED_CHARS[i] as char).collect()
}

fn main() {
    let cli = Cli::parse();
    let mut rng = thread_rng();

    let mut keys = Vec::with_capacity(cli.count);
    for _ in 0..cli.count {
        let key = make_key(&mut rng, cli.key_len);
        let derived = derive_key(key.as_bytes());
        println!("password: {key}  derived-key: {}", hex_preview(&derived));
        keys.push(key);
    }

    if let Some(path) = cli.out_file {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap_or_else(|err| panic!("failed to open {path}: {err}"));
        let mut writer = LineWriter::new(file);
        for key in &keys {
            writer.write_all(key.as_bytes()).expect("failed writing key file");
            writer.write_all(b"\n").expect("failed writing key file");
        }
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
