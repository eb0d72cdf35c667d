//! Demo: encrypt a padded message, then recover it through a padding oracle.

use std::process::ExitCode;

use anyhow::{ensure, Context, Result};
use bleichenbacher::oracles::{Conformance, HttpOracle, OracleServer, Pkcs1Oracle};
use bleichenbacher::padding::Padding;
use bleichenbacher::rsa::{gen_rsa, rsa_public_raw, RsaKey};
use bleichenbacher::{bytes_to_int, Bleichenbacher};
use clap::Parser;
use log::info;
use num_bigint::BigUint;

#[derive(Parser)]
#[command(name = "bleichenbacher")]
#[command(about = "Bleichenbacher's PKCS#1 v1.5 padding oracle attack")]
struct Cli {
    #[arg(long, default_value = "256", help = "RSA modulus size in bits")]
    bits: u64,

    #[arg(long, default_value = "3", help = "Public exponent")]
    exponent: u32,

    #[arg(long, default_value = "1337h4x0rz")]
    message: String,

    #[arg(long, help = "Oracle also checks padding length and separator")]
    strict: bool,

    #[arg(long, help = "Query the oracle over a local HTTP server")]
    http: bool,

    #[arg(long, default_value = "1", help = "Oracle queries issued concurrently")]
    threads: usize,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let (public_key, private_key) =
        gen_rsa(cli.bits, &BigUint::from(cli.exponent)).context("generating key")?;
    info!("generated {}-bit key", public_key.modulus().bits());

    let message = cli.message.as_bytes();
    let padded = Padding::pkcs1_encryption(public_key.size()).pad(message)?;
    let ciphertext = rsa_public_raw(&public_key, &bytes_to_int(&padded))?.to_bytes_be();

    let conformance = if cli.strict {
        Conformance::Strict
    } else {
        Conformance::Lax
    };
    let oracle = Pkcs1Oracle::with_conformance(private_key, conformance);

    let (recovered, outcome) = if cli.http {
        let server = OracleServer::new(oracle)?;
        println!("Oracle listening at {}", server.oracle_url());
        let oracle = HttpOracle::new(&server.oracle_url());
        Bleichenbacher::new(&public_key, &ciphertext, oracle)?
            .with_batch_width(cli.threads)
            .recover_message()?
    } else {
        Bleichenbacher::new(&public_key, &ciphertext, oracle)?
            .with_batch_width(cli.threads)
            .recover_message()?
    };

    println!("Original:  {}", String::from_utf8_lossy(message));
    println!("Recovered: {}", String::from_utf8_lossy(&recovered));
    println!("Padded:    {}", hex::encode(&padded));
    println!("Queries:   {}", outcome.queries);
    println!("Rounds:    {}", outcome.rounds);

    ensure!(recovered == message, "recovered plaintext does not match");
    Ok(())
}
