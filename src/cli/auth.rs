use std::error::Error;
use std::io::{self, BufRead, Write};

use crate::core::keyring::{delete_api_key, resolve_api_key, store_api_key, KeySource};

pub fn store_interactively() -> Result<(), Box<dyn Error>> {
    print!("Enter your avatar service API key: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    let key = parse_key(&input).ok_or("API key cannot be empty")?;

    store_api_key(key)?;
    println!("✅ API key stored in the system keyring");

    if let Some(resolved) = resolve_api_key()? {
        if let KeySource::Env(var) = resolved.source {
            println!("⚠️  {var} is set and takes precedence over the stored key");
        }
    }
    Ok(())
}

pub fn remove() -> Result<(), Box<dyn Error>> {
    if delete_api_key()? {
        println!("✅ API key removed from the system keyring");
    } else {
        println!("No API key was stored");
    }
    Ok(())
}

fn parse_key(input: &str) -> Option<&str> {
    let key = input.trim();
    (!key.is_empty()).then_some(key)
}
