//! Build script for the dxsession crate.
//!
//! Loads Auth0 and backend settings at compile time so `Auth0Config::from_env()`
//! can read them through `option_env!()`.
//!
//! Priority order:
//! 1. Environment variables already set (e.g., from CI/CD, system env)
//! 2. Variables from `.env` file (if it exists)
//! 3. Variables from `.env.example` file (fallback for CI builds)

use std::env;
use std::fs;
use std::path::PathBuf;

const REQUIRED_VARS: [&str; 4] = [
    "AUTH0_DOMAIN",
    "AUTH0_CLIENT_ID",
    "AUTH0_AUDIENCE",
    "API_BASE_URL",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-changed=.env.example");
    println!("cargo:rerun-if-env-changed=AUTH0_REALM");
    for var in REQUIRED_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let root = PathBuf::from(manifest_dir);
    let env_file = root.join(".env");
    let env_example_file = root.join(".env.example");

    let env_vars_set = REQUIRED_VARS
        .iter()
        .filter(|&var| env::var(var).is_ok())
        .count();

    let file_to_load = if env_file.exists() {
        Some(env_file)
    } else if env_vars_set == 0 && env_example_file.exists() {
        Some(env_example_file)
    } else {
        None
    };

    let Some(file_path) = file_to_load else {
        if env_vars_set == 0 {
            println!("cargo:warning=No .env file and no AUTH0_* / API_BASE_URL variables set");
        }
        return;
    };

    let contents = match fs::read_to_string(&file_path) {
        Ok(contents) => contents,
        Err(e) => {
            println!("cargo:warning=Failed to read {}: {}", file_path.display(), e);
            return;
        }
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            // Environment wins over the file
            if env::var(key).is_err() {
                println!("cargo:rustc-env={}={}", key, value);
            }
        }
    }
}
