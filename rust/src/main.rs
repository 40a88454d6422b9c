//! Operator CLI. Every command that needs the local key pair bootstraps it
//! first, so running any of them on a fresh host provisions the keys.

use std::env;
use std::fs;

use hunter_rs::bootstrap::{BootstrapContext, KeyImporter, Redacted};
use hunter_rs::config::Config;
use hunter_rs::crypto::wire::to_wire_bytes;
use hunter_rs::crypto::RsaCipher;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Commands:\n  bootstrap\n  seal <recipient-public.pem> <json-object>\n  open <sender-public.pem> <envelope-json>\n  import-key <dest> <pem-file>\n  fingerprint <pem-file>\n  redact <text>\n\nConfig is read from $HUNTER_CONFIG when set.");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn bootstrap() -> Option<BootstrapContext> {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config load failed: {err}");
            return None;
        }
    };
    match BootstrapContext::from_config(&config) {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("bootstrap failed: {err}");
            None
        }
    }
}

fn load_key(path: &str) -> Option<RsaCipher> {
    let pem = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {path}: {err}");
            return None;
        }
    };
    match RsaCipher::from_pem(&pem) {
        Ok(key) => Some(key),
        Err(err) => {
            eprintln!("invalid key in {path}: {err}");
            None
        }
    }
}

fn print_wire(value: &Value) {
    match to_wire_bytes(value).map(String::from_utf8) {
        Ok(Ok(text)) => println!("{text}"),
        Ok(Err(err)) => eprintln!("output is not UTF-8: {err}"),
        Err(err) => eprintln!("serialization failed: {err}"),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }
    init_logging();

    match args[1].as_str() {
        "bootstrap" => {
            if args.len() != 2 {
                return print_usage();
            }
            let Some(context) = bootstrap() else { return };
            match context.keys().fingerprint() {
                Ok(fp) => println!("fingerprint: {fp}"),
                Err(err) => eprintln!("fingerprint failed: {err}"),
            }
            print!("{}", context.keys().public_pem());
        }
        "seal" => {
            if args.len() != 4 {
                return print_usage();
            }
            let Some(recipient) = load_key(&args[2]) else { return };
            let payload = match serde_json::from_str::<Value>(&args[3]) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return eprintln!("payload must be a JSON object"),
                Err(err) => return eprintln!("invalid payload json: {err}"),
            };
            let Some(context) = bootstrap() else { return };
            match context.seal(&payload, &recipient) {
                Ok(envelope) => print_wire(&envelope.to_value()),
                Err(err) => eprintln!("seal failed: {err}"),
            }
        }
        "open" => {
            if args.len() != 4 {
                return print_usage();
            }
            let Some(sender) = load_key(&args[2]) else { return };
            let envelope: Value = match serde_json::from_str(&args[3]) {
                Ok(value) => value,
                Err(err) => return eprintln!("invalid envelope json: {err}"),
            };
            let Some(context) = bootstrap() else { return };
            let payload = context.open(&envelope, &sender);
            if payload.is_empty() {
                eprintln!("envelope rejected");
            }
            print_wire(&Value::Object(payload));
        }
        "import-key" => {
            if args.len() != 4 {
                return print_usage();
            }
            let pem = match fs::read_to_string(&args[3]) {
                Ok(text) => text,
                Err(err) => return eprintln!("cannot read {}: {err}", args[3]),
            };
            match KeyImporter::new(&args[2]).import_public_key(&pem) {
                Ok(key) => println!("imported {}-bit public key to {}", key.bits(), args[2]),
                Err(err) => eprintln!("import failed: {err}"),
            }
        }
        "fingerprint" => {
            if args.len() != 3 {
                return print_usage();
            }
            let Some(key) = load_key(&args[2]) else { return };
            match key.fingerprint() {
                Ok(fp) => println!("{fp}"),
                Err(err) => eprintln!("fingerprint failed: {err}"),
            }
        }
        "redact" => {
            if args.len() != 3 {
                return print_usage();
            }
            println!("{}", Redacted::new(&args[2]));
        }
        _ => print_usage(),
    }
}
