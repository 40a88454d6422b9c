#![allow(dead_code)]

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use hunter_rs::bootstrap::{CommandOutput, CommandRunner, ProcessError};

pub const SENDER_PRIVATE: &str = include_str!("../fixtures/sender_private.pem");
pub const SENDER_PUBLIC: &str = include_str!("../fixtures/sender_public.pem");
pub const RECEIVER_PRIVATE: &str = include_str!("../fixtures/receiver_private.pem");
pub const RECEIVER_PUBLIC: &str = include_str!("../fixtures/receiver_public.pem");

/// Plays openssl by writing the sender fixture pair to the `-out` paths.
#[derive(Default)]
pub struct FakeOpenssl {
    calls: Mutex<Vec<String>>,
}

impl FakeOpenssl {
    /// Subcommands run so far, e.g. `["genrsa", "rsa"]`.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeOpenssl {
    fn run(&self, _program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let out = args.iter().position(|a| a == "-out").map(|i| PathBuf::from(&args[i + 1]));
        match (args[0].as_str(), out) {
            ("genrsa", Some(path)) => fs::write(path, SENDER_PRIVATE).unwrap(),
            ("rsa", Some(path)) => fs::write(path, SENDER_PUBLIC).unwrap(),
            _ => {}
        }
        self.calls.lock().unwrap().push(args[0].clone());
        Ok(CommandOutput {
            status: Some(0),
            ..CommandOutput::default()
        })
    }
}
