use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use orbital::ActionCode;

/// What a line typed at the client console asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Key(ActionCode),
    Save(PathBuf),
    Quit,
}

pub fn parse(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "quit" | "exit" => Some(Input::Quit),
        "save" => words.next().map(|path| Input::Save(PathBuf::from(path))),
        other => ActionCode::from_name(other).map(Input::Key),
    }
}

pub fn spawn() -> Receiver<Input> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse(&line) {
                Some(input) => {
                    if sender.send(input).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("Unknown input: {}", line.trim()),
            }
        }
    });
    receiver
}
