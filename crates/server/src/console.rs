use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use orbital::ActionCode;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Key(ActionCode),
    Pause,
    Resume,
    Save(PathBuf),
    Status,
    Quit,
}

pub fn parse(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        "save" => Command::Save(PathBuf::from(words.next()?)),
        other => Command::Key(ActionCode::from_name(other)?),
    };
    Some(command)
}

/// Reads commands from stdin on a background thread. End of input just stops
/// the reader; the server keeps running.
pub fn spawn() -> Receiver<Command> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse(&line) {
                Some(command) => {
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("Unknown command: {}", line.trim()),
            }
        }
    });
    receiver
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse("pause"), Some(Command::Pause));
        assert_eq!(parse("  save  game.sav "), Some(Command::Save("game.sav".into())));
        assert_eq!(parse("save"), None);
        assert_eq!(parse("fire-down"), Some(Command::Key(ActionCode::FireDown)));
        assert_eq!(parse("dance"), None);
        assert_eq!(parse(""), None);
    }
}
