//! Terminal commands typed by the user.

use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Name(String),
    Message(String),
    Buy,
    Memos,
    Refresh,
    Status,
    Withdraw,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  connect            ask the wallet to authorize an account
  name <text>        set your nickname
  message <text>     set the message to leave
  buy                send 1 coffee for 0.001 ETH
  memos              show memos received
  refresh            re-fetch memo history from the contract
  status             show connection and draft
  withdraw           send all tips to the contract owner
  help               show this help
  quit               leave";

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "connect" => Self::Connect,
            "name" => Self::Name(rest.to_string()),
            "message" | "msg" => Self::Message(rest.to_string()),
            "buy" | "send" => Self::Buy,
            "memos" | "list" => Self::Memos,
            "refresh" => Self::Refresh,
            "status" => Self::Status,
            "withdraw" => Self::Withdraw,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "" => return Err("type `help` for commands".to_string()),
            other => return Err(format!("unknown command `{other}`; type `help`")),
        };
        Ok(command)
    }
}
