use serde::{Deserialize, Serialize};

use quarry_types::{Block, Transaction};

use crate::P2pError;

/// Upper bound on one encoded envelope, newline included.
pub const MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// One protocol envelope: `{"type": ..., "data": ...}` on a single line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Tx(Transaction),
    Block(Block),
    Mine { miner: String },
    GetChain {},
    Chain(Vec<Block>),
}

const KNOWN_TYPES: [&str; 5] = ["tx", "block", "mine", "get_chain", "chain"];

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::Mine { .. } => "mine",
            Message::GetChain {} => "get_chain",
            Message::Chain(_) => "chain",
        }
    }
}

/// Serialize `msg` as one newline-terminated line.
pub fn encode_line(msg: &Message) -> Result<String, P2pError> {
    let mut line = serde_json::to_string(msg)?;
    if line.len() + 1 > MAX_MESSAGE_BYTES {
        return Err(P2pError::MessageTooLarge);
    }
    line.push('\n');
    Ok(line)
}

/// Parse one line. `Ok(None)` is a well-formed envelope of a type this node
/// does not speak.
pub fn decode_line(line: &[u8]) -> Result<Option<Message>, P2pError> {
    #[derive(Deserialize)]
    struct Kind {
        #[serde(rename = "type")]
        kind: String,
    }

    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match serde_json::from_slice::<Message>(line) {
        Ok(msg) => Ok(Some(msg)),
        Err(err) => match serde_json::from_slice::<Kind>(line) {
            Ok(Kind { kind }) if !KNOWN_TYPES.contains(&kind.as_str()) => Ok(None),
            _ => Err(err.into()),
        },
    }
}
