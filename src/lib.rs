pub mod chat;
pub mod constants;
pub mod response;
pub mod reveal;
pub mod web_server;

pub use chat::{ChatSession, ChatView};
pub use response::{MockResponseSource, QueryResponsePair, ResponseError, ResponseSource};
pub use reveal::{reveal_stream, RevealFrame, RevealPhase, RevealState, RevealUnit, Revealer};
