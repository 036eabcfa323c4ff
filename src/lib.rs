mod env;
mod error;

pub mod gateway;
pub mod types;
pub mod utils;

pub use env::{Env, parse_dotenv};
pub use error::{RelayError, Result};
pub use gateway::{Gateway, GatewayConfig, GatewayError, GatewayHttpState};
pub use types::{
    ChatRequest, ContentPart, ExtractedDocument, ImageUrl, Message, MessageContent, Role,
    UploadStatus, UploadedFile,
};
