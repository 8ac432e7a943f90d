//! Cliente mínimo da API Anthropic Messages, usado como backend de geração.
//!
//! O trait [`MessageSender`] é a costura entre o gerador e o transporte HTTP:
//! testes implementam mocks sem rede, produção usa [`AnthropicClient`].

pub mod client;
pub mod error;
pub mod types;

pub use client::{AnthropicClient, MessageSender};
pub use error::AnthropicError;
pub use types::{ContentBlock, Message, MessagesRequest, MessagesResponse, Usage};
