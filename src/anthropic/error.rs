//! Tipos de erro para o cliente da API Anthropic.

use std::time::Duration;

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API da Anthropic.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after` (padrão 1s).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status não-2xx, com o corpo da resposta como mensagem.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// A requisição excedeu o timeout configurado no cliente.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Nenhuma chave configurada; o cliente não chega a ser construído.
    #[error("missing API key")]
    MissingApiKey,

    /// A resposta chegou com sucesso mas sem nenhum bloco de texto.
    #[error("response {id} has no text content")]
    EmptyResponse { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = AnthropicError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn empty_response_display() {
        let err = AnthropicError::EmptyResponse {
            id: "msg_1".into(),
        };
        assert_eq!(err.to_string(), "response msg_1 has no text content");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnthropicError>();
    }
}
