//! Worker side of the protocol.
//!
//! A worker binary (or an in-process task) wraps its inference engine in a
//! [`TranslationEngine`] and hands its channel to [`serve`].

use super::protocol::{
    read_frame, write_frame, TranslateRequest, TranslateResponse, WorkerCall, WorkerRequest,
    WorkerResponse,
};
use crate::error::Result;
use crate::fetch::descriptor::LocalModel;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// An inference engine driven through the worker protocol.
#[async_trait]
pub trait TranslationEngine: Send {
    /// Load models from local files.
    async fn initialize(&mut self, models: Vec<LocalModel>) -> Result<()>;

    async fn translate(&mut self, request: TranslateRequest) -> Result<TranslateResponse>;

    /// Release engine resources. The worker exits afterwards.
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Answer requests until the channel closes or `dispose` is handled.
///
/// Requests are handled one at a time, in arrival order.
pub async fn serve<R, W>(mut reader: R, mut writer: W, mut engine: Box<dyn TranslationEngine>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = read_frame(&mut reader).await? {
        let request = match WorkerRequest::from_slice(&frame) {
            Ok(request) => request,
            Err((Some(id), e)) => {
                let response = WorkerResponse::error(id, e.to_string(), None);
                write_frame(&mut writer, &serde_json::to_vec(&response)?).await?;
                continue;
            }
            Err((None, e)) => {
                warn!("Ignoring request without id: {}", e);
                continue;
            }
        };

        let name = request.call.name();
        let disposing = matches!(request.call, WorkerCall::Dispose);
        let outcome = match request.call {
            WorkerCall::Initialize { models } => engine
                .initialize(models)
                .await
                .map(|()| serde_json::Value::Null),
            WorkerCall::Translate(args) => match engine.translate(args).await {
                Ok(translated) => serde_json::to_value(translated).map_err(Into::into),
                Err(e) => Err(e),
            },
            WorkerCall::Dispose => engine.dispose().await.map(|()| serde_json::Value::Null),
        };

        let response = match outcome {
            Ok(value) => WorkerResponse::success(request.id, value),
            Err(e) => {
                debug!("Worker call #{} {} failed: {}", request.id, name, e);
                WorkerResponse::error(request.id, e.to_string(), Some(format!("at worker.{}", name)))
            }
        };
        write_frame(&mut writer, &serde_json::to_vec(&response)?).await?;

        if disposing {
            debug!("Worker disposed");
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinguaError;
    use crate::rpc::transport::RpcTransport;
    use tokio::io::{duplex, split};

    struct UppercaseEngine {
        loaded: bool,
    }

    #[async_trait]
    impl TranslationEngine for UppercaseEngine {
        async fn initialize(&mut self, models: Vec<LocalModel>) -> Result<()> {
            self.loaded = !models.is_empty();
            Ok(())
        }

        async fn translate(&mut self, request: TranslateRequest) -> Result<TranslateResponse> {
            if !self.loaded {
                return Err(LinguaError::Other("no model loaded".into()));
            }
            Ok(TranslateResponse::new(request.text.to_uppercase()))
        }
    }

    fn start() -> (RpcTransport, tokio::task::JoinHandle<Result<()>>) {
        let (client, worker) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (worker_read, worker_write) = split(worker);
        let task = tokio::spawn(serve(
            worker_read,
            worker_write,
            Box::new(UppercaseEngine { loaded: false }),
        ));
        (RpcTransport::new("en-fr", client_read, client_write), task)
    }

    fn request(text: &str) -> TranslateRequest {
        TranslateRequest {
            from: "en".into(),
            to: "fr".into(),
            text: text.into(),
            html: false,
        }
    }

    #[tokio::test]
    async fn test_initialize_translate_dispose() {
        let (transport, task) = start();

        let models = vec![LocalModel {
            from: "en".into(),
            to: "fr".into(),
            files: vec![],
        }];
        transport.initialize(models).await.unwrap();
        let translated = transport.translate(request("hello")).await.unwrap();
        assert_eq!(translated.target.text, "HELLO");

        transport.dispose().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_engine_error_reaches_caller() {
        let (transport, _task) = start();

        let err = transport.translate(request("hello")).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no model loaded"));
        assert!(message.contains("translate("));
    }
}
