//! The completion client: blocking and streaming calls.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use llm_dialects::audit::{AuditLog, AuditRecord};
use llm_dialects::error::{TimeoutPhase, is_retryable_status};
use llm_dialects::parser::{ToolCallParser, parser_for};
use llm_dialects::stream::Accumulator;
use llm_dialects::{
    LlmError, ModelConfig, PartialResult, Prompt, StopReason, StreamEvent, ToolCall, Usage,
    dialect_for,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::endpoint::{
    DecodeState, Endpoint, RequestParts, check_compatible, endpoint_for, millis, transport_error,
};
use crate::framing::{Frame, FrameDecoder};
use crate::options::{ClientOptions, GenerateOptions};
use crate::retry::{RetryPolicy, with_retry};
use crate::state::RequestState;

/// The result of a finished or cancelled call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The model's text output.
    pub text: String,
    /// Tool calls the model made, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Token counts, from the provider where reported.
    pub usage: Usage,
    /// Whether any count in `usage` came from the model's tokenizer.
    pub usage_estimated: bool,
    /// Why the model stopped, when the provider said.
    pub stop_reason: Option<StopReason>,
    /// The terminal request state.
    pub state: RequestState,
}

/// An event on a [`CompletionStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// The visible output changed.
    Partial(PartialResult),
    /// The response ended normally. Always the last event.
    Completed(Completion),
    /// The caller cancelled. Always the last event; carries what arrived
    /// before cancellation.
    Cancelled(Completion),
}

/// A streamed completion.
///
/// Yields [`CompletionEvent::Partial`] whenever new text or a completed
/// tool call arrives, then exactly one terminal event. An `Err` item also
/// ends the stream.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<CompletionEvent, LlmError>> + Send>>,
    cancel: CancellationToken,
}

impl CompletionStream {
    /// Stops the stream at the next event boundary. The stream then yields
    /// [`CompletionEvent::Cancelled`] and closes the connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this stream, for handing to other tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionEvent, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Sends prompts to providers.
///
/// Holds the shared HTTP client, the audit sink, and the side-call retry
/// policy. Everything model-specific comes in with each call, so one client
/// serves every configured model.
///
/// ```rust,no_run
/// use llm_dialects::{Message, ModelConfig, Prompt, Provider};
/// use llm_dialects_client::{ClientOptions, CompletionClient, GenerateOptions};
///
/// # async fn example() -> Result<(), llm_dialects::LlmError> {
/// let client = CompletionClient::new(ClientOptions::default())?;
/// let model = ModelConfig::new(Provider::OpenAi, "gpt-4o").with_api_key("sk-...");
/// let prompt = Prompt::new("You are a helpful bot").with_messages([Message::user("hello")])?;
/// let completion = client.complete(&prompt, &model, &GenerateOptions::default()).await?;
/// println!("{}", completion.text);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    audit: Option<Arc<dyn AuditLog>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("audit", &self.audit.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// A request ready to send.
struct Prepared {
    endpoint: &'static dyn Endpoint,
    parser: Box<dyn ToolCallParser>,
    body: Value,
    finish: Finisher,
}

impl CompletionClient {
    /// Builds a client. Reuses `options.http` when given.
    pub fn new(options: ClientOptions) -> Result<Self, LlmError> {
        let http = match options.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| LlmError::configuration(format!("failed to build HTTP client: {e}")))?,
        };
        Ok(Self {
            http,
            audit: options.audit,
            retry: options.retry,
        })
    }

    /// Runs a side-effecting helper call under the client's retry policy.
    ///
    /// Use this for provider calls a tool makes on the model's behalf.
    /// Completion calls are never retried implicitly.
    pub async fn retry<T, F, Fut>(&self, op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        with_retry(&self.retry, op).await
    }

    /// Validates, trims, and renders `prompt`, and builds the request body.
    /// Every configuration error surfaces here, before any network call.
    fn prepare(
        &self,
        prompt: &Prompt,
        model: &ModelConfig,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<Prepared, LlmError> {
        model.validate()?;
        let kind = model.dialect_kind();
        let endpoint = endpoint_for(model);
        check_compatible(endpoint, kind)?;

        let dialect = dialect_for(kind);
        let rendered = dialect.translate(prompt, model)?;
        let body = endpoint.body(&RequestParts {
            rendered: &rendered,
            model,
            options,
            stream,
        })?;
        let estimated_input = to_u64(model.tokenizer.size(&rendered.token_text()));

        Ok(Prepared {
            endpoint,
            parser: parser_for(dialect, model, prompt.tools()),
            finish: Finisher {
                model: model.clone(),
                audit: self.audit.clone(),
                request_payload: body.to_string(),
                estimated_input,
            },
            body,
        })
    }

    fn request(
        &self,
        endpoint: &dyn Endpoint,
        model: &ModelConfig,
        body: &Value,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, LlmError> {
        Ok(self
            .http
            .post(endpoint.url(model, stream))
            .headers(endpoint.headers(model)?)
            .json(body))
    }

    /// Sends `prompt` and waits for the whole response.
    #[instrument(skip_all, fields(provider = %model.provider, model = %model.name))]
    pub async fn complete(
        &self,
        prompt: &Prompt,
        model: &ModelConfig,
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let mut prepared = self.prepare(prompt, model, options, false)?;
        let mut state = RequestState::default();
        state.advance(RequestState::Sending);

        match self.receive(&mut prepared, model, options, &mut state).await {
            Ok(acc) => {
                state.advance(RequestState::Completed);
                let completion = prepared.finish.completion(acc, state);
                prepared.finish.audit(&completion);
                Ok(completion)
            }
            Err(err) => {
                state.advance(RequestState::Failed);
                Err(err)
            }
        }
    }

    async fn receive(
        &self,
        prepared: &mut Prepared,
        model: &ModelConfig,
        options: &GenerateOptions,
        state: &mut RequestState,
    ) -> Result<Accumulator, LlmError> {
        let endpoint = prepared.endpoint;
        let timeout = options.timeout.unwrap_or(model.request_timeout);
        let response = self
            .request(endpoint, model, &prepared.body, false)?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, timeout))?;
        let response = check_status(endpoint, response, timeout).await?;
        state.advance(RequestState::Receiving);

        let body = response.text().await.map_err(|e| transport_error(&e, timeout))?;
        let mut acc = Accumulator::new();
        for event in endpoint.decode_response(&body)? {
            for out in prepared.parser.push(event)? {
                acc.apply(out);
            }
        }
        for out in prepared.parser.finish()? {
            acc.apply(out);
        }
        Ok(acc)
    }

    /// Sends `prompt` and streams the response.
    ///
    /// Configuration errors, connect failures, and non-2xx responses are
    /// returned here. Errors after the first byte arrive on the stream.
    #[instrument(skip_all, fields(provider = %model.provider, model = %model.name))]
    pub async fn stream(
        &self,
        prompt: &Prompt,
        model: &ModelConfig,
        options: &GenerateOptions,
    ) -> Result<CompletionStream, LlmError> {
        let prepared = self.prepare(prompt, model, options, true)?;
        let mut state = RequestState::default();
        state.advance(RequestState::Sending);

        let timeout = options.timeout.unwrap_or(model.request_timeout);
        let endpoint = prepared.endpoint;
        let request = self.request(endpoint, model, &prepared.body, true)?;
        // an error body is read inside the same deadline as the headers
        let send = async {
            let response = request.send().await.map_err(|e| transport_error(&e, timeout))?;
            check_status(endpoint, response, timeout).await
        };
        let response = match tokio::time::timeout(timeout, send).await {
            Err(_) => Err(LlmError::Timeout {
                elapsed_ms: millis(timeout),
                phase: TimeoutPhase::Request,
            }),
            Ok(result) => result,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                state.advance(RequestState::Failed);
                return Err(err);
            }
        };
        state.advance(RequestState::Streaming);

        let cancel = CancellationToken::new();
        let driver = StreamDriver {
            body: Some(Box::pin(response.bytes_stream())),
            decoder: FrameDecoder::new(prepared.endpoint.framing()),
            decode_state: DecodeState::default(),
            endpoint: prepared.endpoint,
            parser: prepared.parser,
            acc: Accumulator::new(),
            pending: VecDeque::new(),
            cancel: cancel.clone(),
            idle_timeout: model.stream_idle_timeout,
            state,
            finish: prepared.finish,
            finished: false,
        };
        Ok(CompletionStream {
            inner: Box::pin(driver.into_stream()),
            cancel,
        })
    }

    /// Streams `prompt`, calling `on_partial` with the accumulated result
    /// after every visible change.
    ///
    /// `on_partial` receives the stream's cancellation token; cancelling it
    /// ends the call with a [`RequestState::Cancelled`] completion rather
    /// than an error.
    pub async fn generate_streaming<F>(
        &self,
        prompt: &Prompt,
        model: &ModelConfig,
        options: &GenerateOptions,
        mut on_partial: F,
    ) -> Result<Completion, LlmError>
    where
        F: FnMut(&PartialResult, &CancellationToken),
    {
        let mut stream = self.stream(prompt, model, options).await?;
        let cancel = stream.cancel_token();
        while let Some(event) = stream.next().await {
            match event? {
                CompletionEvent::Partial(partial) => on_partial(&partial, &cancel),
                CompletionEvent::Completed(completion) | CompletionEvent::Cancelled(completion) => {
                    return Ok(completion);
                }
            }
        }
        Err(LlmError::ResponseFormat {
            message: "stream ended without a terminal event".into(),
            raw: String::new(),
        })
    }
}

async fn check_status(
    endpoint: &dyn Endpoint,
    response: reqwest::Response,
    timeout: Duration,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let status = http::StatusCode::from_u16(status.as_u16())
        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
    match response.text().await {
        Ok(body) => Err(endpoint.convert_error(status, &body)),
        Err(e) if e.is_timeout() => Err(transport_error(&e, timeout)),
        Err(e) => Err(LlmError::Provider {
            status: Some(status),
            message: format!("failed to read error body: {e}"),
            body: String::new(),
            retryable: is_retryable_status(status),
        }),
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Builds the final [`Completion`] and writes the audit record.
struct Finisher {
    model: ModelConfig,
    audit: Option<Arc<dyn AuditLog>>,
    request_payload: String,
    estimated_input: u64,
}

impl Finisher {
    fn completion(&self, acc: Accumulator, state: RequestState) -> Completion {
        let (partial, reported, stop_reason) = acc.into_parts();
        let (usage, usage_estimated) = fill_usage(reported, self.estimated_input, || {
            to_u64(self.model.tokenizer.size(&response_payload(&partial.text, &partial.tool_calls)))
        });
        Completion {
            text: partial.text,
            tool_calls: partial.tool_calls,
            usage,
            usage_estimated,
            stop_reason,
            state,
        }
    }

    /// Records a completed call. A failing sink is logged, never raised.
    fn audit(&self, completion: &Completion) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = AuditRecord {
            provider: self.model.provider,
            model: self.model.name.clone(),
            request_payload: self.request_payload.clone(),
            response_payload: response_payload(&completion.text, &completion.tool_calls),
            usage: completion.usage.clone(),
            usage_estimated: completion.usage_estimated,
        };
        if let Err(e) = audit.record(record) {
            tracing::warn!(error = %e, "failed to write audit record");
        }
    }
}

/// The text plus each tool call's `{name, arguments}` document.
fn response_payload(text: &str, calls: &[ToolCall]) -> String {
    let mut out = text.to_owned();
    for call in calls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&call.to_content());
    }
    out
}

/// Fills counts the provider left at zero from tokenizer estimates.
fn fill_usage(
    reported: Option<Usage>,
    estimated_input: u64,
    estimate_output: impl FnOnce() -> u64,
) -> (Usage, bool) {
    let mut usage = reported.unwrap_or_default();
    let mut estimated = false;
    if usage.input_tokens == 0 && estimated_input > 0 {
        usage.input_tokens = estimated_input;
        estimated = true;
    }
    if usage.output_tokens == 0 {
        let output = estimate_output();
        if output > 0 {
            usage.output_tokens = output;
            estimated = true;
        }
    }
    (usage, estimated)
}

/// Reads one streamed response.
///
/// Decoded events queue in `pending` and are merged one at a time, so a
/// cancellation requested while handling one partial result takes effect
/// before the next event is merged, even when a single network chunk
/// carried many events.
struct StreamDriver<S> {
    body: Option<Pin<Box<S>>>,
    decoder: FrameDecoder,
    decode_state: DecodeState,
    endpoint: &'static dyn Endpoint,
    parser: Box<dyn ToolCallParser>,
    acc: Accumulator,
    pending: VecDeque<StreamEvent>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    state: RequestState,
    finish: Finisher,
    finished: bool,
}

impl<S, B> StreamDriver<S>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    fn into_stream(self) -> impl Stream<Item = Result<CompletionEvent, LlmError>> {
        futures::stream::unfold(self, |mut driver| async move {
            let item = driver.next_event().await?;
            Some((item, driver))
        })
    }

    async fn next_event(&mut self) -> Option<Result<CompletionEvent, LlmError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                return Some(Ok(self.cancelled()));
            }
            if let Some(event) = self.pending.pop_front() {
                if self.acc.apply(event) {
                    return Some(Ok(CompletionEvent::Partial(self.acc.partial().clone())));
                }
                continue;
            }
            let Some(body) = self.body.as_mut() else {
                return Some(Ok(self.completed()));
            };

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                read = tokio::time::timeout(self.idle_timeout, body.next()) => Some(read),
            };
            let Some(read) = read else {
                continue;
            };
            let step = match read {
                Err(_) => Err(LlmError::Timeout {
                    elapsed_ms: millis(self.idle_timeout),
                    phase: TimeoutPhase::StreamIdle,
                }),
                Ok(Some(Ok(bytes))) => self.ingest(bytes.as_ref()),
                Ok(Some(Err(e))) => Err(transport_error(&e, self.idle_timeout)),
                Ok(None) => self.end_of_body(),
            };
            if let Err(err) = step {
                return Some(Err(self.failed(err)));
            }
        }
    }

    fn ingest(&mut self, bytes: &[u8]) -> Result<(), LlmError> {
        for frame in self.decoder.push(bytes)? {
            self.decode(&frame)?;
        }
        Ok(())
    }

    fn decode(&mut self, frame: &Frame) -> Result<(), LlmError> {
        for event in self.endpoint.decode_frame(frame, &mut self.decode_state)? {
            let out = self.parser.push(event)?;
            self.pending.extend(out);
        }
        Ok(())
    }

    fn end_of_body(&mut self) -> Result<(), LlmError> {
        self.body = None;
        for frame in self.decoder.finish() {
            self.decode(&frame)?;
        }
        let out = self.parser.finish()?;
        self.pending.extend(out);
        Ok(())
    }

    fn completed(&mut self) -> CompletionEvent {
        self.finished = true;
        self.state.advance(RequestState::Completed);
        let completion = self.finish.completion(std::mem::take(&mut self.acc), self.state);
        self.finish.audit(&completion);
        CompletionEvent::Completed(completion)
    }

    fn cancelled(&mut self) -> CompletionEvent {
        self.finished = true;
        self.body = None;
        self.acc.cancel();
        self.state.advance(RequestState::Cancelled);
        tracing::debug!(endpoint = self.endpoint.name(), "stream cancelled");
        let acc = std::mem::take(&mut self.acc);
        CompletionEvent::Cancelled(self.finish.completion(acc, self.state))
    }

    fn failed(&mut self, err: LlmError) -> LlmError {
        self.finished = true;
        self.body = None;
        self.state.advance(RequestState::Failed);
        err
    }
}

#[cfg(test)]
mod tests {
    use llm_dialects::test_helpers::tool_call;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reported_usage_kept() {
        let (usage, estimated) = fill_usage(Some(Usage::new(12, 3)), 40, || 9);
        assert_eq!(usage, Usage::new(12, 3));
        assert!(!estimated);
    }

    #[test]
    fn test_missing_counts_estimated() {
        let (usage, estimated) = fill_usage(Some(Usage::new(0, 5)), 40, || 9);
        assert_eq!(usage, Usage::new(40, 5));
        assert!(estimated);

        let (usage, estimated) = fill_usage(None, 40, || 9);
        assert_eq!(usage, Usage::new(40, 9));
        assert!(estimated);
    }

    #[test]
    fn test_response_payload_includes_calls() {
        let call = tool_call("c1", "search", json!({"query": "rust"}));
        let payload = response_payload("Searching.", &[call.clone()]);
        assert_eq!(payload, format!("Searching.\n{}", call.to_content()));
        assert_eq!(response_payload("", &[call.clone()]), call.to_content());
    }

    #[test]
    fn test_client_reuses_http() {
        let client = CompletionClient::new(ClientOptions {
            http: Some(reqwest::Client::new()),
            ..Default::default()
        });
        assert!(client.is_ok());
    }
}
