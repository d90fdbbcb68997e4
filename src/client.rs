use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::builder::RequestBuilder;
use crate::config::{BudgetConfig, ClientConfig};
use crate::cost::{CostLedger, UsageRecord, UsageTracker, calculate_cost, estimate_request_cost};
use crate::error::AIError;
use crate::http::reqwest::default_dyn_transport;
use crate::http::{
    DynHttpTransport, HttpRequest, post_json_stream_with_headers, post_json_with_headers,
};
use crate::pricing::pricing_for;
use crate::provider::error::parse_error_response;
use crate::provider::{
    StreamTranslator, accepts_image_urls, build_body, endpoint, parse_completion,
};
use crate::resolver::{AliasTable, resolve_provider};
use crate::retry::{RetryConfig, RetryPolicy, run_with_fallback};
use crate::stream::{ChatStream, StreamDecoder, chunk_stream, collect_body_text, error_stream};
use crate::types::{
    ChatMessage, ChatRequest, ChatResult, ContentPart, ImageSource, MessageContent, Provider,
    StreamChunk,
};

/// Fallback MIME type for fetched images served without `Content-Type`.
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Entry point for every dispatch.
///
/// Owns the transport, the configuration and the cost ledger. Cheap to share behind
/// an `Arc`; all methods take `&self`.
pub struct AIClient {
    transport: DynHttpTransport,
    config: ClientConfig,
    aliases: AliasTable,
    retry: RetryPolicy,
    recorder: Recorder,
}

/// Model, provider and credential a dispatch resolved to.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) model: String,
    pub(crate) provider: Provider,
    api_key: String,
}

#[derive(Clone)]
struct Recorder {
    ledger: Arc<CostLedger>,
    tracker: Option<Arc<dyn UsageTracker>>,
}

impl Recorder {
    fn record(&self, record: &UsageRecord) {
        self.ledger.track(record);
        if let Some(tracker) = &self.tracker {
            tracker.track(record);
        }
    }
}

impl AIClient {
    pub fn builder() -> AIClientBuilder {
        AIClientBuilder::default()
    }

    /// Builds a client over the default reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, AIError> {
        Self::builder().config(config).build()
    }

    /// Builds a client whose credentials come from the environment.
    pub fn from_env() -> Result<Self, AIError> {
        Self::new(ClientConfig::default().with_env_credentials())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The ledger every successful dispatch is recorded in.
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.recorder.ledger
    }

    /// Canonical model id for `token`; non-aliases come back unchanged.
    pub fn resolve_alias(&self, token: &str) -> String {
        self.aliases.resolve(token)
    }

    /// Provider family serving `model`, after alias resolution.
    pub fn resolve_provider(&self, model: &str) -> Option<Provider> {
        resolve_provider(&self.resolve_alias(model))
    }

    /// Starts a fluent request for `model`.
    pub fn request(&self, model: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, model)
    }

    /// One-shot single prompt through the orchestrator.
    pub async fn ask(
        &self,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<ChatResult, AIError> {
        let mut request = ChatRequest::new(model);
        request.messages.push(ChatMessage::user(prompt));
        self.chat(request).await
    }

    /// Dispatches `request` over the primary model and the configured fallbacks.
    ///
    /// Retryable failures are retried per the client's retry policy; anything else
    /// moves straight to the next candidate.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResult, AIError> {
        let candidates = self.candidates(&request)?;
        let request = &request;
        run_with_fallback(
            &candidates,
            &self.retry,
            request.cancellation.as_ref(),
            |model, attempt| async move { self.dispatch(request, &model, attempt).await },
        )
        .await
    }

    /// Dispatches `request` exactly once, without retry or fallback.
    pub async fn send_once(&self, request: ChatRequest) -> Result<ChatResult, AIError> {
        let model = self.primary_model(&request)?;
        self.dispatch(&request, &model, 1).await
    }

    /// Opens a chunk stream for `request`.
    ///
    /// Local failures (unknown model, missing key, budget) are returned as `Err`.
    /// Once the request is on the wire every failure, including a non-2xx answer
    /// and cancellation, arrives as the stream's terminal error chunk. Streams are
    /// never retried.
    pub async fn stream(&self, request: ChatRequest) -> Result<ChatStream, AIError> {
        let model = self.primary_model(&request)?;
        let target = self.target(&model)?;
        let span = tracing::info_span!(
            "relay.stream",
            provider = %target.provider,
            model = %target.model
        );
        let provider = target.provider;
        let opening = self.open_stream(&request, target).instrument(span);
        match request.cancellation.as_ref() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Ok(error_stream(AIError::cancelled().with_provider(provider))),
                opened = opening => opened,
            },
            None => opening.await,
        }
    }

    /// Resolves alias, provider and credential for `model`.
    ///
    /// Fails with INVALID_MODEL or NO_API_KEY without touching the network.
    pub(crate) fn target(&self, model: &str) -> Result<Target, AIError> {
        let model = self.resolve_alias(model);
        let provider = resolve_provider(&model).ok_or_else(|| AIError::invalid_model(&model))?;
        let api_key = self
            .config
            .provider(provider)
            .api_key()
            .ok_or_else(|| AIError::no_api_key(provider))?
            .to_string();
        Ok(Target {
            model,
            provider,
            api_key,
        })
    }

    /// The request's model, or the configured default when it names none.
    pub(crate) fn primary_model(&self, request: &ChatRequest) -> Result<String, AIError> {
        let model = request.model.trim();
        if !model.is_empty() {
            return Ok(model.to_string());
        }
        self.config
            .defaults
            .model
            .clone()
            .ok_or_else(|| AIError::invalid_request("request names no model and no default is set"))
    }

    fn candidates(&self, request: &ChatRequest) -> Result<Vec<String>, AIError> {
        let primary = self.primary_model(request)?;
        let mut candidates = vec![primary];
        for fallback in &self.config.fallbacks {
            if !candidates.contains(fallback) {
                candidates.push(fallback.clone());
            }
        }
        Ok(candidates)
    }

    async fn dispatch(
        &self,
        request: &ChatRequest,
        model: &str,
        attempt: u32,
    ) -> Result<ChatResult, AIError> {
        let target = self.target(model)?;
        let span = tracing::info_span!(
            "relay.chat",
            provider = %target.provider,
            model = %target.model,
            attempt
        );
        let work = self.execute(request, target).instrument(span);
        with_cancellation(request.cancellation.as_ref(), work).await
    }

    async fn execute(&self, request: &ChatRequest, target: Target) -> Result<ChatResult, AIError> {
        let started = Instant::now();
        let provider = target.provider;
        let request = self.prepare(request, &target).await?;

        let body = build_body(provider, &request, &target.model, false)?;
        let endpoint = endpoint(
            provider,
            self.config.provider(provider),
            &target.api_key,
            &target.model,
            false,
        );
        let timeout = request.timeout;
        let response = with_timeout(
            timeout,
            post_json_with_headers(
                self.transport.as_ref(),
                endpoint.url,
                endpoint.headers,
                &body,
                timeout,
            ),
        )
        .await
        .map_err(|err| attach_provider(err, provider))?;

        let text = response.text();
        if !response.is_success() {
            let err = parse_error_response(provider, response.status, &response.headers, &text);
            tracing::warn!(status = response.status, kind = %err.kind, "provider returned an error");
            return Err(err);
        }

        let completion = parse_completion(provider, &target.model, &text)?;
        let cost = calculate_cost(&target.model, &completion.usage);
        let latency_ms = elapsed_ms(started);

        self.recorder.record(&UsageRecord {
            model: target.model.clone(),
            provider,
            usage: completion.usage,
            cost,
            latency_ms,
            streamed: false,
        });
        tracing::debug!(
            latency_ms,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            cost = cost.total,
            "request completed"
        );

        Ok(ChatResult {
            content: completion.content,
            model: completion.model,
            provider,
            usage: completion.usage,
            cost,
            latency_ms,
            tool_calls: completion.tool_calls,
            finish_reason: completion.finish_reason,
        })
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
        target: Target,
    ) -> Result<ChatStream, AIError> {
        let started = Instant::now();
        let provider = target.provider;
        let request = self.prepare(request, &target).await?;

        let body = build_body(provider, &request, &target.model, true)?;
        let endpoint = endpoint(
            provider,
            self.config.provider(provider),
            &target.api_key,
            &target.model,
            true,
        );
        let timeout = request.timeout;
        let opened = with_timeout(
            timeout,
            post_json_stream_with_headers(
                self.transport.as_ref(),
                endpoint.url,
                endpoint.headers,
                &body,
                timeout,
            ),
        )
        .await;
        let response = match opened {
            Ok(response) => response,
            Err(err) => return Ok(error_stream(attach_provider(err, provider))),
        };

        if !(200..300).contains(&response.status) {
            let err = match collect_body_text(response.body).await {
                Ok(text) => {
                    parse_error_response(provider, response.status, &response.headers, &text)
                }
                Err(err) => attach_provider(err, provider),
            };
            tracing::warn!(status = response.status, kind = %err.kind, "provider rejected stream");
            return Ok(error_stream(err));
        }

        let decoder = StreamDecoder::new(response.body, provider);
        let translator = StreamTranslator::new(provider, &target.model);
        let chunks = chunk_stream(decoder, translator, request.cancellation.clone());
        Ok(self.track_stream(chunks, target.model, provider, started))
    }

    /// Records usage when the stream reaches `Done`.
    fn track_stream(
        &self,
        chunks: ChatStream,
        model: String,
        provider: Provider,
        started: Instant,
    ) -> ChatStream {
        let recorder = self.recorder.clone();
        Box::pin(chunks.inspect(move |chunk| {
            if let StreamChunk::Done { usage, cost, .. } = chunk {
                let usage = usage.unwrap_or_default();
                let cost = cost.unwrap_or_else(|| calculate_cost(&model, &usage));
                recorder.record(&UsageRecord {
                    model: model.clone(),
                    provider,
                    usage,
                    cost,
                    latency_ms: elapsed_ms(started),
                    streamed: true,
                });
            }
        }))
    }

    /// Applies defaults, enforces the budget and inlines remote images.
    async fn prepare(&self, request: &ChatRequest, target: &Target) -> Result<ChatRequest, AIError> {
        let mut prepared = request.clone();
        prepared.model = target.model.clone();
        prepared.options = request.options.merged_with(&self.config.defaults.options);
        prepared.timeout = request.timeout.or_else(|| self.config.defaults.timeout());

        self.check_budget(&prepared, &target.model)?;
        warn_on_capabilities(&prepared, &target.model);
        if !accepts_image_urls(target.provider) {
            self.inline_remote_images(target.provider, &mut prepared)
                .await?;
        }
        Ok(prepared)
    }

    fn check_budget(&self, request: &ChatRequest, model: &str) -> Result<(), AIError> {
        let BudgetConfig {
            max_cost_per_request,
            max_total_cost,
        } = self.config.budget;

        if let Some(limit) = max_total_cost {
            let spent = self.recorder.ledger.total_cost();
            if spent >= limit {
                return Err(AIError::invalid_request(format!(
                    "budget exhausted: ${spent:.6} spent of ${limit:.6}"
                )));
            }
        }
        if let Some(limit) = max_cost_per_request {
            let estimate = estimate_request_cost(model, request).total;
            if estimate > limit {
                return Err(AIError::invalid_request(format!(
                    "estimated cost ${estimate:.6} exceeds the per-request limit of ${limit:.6}"
                )));
            }
        }
        Ok(())
    }

    /// Replaces `http(s)` image URLs with base64 data fetched through the transport.
    async fn inline_remote_images(
        &self,
        provider: Provider,
        request: &mut ChatRequest,
    ) -> Result<(), AIError> {
        let timeout = request.timeout;
        for message in &mut request.messages {
            let MessageContent::Parts(parts) = &mut message.content else {
                continue;
            };
            for part in parts.iter_mut() {
                if let ContentPart::Image {
                    source: ImageSource::Url { url },
                } = part
                {
                    if !is_remote(url) {
                        continue;
                    }
                    let source = self.fetch_image(provider, url, timeout).await?;
                    *part = ContentPart::Image { source };
                }
            }
        }
        Ok(())
    }

    async fn fetch_image(
        &self,
        provider: Provider,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<ImageSource, AIError> {
        let failed = |reason: String| {
            AIError::invalid_request(format!("failed to fetch image {url}: {reason}"))
                .with_provider(provider)
        };

        let request = HttpRequest::get(url).with_timeout(timeout);
        let response = with_timeout(timeout, self.transport.send(request))
            .await
            .map_err(|err| failed(err.message))?;
        if !response.is_success() {
            return Err(failed(format!("HTTP {}", response.status)));
        }

        let mime_type = response
            .header("content-type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MIME)
            .to_string();
        tracing::debug!(url, mime_type = %mime_type, bytes = response.body.len(), "inlined remote image");
        Ok(ImageSource::Base64 {
            data: STANDARD.encode(&response.body),
            mime_type,
        })
    }
}

/// Builder for [`AIClient`].
#[derive(Default)]
pub struct AIClientBuilder {
    config: ClientConfig,
    transport: Option<DynHttpTransport>,
    ledger: Option<Arc<CostLedger>>,
    tracker: Option<Arc<dyn UsageTracker>>,
}

impl AIClientBuilder {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `transport` instead of the default reqwest client.
    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn api_key(mut self, provider: Provider, api_key: impl Into<String>) -> Self {
        self.config.provider_mut(provider).api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        self.config.provider_mut(provider).base_url = Some(base_url.into());
        self
    }

    pub fn header(
        mut self,
        provider: Provider,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config
            .provider_mut(provider)
            .headers
            .insert(name.into(), value.into());
        self
    }

    /// Fills credentials that are still missing from the environment.
    pub fn env_credentials(mut self) -> Self {
        self.config = self.config.with_env_credentials();
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.defaults.model = Some(model.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.defaults.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn fallbacks<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fallbacks = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.config.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn budget(mut self, budget: BudgetConfig) -> Self {
        self.config.budget = budget;
        self
    }

    /// Shares an existing ledger, e.g. across several clients.
    pub fn ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// External sink called after the ledger for every successful dispatch.
    pub fn tracker(mut self, tracker: Arc<dyn UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// # Errors
    ///
    /// Returns NETWORK when no transport was given and the default one cannot be built.
    pub fn build(self) -> Result<AIClient, AIError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_dyn_transport()?,
        };
        Ok(AIClient {
            aliases: AliasTable::with_overrides(self.config.aliases.clone()),
            retry: RetryPolicy::from_config(&self.config.retry),
            transport,
            config: self.config,
            recorder: Recorder {
                ledger: self.ledger.unwrap_or_default(),
                tracker: self.tracker,
            },
        })
    }
}

static SHARED_CLIENT: OnceLock<AIClient> = OnceLock::new();

/// Process-wide client configured from the environment, created on first use.
///
/// Meant for binaries and scripts. Libraries should own an [`AIClient`] instead.
pub fn shared_client() -> Result<&'static AIClient, AIError> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client);
    }
    let client = AIClient::from_env()?;
    Ok(SHARED_CLIENT.get_or_init(|| client))
}

async fn with_cancellation<T, F>(token: Option<&CancellationToken>, work: F) -> Result<T, AIError>
where
    F: Future<Output = Result<T, AIError>>,
{
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(AIError::cancelled()),
            result = work => result,
        },
        None => work.await,
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, work: F) -> Result<T, AIError>
where
    F: Future<Output = Result<T, AIError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
            Err(AIError::timeout(format!(
                "request timed out after {} ms",
                limit.as_millis()
            )))
        }),
        None => work.await,
    }
}

fn attach_provider(err: AIError, provider: Provider) -> AIError {
    if err.provider.is_some() {
        err
    } else {
        err.with_provider(provider)
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn warn_on_capabilities(request: &ChatRequest, model: &str) {
    let Some(entry) = pricing_for(model) else {
        return;
    };
    if request.has_images() && !entry.vision {
        tracing::warn!(model, "model is not listed as vision-capable; sending images anyway");
    }
    if !request.tools.is_empty() && !entry.tools {
        tracing::warn!(model, "model is not listed as tool-capable; sending tools anyway");
    }
}
